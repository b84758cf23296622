//! # reqscope
//!
//! Request-scoped context for hyper services. One record per request,
//! built in stages, read by the handler, audited afterwards.
//!
//! ## The lifecycle
//!
//! ```text
//! request ─▶ pipeline: open ambient scope, allocate request-scoped slot
//!         ─▶ before hooks (access log, CORS)
//!         ─▶ route: guards ─▶ enrichment (create ▶ identity ▶ permissions ▶ environment)
//!         ─▶ handler reads the record
//!         ─▶ record sealed
//!         ─▶ after hooks (audit reads slot + ambient, X-Process-Time, CORS, access log)
//! ```
//!
//! - [`context`] — the record and the shared [`ContextHandle`]
//! - [`slot`] — request-scoped storage, authoritative
//! - [`ambient`] — task-local storage, best-effort
//! - [`enrich`] — the stage graph and its memoizing [`Resolver`]
//! - [`middleware`] — hooks around the handler, with guaranteed cleanup
//! - [`guard`] — bearer-token gate for individual routes
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::Method;
//! use reqscope::{ApiError, App, Json, Request, Route, Router, Server, Stage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reqscope::Error> {
//!     let app = App::new(
//!         Router::new().route(Method::GET, "/whoami", Route::new(whoami).needs(Stage::Environment)),
//!     );
//!     Server::bind("0.0.0.0:8000")?.serve(app).await
//! }
//!
//! async fn whoami(req: Request) -> Result<Json<reqscope::RequestContext>, ApiError> {
//!     Ok(Json(req.context().await?.snapshot()))
//! }
//! ```

mod app;
mod error;
mod handler;
mod lifecycle;
mod request;
mod response;
mod router;
mod server;

pub mod ambient;
pub mod config;
pub mod context;
pub mod demo;
pub mod enrich;
pub mod guard;
pub mod middleware;
pub mod slot;

pub use app::App;
pub use config::Config;
pub use context::{ContextHandle, Permission, RequestContext, User};
pub use enrich::{Resolver, Sources, Stage};
pub use error::{ApiError, ContextError, Error};
pub use handler::Handler;
pub use lifecycle::{Lifecycle, Phase};
pub use request::{REQUEST_ID_HEADER, Request};
pub use response::{IntoResponse, Json, Response};
pub use router::{Route, Router};
pub use server::Server;

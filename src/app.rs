//! The application: router, hook pipeline and enrichment sources, and the
//! per-request glue between them.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;

use crate::ambient;
use crate::enrich::{Resolver, Sources};
use crate::error::ApiError;
use crate::middleware::{Audit, Cors, Exchange, Pipeline};
use crate::request::{REQUEST_ID_HEADER, Request};
use crate::response::{IntoResponse, Response};
use crate::router::{Lookup, Router};

/// Everything a server needs to answer requests.
///
/// ```rust,no_run
/// use reqscope::{App, Router, Server, demo};
///
/// # async fn run() -> Result<(), reqscope::Error> {
/// let app = App::new(Router::new().register(demo::routes(demo::Settings::default())));
/// Server::bind("0.0.0.0:8000")?.serve(app).await
/// # }
/// ```
pub struct App {
    router: Router,
    pipeline: Pipeline,
    sources: Arc<Sources>,
}

impl App {
    /// An app with the standard pipeline and the static enrichment sources.
    pub fn new(router: Router) -> Self {
        Self {
            router,
            pipeline: Pipeline::standard(Cors::permissive(), Audit::tracing()),
            sources: Arc::new(Sources::default()),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_sources(mut self, sources: Sources) -> Self {
        self.sources = Arc::new(sources);
        self
    }

    /// Answers one request.
    ///
    /// Allocates the request's resolver (and with it the request-scoped
    /// slot), opens the ambient scope and runs the pipeline inside it.
    pub async fn handle<B>(&self, req: http::Request<B>) -> Response
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (head, body) = req.into_parts();

        let seed = head
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let resolver = Arc::new(Resolver::new(seed, Arc::clone(&self.sources)));
        let exchange = Exchange::new(&head, Arc::clone(&resolver));

        let downstream = |head: http::request::Parts| async move {
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    return ApiError::Validation(format!("unreadable request body: {e}")).into_response();
                }
            };
            self.dispatch(head, body, resolver).await
        };

        ambient::scope(self.pipeline.run(exchange, head, downstream)).await
    }

    async fn dispatch(
        &self,
        head: http::request::Parts,
        body: Bytes,
        resolver: Arc<Resolver>,
    ) -> Response {
        match self.router.lookup(&head.method, head.uri.path()) {
            Lookup::Found(route, params) => {
                route.invoke(Request::new(head, body, params, resolver)).await
            }
            Lookup::MethodNotAllowed => ApiError::MethodNotAllowed.into_response(),
            Lookup::NotFound => ApiError::NotFound.into_response(),
        }
    }
}

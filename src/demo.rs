//! Demo routes.
//!
//! | Route | Notes |
//! |---|---|
//! | `GET /` | hello world |
//! | `GET /items/{item_id}?q=` | path + query parsing |
//! | `PUT /items/{item_id}` | bearer-guarded, JSON body, artificial delay |
//! | `GET /profile` | the fully enriched context |
//! | `GET /profile/detached` | same context, built on a spawned task |
//!
//! `/profile/detached` shows the weak side of the ambient channel: the
//! record is created off the request task, so the audit record's ambient
//! reading is empty while the request-scoped one is complete.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::{Permission, RequestContext, User};
use crate::enrich::Stage;
use crate::error::ApiError;
use crate::guard::BearerGuard;
use crate::request::Request;
use crate::response::Json;
use crate::router::{Route, Router};

#[derive(Clone, Debug)]
pub struct Settings {
    pub item_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self { item_delay: Duration::from_secs(2) }
    }
}

/// The demo handler set, for [`Router::register`].
pub fn routes(settings: Settings) -> impl FnOnce(Router) -> Router {
    move |router| {
        let delay = settings.item_delay;
        router
            .on(Method::GET, "/", root)
            .on(Method::GET, "/items/{item_id}", read_item)
            .route(
                Method::PUT,
                "/items/{item_id}",
                Route::new(move |req: Request| update_item(req, delay))
                    .guard(BearerGuard::pass_through()),
            )
            .route(Method::GET, "/profile", Route::new(profile).needs(Stage::Environment))
            .on(Method::GET, "/profile/detached", profile_detached)
    }
}

async fn root(_req: Request) -> Json<Value> {
    Json(json!({"Hello": "World"}))
}

async fn read_item(req: Request) -> Result<Json<Value>, ApiError> {
    let item_id: i64 = req.param_as("item_id")?;
    Ok(Json(json!({"item_id": item_id, "q": req.query("q")})))
}

#[derive(Debug, Deserialize)]
pub struct Item {
    pub name: String,
    pub price: f64,
    pub is_offer: Option<bool>,
}

#[derive(Debug, Serialize)]
struct UpdatedItem {
    item_name: String,
    item_id: i64,
}

async fn update_item(req: Request, delay: Duration) -> Result<Json<UpdatedItem>, ApiError> {
    let item_id: i64 = req.param_as("item_id")?;
    let item: Item = req.json()?;
    tracing::debug!(item_id, price = item.price, is_offer = ?item.is_offer, "updating item");

    tokio::time::sleep(delay).await;

    Ok(Json(UpdatedItem { item_name: item.name, item_id }))
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub request_id: String,
    pub user: Option<User>,
    pub roles: Vec<String>,
    pub permissions: BTreeSet<Permission>,
    pub env: String,
    pub tenant_id: Option<u64>,
}

impl From<RequestContext> for Profile {
    fn from(ctx: RequestContext) -> Self {
        Self {
            request_id: ctx.request_id,
            user: ctx.user,
            roles: ctx.roles,
            permissions: ctx.permissions,
            env: ctx.env,
            tenant_id: ctx.tenant_id,
        }
    }
}

async fn profile(req: Request) -> Result<Json<Profile>, ApiError> {
    let ctx = req.context().await?;
    Ok(Json(Profile::from(ctx.snapshot())))
}

async fn profile_detached(req: Request) -> Result<Json<Profile>, ApiError> {
    let resolver = Arc::clone(req.resolver());
    let ctx = tokio::spawn(async move { resolver.context().await })
        .await
        .map_err(|e| ApiError::Internal(format!("enrichment task failed: {e}")))??;
    Ok(Json(Profile::from(ctx.snapshot())))
}

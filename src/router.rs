//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. A route is a handler plus
//! what has to happen before it runs: guards that may refuse the request and
//! the enrichment stage the handler depends on.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::enrich::Stage;
use crate::error::ApiError;
use crate::guard::Guard;
use crate::handler::{BoxedHandler, Handler};
use crate::lifecycle::Phase;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A handler with its preconditions.
///
/// ```rust,ignore
/// Route::new(update_item).guard(BearerGuard::pass_through());
/// Route::new(profile).needs(Stage::Environment);
/// ```
pub struct Route {
    handler: BoxedHandler,
    guards: Vec<Arc<dyn Guard>>,
    needs: Option<Stage>,
}

impl Route {
    pub fn new(handler: impl Handler) -> Self {
        Self { handler: handler.into_boxed_handler(), guards: Vec::new(), needs: None }
    }

    /// Adds a guard. Guards run in the order they were added.
    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Resolves the context up to `stage` before the handler is called.
    /// A failing stage rejects the request; the handler never sees a
    /// partially enriched record.
    pub fn needs(mut self, stage: Stage) -> Self {
        self.needs = Some(stage);
        self
    }

    pub(crate) async fn invoke(&self, mut req: Request) -> Response {
        for guard in &self.guards {
            if let Err(e) = guard.check(&mut req).await {
                return e.into_response();
            }
        }
        if let Some(stage) = self.needs {
            if let Err(e) = req.resolve(stage).await {
                return ApiError::from(e).into_response();
            }
        }
        req.resolver.lifecycle().advance(Phase::Dispatched);
        self.handler.call(req).await
    }
}

pub(crate) enum Lookup {
    Found(Arc<Route>, HashMap<String, String>),
    MethodNotAllowed,
    NotFound,
}

/// The application router.
///
/// Build it once at startup and hand it to [`App::new`](crate::App::new).
/// Every registration returns `self` so calls chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Route>>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a plain handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route(method, path, Route::new(handler))
    }

    /// Register a [`Route`] with guards or stage requirements.
    ///
    /// # Panics
    ///
    /// Same as [`Router::on`].
    pub fn route(mut self, method: Method, path: &str, route: Route) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, Arc::new(route))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Applies a set of registrations, e.g. one module's routes.
    pub fn register(self, handler_set: impl FnOnce(Self) -> Self) -> Self {
        handler_set(self)
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(Arc::clone(matched.value), params);
        }
        if self.routes.values().any(|tree| tree.at(path).is_ok()) {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

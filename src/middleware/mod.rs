//! Middleware layer.
//!
//! Cross-cutting work around the handler is an ordered list of [`Hook`]s
//! held by a [`Pipeline`]:
//!
//! ```text
//!   before:  hooks[0] → hooks[1] → … → hooks[n]
//!            route → guards → enrichment → handler
//!   after:   hooks[n] → … → hooks[1] → hooks[0]
//! ```
//!
//! A `before` may answer the request itself (a CORS preflight); the `after`
//! hooks still run. They also run when the handler panics (as a 500) and
//! when the request future is dropped mid-flight, e.g. on client disconnect
//! (as [`CLIENT_CLOSED`]). That guarantee comes from a drop guard wrapped
//! around the whole exchange, not from every hook remembering to clean up.
//!
//! Built-in hooks:
//! - [`AccessLog`] — request line and response status via `tracing`
//! - [`Cors`] — permissive CORS, answers preflights
//! - [`ProcessTime`] — `X-Process-Time` on every response
//! - [`Audit`] — the per-request audit record

mod access_log;
mod audit;
mod cors;
mod timing;

pub use access_log::AccessLog;
pub use audit::{Audit, AuditRecord, AuditSink, MemorySink, TracingSink};
pub use cors::Cors;
pub use timing::{PROCESS_TIME_HEADER, ProcessTime};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use http::{HeaderMap, Method, StatusCode};
use tracing::{error, warn};

use crate::context::ContextHandle;
use crate::enrich::Resolver;
use crate::error::ApiError;
use crate::lifecycle::Phase;
use crate::response::{IntoResponse, Response};

/// Status reported to `after` hooks when the request was abandoned before a
/// response existed (nginx's "client closed request").
pub const CLIENT_CLOSED: u16 = 499;

/// A cross-cutting stage around the handler.
pub trait Hook: Send + Sync {
    /// Runs before routing. Returning a response skips everything downstream.
    fn before(&self, _exchange: &Exchange, _head: &http::request::Parts) -> Option<Response> {
        None
    }

    /// Runs once the response status is known, in reverse registration order.
    fn after(&self, _exchange: &Exchange, _status: StatusCode, _headers: &mut HeaderMap) {}
}

/// What the hooks know about the request in flight.
pub struct Exchange {
    method: Method,
    path: String,
    origin: Option<String>,
    started: Instant,
    resolver: Arc<Resolver>,
}

impl Exchange {
    pub(crate) fn new(head: &http::request::Parts, resolver: Arc<Resolver>) -> Self {
        Self {
            method: head.method.clone(),
            path: head.uri.path().to_owned(),
            origin: head
                .headers
                .get(http::header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            started: Instant::now(),
            resolver,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn origin(&self) -> Option<&str> { self.origin.as_deref() }
    pub fn elapsed(&self) -> Duration { self.started.elapsed() }
    pub fn resolver(&self) -> &Arc<Resolver> { &self.resolver }

    /// The record from the request-scoped slot, if the chain created one.
    /// Never triggers enrichment.
    pub fn context(&self) -> Option<ContextHandle> {
        self.resolver.peek()
    }
}

/// Ordered list of hooks.
#[derive(Clone, Default)]
pub struct Pipeline {
    hooks: Vec<Arc<dyn Hook>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook. Its `before` runs after the ones already registered,
    /// its `after` before them.
    pub fn hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Access log, CORS, process time and audit, in that order.
    pub fn standard(cors: Cors, audit: Audit) -> Self {
        Self::new()
            .hook(AccessLog)
            .hook(cors)
            .hook(ProcessTime)
            .hook(audit)
    }

    /// Runs `downstream` between the hooks.
    pub(crate) async fn run<F, Fut>(
        &self,
        exchange: Exchange,
        head: http::request::Parts,
        downstream: F,
    ) -> Response
    where
        F: FnOnce(http::request::Parts) -> Fut,
        Fut: Future<Output = Response>,
    {
        let completion = Completion { hooks: &self.hooks, exchange, done: false };

        for hook in &self.hooks {
            if let Some(resp) = hook.before(&completion.exchange, &head) {
                return completion.finish(resp);
            }
        }

        let resp = match AssertUnwindSafe(downstream(head)).catch_unwind().await {
            Ok(resp) => resp,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(path = %completion.exchange.path, panic = %reason, "handler panicked");
                ApiError::Internal("Internal Server Error".to_owned()).into_response()
            }
        };
        completion.finish(resp)
    }
}

/// Runs the `after` hooks exactly once: on [`finish`](Completion::finish),
/// or on drop if the exchange was abandoned.
struct Completion<'a> {
    hooks: &'a [Arc<dyn Hook>],
    exchange: Exchange,
    done: bool,
}

impl Completion<'_> {
    fn finish(mut self, mut resp: Response) -> Response {
        self.complete(resp.status, &mut resp.headers);
        resp
    }

    fn complete(&mut self, status: StatusCode, headers: &mut HeaderMap) {
        self.done = true;
        self.exchange.resolver.slot().seal();
        for hook in self.hooks.iter().rev() {
            hook.after(&self.exchange, status, headers);
        }
        self.exchange.resolver.lifecycle().advance(Phase::Completed);
    }
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                method = %self.exchange.method,
                path = %self.exchange.path,
                "request abandoned before completion"
            );
            let status = StatusCode::from_u16(CLIENT_CLOSED).unwrap_or(StatusCode::REQUEST_TIMEOUT);
            self.complete(status, &mut HeaderMap::new());
        }
        self.exchange.resolver.lifecycle().advance(Phase::Terminal);
    }
}

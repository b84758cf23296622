use http::{HeaderMap, StatusCode};
use tracing::{debug, info};

use super::{Exchange, Hook};
use crate::response::Response;

/// Logs the request line on the way in and the status on the way out.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessLog;

impl Hook for AccessLog {
    fn before(&self, _exchange: &Exchange, head: &http::request::Parts) -> Option<Response> {
        info!(method = %head.method, uri = %head.uri, "incoming request");
        debug!(headers = ?head.headers, "request headers");
        None
    }

    fn after(&self, exchange: &Exchange, status: StatusCode, headers: &mut HeaderMap) {
        info!(
            method = %exchange.method(),
            path = exchange.path(),
            status = status.as_u16(),
            "response"
        );
        debug!(headers = ?headers, "response headers");
    }
}

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

use super::{Exchange, Hook};

pub const PROCESS_TIME_HEADER: HeaderName = HeaderName::from_static("x-process-time");

/// Adds `X-Process-Time`: seconds since the exchange started, as a decimal.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessTime;

impl Hook for ProcessTime {
    fn after(&self, exchange: &Exchange, _status: StatusCode, headers: &mut HeaderMap) {
        let secs = exchange.elapsed().as_secs_f64();
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            headers.insert(PROCESS_TIME_HEADER, value);
        }
    }
}

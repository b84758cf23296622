//! Error types.
//!
//! Three layers, from the outside in:
//!
//! - [`Error`] — infrastructure failures: binding a port, accepting a
//!   connection. Returned from [`Server::serve`](crate::Server::serve).
//! - [`ApiError`] — anything a request can fail with. Every variant maps to
//!   a status code and renders the standard envelope
//!   `{"message": <string>, "error": true}`.
//! - [`ContextError`] — failures of the enrichment chain and of the context
//!   lifecycle. Wrapped by [`ApiError::Context`] on the way out.

use http::StatusCode;
use serde::Serialize;

use crate::response::{IntoResponse, Response};

/// The error type returned by reqscope's fallible server operations.
///
/// Application-level errors (401, 422, etc.) are expressed as [`ApiError`]
/// and turned into responses; this type surfaces infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address `{addr}`: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Failure of an enrichment stage or of a context lifecycle rule.
///
/// `Clone` because a failed stage is memoized: every later consumer of the
/// same request receives the same error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Identity resolution failed.
    #[error("{0}")]
    Unauthenticated(String),

    /// Environment / tenant resolution failed.
    #[error("{0}")]
    EnvironmentUnavailable(String),

    /// The record was mutated after the handler returned.
    #[error("request context is sealed")]
    Sealed,

    /// A second record was bound to a request that already has one.
    #[error("request context already bound")]
    AlreadyBound,
}

impl ContextError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::EnvironmentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Sealed | Self::AlreadyBound => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Everything a request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// `Authorization` header absent or not a bearer token.
    #[error("Missing or invalid token")]
    MissingOrInvalidToken,

    /// The token validator refused the token.
    #[error("Invalid token: {0}")]
    TokenRejected(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Path parameters, query or body did not match the expected shape.
    #[error("{0}")]
    Validation(String),

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingOrInvalidToken | Self::TokenRejected(_) => StatusCode::UNAUTHORIZED,
            Self::Context(e) => e.status(),
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire shape of every handled fault.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub message: &'a str,
    pub error: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        let message = self.to_string();
        Response::envelope(status, &ErrorBody { message: &message, error: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_errors_map_to_their_status() {
        assert_eq!(
            ContextError::Unauthenticated("no session".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ContextError::EnvironmentUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ContextError::Sealed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn missing_token_renders_standard_envelope() {
        let resp = ApiError::MissingOrInvalidToken.into_response();
        assert_eq!(resp.status_code(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"message": "Missing or invalid token", "error": true})
        );
    }

    #[test]
    fn validation_is_unprocessable() {
        let resp = ApiError::Validation("price: expected f64".into()).into_response();
        assert_eq!(resp.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

//! Route guards: checks that run before a handler and can refuse the request.
//!
//! The one shipped guard is [`BearerGuard`]. It looks for
//! `Authorization: Bearer <token>`, hands the token to a [`TokenValidator`]
//! and stores the resulting [`Claims`] in the request extensions. A request
//! it refuses never reaches the handler, so nothing downstream (including
//! the enrichment chain) runs for it. The guard does not read or write the
//! context record.

use async_trait::async_trait;
use http::header::AUTHORIZATION;

use crate::error::ApiError;
use crate::request::Request;

const BEARER_PREFIX: &str = "Bearer ";

/// A pre-handler check attached to a [`Route`](crate::Route).
#[async_trait]
pub trait Guard: Send + Sync {
    /// # Errors
    ///
    /// The [`ApiError`] the request is rejected with.
    async fn check(&self, req: &mut Request) -> Result<(), ApiError>;
}

/// What a validated token says about its bearer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    /// The raw token as presented.
    pub token: String,
    pub subject: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Rejected(pub String);

/// Turns a bearer token into claims.
pub trait TokenValidator: Send + Sync {
    /// # Errors
    ///
    /// [`Rejected`] when the token is not acceptable.
    fn validate(&self, token: &str) -> Result<Claims, Rejected>;
}

/// Accepts every token unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl TokenValidator for PassThrough {
    fn validate(&self, token: &str) -> Result<Claims, Rejected> {
        Ok(Claims { token: token.to_owned(), subject: None })
    }
}

/// Requires `Authorization: Bearer <token>`.
#[derive(Clone, Debug, Default)]
pub struct BearerGuard<V = PassThrough> {
    validator: V,
}

impl BearerGuard<PassThrough> {
    pub fn pass_through() -> Self {
        Self { validator: PassThrough }
    }
}

impl<V: TokenValidator> BearerGuard<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }
}

/// Token part of a bearer `Authorization` value.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization?.strip_prefix(BEARER_PREFIX)
}

#[async_trait]
impl<V: TokenValidator> Guard for BearerGuard<V> {
    async fn check(&self, req: &mut Request) -> Result<(), ApiError> {
        let Some(token) = bearer_token(req.header(AUTHORIZATION.as_str())) else {
            tracing::debug!(path = req.path(), "missing or malformed bearer token");
            return Err(ApiError::MissingOrInvalidToken);
        };
        let claims = self
            .validator
            .validate(token)
            .map_err(|Rejected(reason)| ApiError::TokenRejected(reason))?;
        req.extensions_mut().insert(claims);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::request::tests::request;

    struct DenyAll;

    impl TokenValidator for DenyAll {
        fn validate(&self, _token: &str) -> Result<Claims, Rejected> {
            Err(Rejected("revoked".into()))
        }
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer xyz")), Some("xyz"));
        assert_eq!(bearer_token(Some("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(Some("bearer xyz")), None);
        assert_eq!(bearer_token(Some("Bearerxyz")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[tokio::test]
    async fn valid_header_stores_claims() {
        let mut req = request(Method::PUT, "/items/42", &[("authorization", "Bearer xyz")], "");
        BearerGuard::pass_through().check(&mut req).await.unwrap();

        let claims = req.extensions().get::<Claims>().unwrap();
        assert_eq!(claims.token, "xyz");
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let mut req = request(Method::PUT, "/items/42", &[], "");
        let err = BearerGuard::pass_through().check(&mut req).await.unwrap_err();

        assert!(matches!(err, ApiError::MissingOrInvalidToken));
        assert!(req.extensions().get::<Claims>().is_none());
    }

    #[tokio::test]
    async fn validator_rejection_is_unauthorized() {
        let mut req = request(Method::PUT, "/items/42", &[("authorization", "Bearer old")], "");
        let err = BearerGuard::new(DenyAll).check(&mut req).await.unwrap_err();

        assert!(matches!(err, ApiError::TokenRejected(ref r) if r == "revoked"));
        assert_eq!(err.status(), http::StatusCode::UNAUTHORIZED);
    }
}

//! Incoming HTTP request type.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;

use crate::context::ContextHandle;
use crate::enrich::{Resolver, Stage};
use crate::error::{ApiError, ContextError};

/// Header that seeds the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// An incoming HTTP request with its body already read.
///
/// Besides the usual accessors it carries the request's [`Resolver`], the
/// request-scoped home of the context record:
///
/// ```rust,ignore
/// async fn profile(req: Request) -> Result<Json<Profile>, ApiError> {
///     let ctx = req.context().await?.snapshot();
///     Ok(Json(Profile::from(ctx)))
/// }
/// ```
pub struct Request {
    pub(crate) head: http::request::Parts,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) resolver: Arc<Resolver>,
}

impl Request {
    pub(crate) fn new(
        head: http::request::Parts,
        body: Bytes,
        params: HashMap<String, String>,
        resolver: Arc<Resolver>,
    ) -> Self {
        Self { head, body, params, resolver }
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Values placed here by guards (e.g. validated token claims).
    pub fn extensions(&self) -> &Extensions { &self.head.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.head.extensions }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/items/{item_id}`, `req.param("item_id")` on `/items/42`
    /// returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parses a path parameter.
    ///
    /// # Errors
    ///
    /// [`ApiError::Validation`] when the parameter is missing or unparsable.
    pub fn param_as<T: FromStr>(&self, key: &str) -> Result<T, ApiError> {
        let raw = self
            .param(key)
            .ok_or_else(|| ApiError::Validation(format!("{key}: field required")))?;
        raw.parse()
            .map_err(|_| ApiError::Validation(format!("{key}: invalid value `{raw}`")))
    }

    /// First value of a query-string parameter, percent- and `+`-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.head.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Deserialises the body as JSON.
    ///
    /// # Errors
    ///
    /// [`ApiError::Validation`] when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Validation(e.to_string()))
    }

    /// The fully enriched context. Runs whatever stages are still missing.
    pub async fn context(&self) -> Result<ContextHandle, ContextError> {
        self.resolver.context().await
    }

    /// The context enriched up to `stage`.
    pub async fn resolve(&self, stage: Stage) -> Result<ContextHandle, ContextError> {
        self.resolver.resolve(stage).await
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }
}

use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};

use super::{Exchange, Hook};
use crate::response::Response;

const ALLOWED_METHODS: &str = "DELETE, GET, HEAD, OPTIONS, PATCH, POST, PUT";

/// Permissive CORS: any method, any header, credentials allowed.
///
/// With the wildcard origin and credentials on, the request's own `Origin`
/// is echoed back, since browsers refuse `*` on credentialed requests.
#[derive(Clone, Debug)]
pub struct Cors {
    allow_origin: String,
}

impl Cors {
    pub fn new(allow_origin: impl Into<String>) -> Self {
        Self { allow_origin: allow_origin.into() }
    }

    pub fn permissive() -> Self {
        Self::new("*")
    }

    fn origin_for<'a>(&'a self, request_origin: &'a str) -> &'a str {
        if self.allow_origin == "*" { request_origin } else { &self.allow_origin }
    }

    fn decorate(&self, origin: &str, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(self.origin_for(origin)) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

impl Hook for Cors {
    fn before(&self, exchange: &Exchange, head: &http::request::Parts) -> Option<Response> {
        let origin = exchange.origin()?;
        let is_preflight = head.method == Method::OPTIONS
            && head.headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
        if !is_preflight {
            return None;
        }

        let mut resp = Response::status(StatusCode::NO_CONTENT);
        let headers = resp.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        if let Some(requested) = head.headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        }
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        self.decorate(origin, headers);
        Some(resp)
    }

    fn after(&self, exchange: &Exchange, _status: StatusCode, headers: &mut HeaderMap) {
        // A preflight answered in `before` is already decorated.
        if let Some(origin) = exchange.origin()
            && !headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        {
            self.decorate(origin, headers);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::enrich::{Resolver, Sources};

    fn exchange(origin: Option<&str>) -> Exchange {
        let mut req = http::Request::builder().method(Method::GET).uri("/items/1");
        if let Some(origin) = origin {
            req = req.header(header::ORIGIN, origin);
        }
        let (head, ()) = req.body(()).unwrap().into_parts();
        Exchange::new(&head, Arc::new(Resolver::new(None, Arc::new(Sources::default()))))
    }

    #[test]
    fn fixed_origin_is_sent_instead_of_the_callers() {
        let mut headers = HeaderMap::new();
        Cors::new("https://app.example")
            .after(&exchange(Some("https://evil.example")), StatusCode::OK, &mut headers);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");
        assert_eq!(headers[header::VARY], "Origin");
    }

    #[test]
    fn after_leaves_requests_without_origin_alone() {
        let mut headers = HeaderMap::new();
        Cors::permissive().after(&exchange(None), StatusCode::OK, &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn after_does_not_decorate_twice() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://a.example"));
        Cors::permissive().after(&exchange(Some("https://a.example")), StatusCode::NO_CONTENT, &mut headers);
        assert!(!headers.contains_key(header::VARY));
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
    }
}

//! CORS policy (C2). Hand-written rather than `tower_http::cors::CorsLayer`
//! because the allowlist/credentials/403-on-mutating-request behavior here
//! needs an explicit decision function, not a blanket layer.

use axum::http::{HeaderMap, HeaderValue, Method};

pub const ALLOWED_METHODS: &str = "GET,POST,PUT,DELETE,PATCH,OPTIONS";
pub const ALLOWED_HEADERS: &str = "authorization,content-type,x-gateway-csrf,x-gateway-csrf-proof";
const MAX_AGE_SECONDS: &str = "600";

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<String>,
    allow_any: bool,
}

pub enum CorsDecision {
    /// Origin allowed (or no Origin header present); headers to attach.
    Allow(HeaderMap),
    /// Origin not permitted on a state-mutating request.
    Deny,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>, allow_any: bool) -> Self {
        Self { origins, allow_any }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allow_any || self.origins.iter().any(|o| o == origin)
    }

    /// Decides headers for a normal (non-preflight) request.
    pub fn decide(&self, origin: Option<&str>, method: &Method) -> CorsDecision {
        let mut headers = HeaderMap::new();
        headers.insert("Vary", HeaderValue::from_static("Origin"));

        let Some(origin) = origin else {
            return CorsDecision::Allow(headers);
        };

        if !self.origin_allowed(origin) {
            let mutating = !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS);
            if mutating {
                return CorsDecision::Deny;
            }
            return CorsDecision::Allow(headers);
        }

        if self.allow_any {
            headers.insert(
                "Access-Control-Allow-Origin",
                HeaderValue::from_static("*"),
            );
        } else if let Ok(v) = HeaderValue::from_str(origin) {
            headers.insert("Access-Control-Allow-Origin", v);
            headers.insert(
                "Access-Control-Allow-Credentials",
                HeaderValue::from_static("true"),
            );
        }

        CorsDecision::Allow(headers)
    }

    /// Builds the full header set for an `OPTIONS` preflight response.
    pub fn preflight_headers(&self, origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Vary", HeaderValue::from_static("Origin"));
        headers.insert(
            "Access-Control-Allow-Methods",
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            "Access-Control-Allow-Headers",
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            "Access-Control-Max-Age",
            HeaderValue::from_static(MAX_AGE_SECONDS),
        );

        if let Some(origin) = origin {
            if self.origin_allowed(origin) {
                if self.allow_any {
                    headers.insert(
                        "Access-Control-Allow-Origin",
                        HeaderValue::from_static("*"),
                    );
                } else if let Ok(v) = HeaderValue::from_str(origin) {
                    headers.insert("Access-Control-Allow-Origin", v);
                    headers.insert(
                        "Access-Control-Allow-Credentials",
                        HeaderValue::from_static("true"),
                    );
                }
            }
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_never_sets_credentials() {
        let policy = CorsPolicy::new(vec![], true);
        let headers = policy.preflight_headers(Some("https://example.com"));
        assert_eq!(
            headers.get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
        assert!(headers.get("Access-Control-Allow-Credentials").is_none());
    }

    #[test]
    fn allowlisted_origin_gets_credentials() {
        let policy = CorsPolicy::new(vec!["https://app.example.com".to_string()], false);
        let headers = policy.preflight_headers(Some("https://app.example.com"));
        assert_eq!(
            headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://app.example.com"
        );
        assert_eq!(
            headers.get("Access-Control-Allow-Credentials").unwrap(),
            "true"
        );
    }

    #[test]
    fn disallowed_origin_denies_mutating_request() {
        let policy = CorsPolicy::new(vec!["https://app.example.com".to_string()], false);
        match policy.decide(Some("https://evil.example"), &Method::POST) {
            CorsDecision::Deny => {}
            _ => panic!("expected deny"),
        }
    }

    #[test]
    fn disallowed_origin_allows_get() {
        let policy = CorsPolicy::new(vec!["https://app.example.com".to_string()], false);
        match policy.decide(Some("https://evil.example"), &Method::GET) {
            CorsDecision::Allow(_) => {}
            _ => panic!("expected allow (no CORS headers, but no 403 on safe method)"),
        }
    }

    #[test]
    fn always_emits_vary_origin() {
        let policy = CorsPolicy::new(vec![], true);
        let CorsDecision::Allow(headers) = policy.decide(None, &Method::GET) else {
            panic!("expected allow");
        };
        assert_eq!(headers.get("Vary").unwrap(), "Origin");
    }
}

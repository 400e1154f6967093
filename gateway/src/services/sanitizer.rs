//! URL and path sanitizer (C1).
//!
//! Rejects traversal, encoded traversal, absolute-form URIs, control
//! characters and double slashes before any routing decision is made.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    static ref SCHEME_QUALIFIED: Regex = Regex::new(r"(?i)^[a-z][a-z0-9+.\-]*:").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeError {
    Empty,
    ControlChar,
    SchemeQualified,
    ProtocolRelative,
    InvalidUrl,
    BadHost,
    Traversal,
}

impl SanitizeError {
    pub fn message(&self) -> &'static str {
        match self {
            SanitizeError::Empty => "Empty request path",
            SanitizeError::ControlChar => "Request path contains control characters",
            SanitizeError::SchemeQualified => "Request path must not be scheme-qualified",
            SanitizeError::ProtocolRelative => "Request path must not be protocol-relative",
            SanitizeError::InvalidUrl => "Request path could not be parsed",
            SanitizeError::BadHost => "Request path resolved to an unexpected host",
            SanitizeError::Traversal => "Request path contains traversal sequences",
        }
    }
}

fn has_control_char_or_backslash(s: &str) -> bool {
    s.chars().any(|c| c.is_control() || c == '\\')
}

/// Parses a raw request URL against a synthetic `http://localhost/` base,
/// rejecting anything that isn't a plain same-origin path.
pub fn parse_request_url(raw: &str) -> Result<Url, SanitizeError> {
    if raw.is_empty() {
        return Err(SanitizeError::Empty);
    }
    if has_control_char_or_backslash(raw) {
        return Err(SanitizeError::ControlChar);
    }
    if SCHEME_QUALIFIED.is_match(raw) {
        return Err(SanitizeError::SchemeQualified);
    }
    if raw.starts_with("//") {
        return Err(SanitizeError::ProtocolRelative);
    }

    let base = Url::parse("http://localhost/").unwrap();
    let url = base.join(raw).map_err(|_| SanitizeError::InvalidUrl)?;

    if url.host_str() != Some("localhost") || url.port().is_some() || !url.username().is_empty() {
        return Err(SanitizeError::BadHost);
    }

    Ok(url)
}

/// Decodes `s` up to 3 times (percent-decoding) until the result stabilizes.
fn decode_to_fixed_point(s: &str) -> String {
    let mut current = s.to_string();
    for _ in 0..3 {
        let decoded = urlencoding::decode(&current)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| current.clone());
        if decoded == current {
            break;
        }
        current = decoded;
    }
    current
}

const TRAVERSAL_NEEDLES: &[&str] = &[
    "..", "\\", "//", "%2e%2e", "%2e%2f", "%2f%2e", "%5c", "%2f%2f",
];

fn contains_traversal(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    TRAVERSAL_NEEDLES.iter().any(|needle| lower.contains(needle))
}

/// Collapses repeated slashes and ensures exactly one leading slash.
fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 1);
    out.push('/');
    let mut prev_slash = true;
    for ch in s.trim_start_matches('/').chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Sanitizes a suffix appended after a fixed router prefix (e.g. everything
/// after `/radio`). Returns the cleaned suffix or a rejection.
pub fn sanitize_path_suffix(raw_suffix: &str) -> Result<String, SanitizeError> {
    if has_control_char_or_backslash(raw_suffix) {
        return Err(SanitizeError::ControlChar);
    }

    let decoded = decode_to_fixed_point(raw_suffix);
    if contains_traversal(raw_suffix) || contains_traversal(&decoded) {
        return Err(SanitizeError::Traversal);
    }

    Ok(collapse_slashes(raw_suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_request_url("").unwrap_err(), SanitizeError::Empty);
    }

    #[test]
    fn rejects_control_chars() {
        assert_eq!(
            parse_request_url("/radio/\u{0007}stations").unwrap_err(),
            SanitizeError::ControlChar
        );
    }

    #[test]
    fn rejects_scheme_qualified() {
        assert_eq!(
            parse_request_url("https://evil.example/x").unwrap_err(),
            SanitizeError::SchemeQualified
        );
    }

    #[test]
    fn rejects_protocol_relative() {
        assert_eq!(
            parse_request_url("//evil.example/x").unwrap_err(),
            SanitizeError::ProtocolRelative
        );
    }

    #[test]
    fn accepts_plain_path() {
        assert!(parse_request_url("/radio/stations?country=DE").is_ok());
    }

    #[test]
    fn rejects_dot_dot() {
        assert_eq!(
            sanitize_path_suffix("/../internal/status").unwrap_err(),
            SanitizeError::Traversal
        );
    }

    #[test]
    fn rejects_encoded_dot_dot() {
        assert_eq!(
            sanitize_path_suffix("/%2e%2e/internal/status").unwrap_err(),
            SanitizeError::Traversal
        );
        assert_eq!(
            sanitize_path_suffix("/%2e%2f").unwrap_err(),
            SanitizeError::Traversal
        );
        assert_eq!(
            sanitize_path_suffix("/%5c").unwrap_err(),
            SanitizeError::Traversal
        );
    }

    #[test]
    fn rejects_double_slash() {
        assert_eq!(
            sanitize_path_suffix("/stations//refresh").unwrap_err(),
            SanitizeError::Traversal
        );
    }

    #[test]
    fn collapses_and_prefixes_slash() {
        assert_eq!(sanitize_path_suffix("stations/abc").unwrap(), "/stations/abc");
    }

    #[test]
    fn decode_to_fixed_point_stabilizes() {
        // %2520 -> %20 -> " " (space), stable after that.
        assert_eq!(decode_to_fixed_point("%2520"), " ".to_string());
    }
}

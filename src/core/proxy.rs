//! Reverse proxy targets and request rewriting.
//!
//! One target per rule; there is no balancing, retry or health tracking. The transport
//! itself lives behind the [`HttpClient`](crate::ports::http_client::HttpClient) port.
use std::{fmt, net::IpAddr};

use http::{
    HeaderMap, HeaderName, HeaderValue, Uri,
    header::{self, InvalidHeaderValue},
};
use thiserror::Error;
use url::Url;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Errors related to proxy targets
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("'{value}' is not a valid URL: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("'{value}' must use http or https, got '{scheme}'")]
    UnsupportedScheme { value: String, scheme: String },

    #[error("'{0}' has no host")]
    MissingHost(String),

    #[error("rewritten URI '{uri}' is invalid: {source}")]
    InvalidRewrite {
        uri: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("invalid forwarding header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// A validated backend URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    url: Url,
}

impl ProxyTarget {
    /// Parse and validate a backend URL: absolute, http(s), with a host.
    pub fn parse(value: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(value.trim()).map_err(|source| ProxyError::InvalidUrl {
            value: value.to_string(),
            source,
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ProxyError::UnsupportedScheme {
                value: value.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ProxyError::MissingHost(value.to_string()));
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host[:port]` of the backend, the port only when explicit
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Point a request at the backend: scheme and authority come from the target, the
    /// target's path is joined with `path`, and both query strings are kept.
    pub fn rewrite_uri(&self, path: &str, query: Option<&str>) -> Result<Uri, ProxyError> {
        let joined_path = join_paths(self.url.path(), path);
        let query = match (self.url.query(), query) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{a}&{b}")),
            (Some(a), _) if !a.is_empty() => Some(a.to_string()),
            (_, Some(b)) if !b.is_empty() => Some(b.to_string()),
            _ => None,
        };

        let uri = match query {
            Some(q) => format!(
                "{}://{}{}?{}",
                self.url.scheme(),
                self.authority(),
                joined_path,
                q
            ),
            None => format!(
                "{}://{}{}",
                self.url.scheme(),
                self.authority(),
                joined_path
            ),
        };

        uri.parse::<Uri>()
            .map_err(|source| ProxyError::InvalidRewrite { uri, source })
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Join two path pieces with exactly one slash between them.
pub fn join_paths(base: &str, path: &str) -> String {
    let base_slash = base.ends_with('/');
    let path_slash = path.starts_with('/');
    match (base_slash, path_slash) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Record the original client, host and scheme for the backend.
///
/// The client address is appended to an existing `X-Forwarded-For` chain.
pub fn append_forwarded_headers(
    headers: &mut HeaderMap,
    client_ip: Option<IpAddr>,
    original_host: Option<&str>,
    scheme: &str,
) -> Result<(), ProxyError> {
    if let Some(ip) = client_ip {
        let prior: Vec<&str> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {}", prior.join(", "), ip)
        };
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&chain)?);
    }

    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, HeaderValue::from_str(host)?);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_str(scheme)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_non_urls() {
        assert!(matches!(
            ProxyTarget::parse("not a url"),
            Err(ProxyError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ProxyTarget::parse("ftp://files.example.com"),
            Err(ProxyError::UnsupportedScheme { .. })
        ));
        assert!(ProxyTarget::parse("http://backend:9000").is_ok());
    }

    #[test]
    fn test_rewrite_uri_onto_root_backend() {
        let target = ProxyTarget::parse("http://backend:9000").unwrap();
        let uri = target.rewrite_uri("/users", Some("page=2")).unwrap();

        assert_eq!(uri.to_string(), "http://backend:9000/users?page=2");
    }

    #[test]
    fn test_rewrite_uri_joins_base_path_and_queries() {
        let target = ProxyTarget::parse("https://example.com/base/?key=abc").unwrap();
        let uri = target.rewrite_uri("/items", Some("id=7")).unwrap();

        assert_eq!(uri.to_string(), "https://example.com/base/items?key=abc&id=7");
        assert_eq!(target.authority(), "example.com");
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/", "/users"), "/users");
        assert_eq!(join_paths("/api", "users"), "/api/users");
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("/api", "/users"), "/api/users");
    }

    #[test]
    fn test_strip_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop_headers(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-session").is_none());
        assert!(headers.get(header::UPGRADE).is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }

    #[test]
    fn test_forwarded_for_chain_is_appended() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        append_forwarded_headers(
            &mut headers,
            Some("192.168.1.20".parse().unwrap()),
            Some("www.example.com"),
            "http",
        )
        .unwrap();

        assert_eq!(headers["x-forwarded-for"], "10.0.0.1, 192.168.1.20");
        assert_eq!(headers["x-forwarded-host"], "www.example.com");
        assert_eq!(headers["x-forwarded-proto"], "http");
    }
}

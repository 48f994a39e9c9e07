//! Request matchers.
//!
//! A rule's `type` string is parsed into a closed [`MatcherKind`]; unknown kinds are a
//! startup error rather than a rule that silently never matches. Path-based matchers work
//! on the *remaining* percent-decoded path, i.e. the part not yet consumed by enclosing
//! path rules, and report how many bytes they consume so nested routers can continue from
//! there.
//!
//! # Design Decisions
//! - Host and domain matching are case-insensitive and ignore the port
//! - Path matching is case-sensitive and segment aware (`/api` does not match `/apix`)
//! - `match` rules are regular expressions and never consume path
use std::{fmt, str::FromStr, sync::LazyLock};

use http::{HeaderMap, Uri, header, uri::Authority};
use regex::Regex;
use thiserror::Error;

static HOSTNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("invalid hostname regex")
});

/// Errors raised while compiling a matcher
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MatcherError {
    #[error("unknown rule type '{0}' (expected path, exact, domain, port, protocol, host, match or any)")]
    UnknownKind(String),

    #[error("invalid port '{0}': must be a number between 1 and 65535")]
    InvalidPort(String),

    #[error("invalid protocol '{0}': must be 'http' or 'https'")]
    InvalidProtocol(String),

    #[error("invalid hostname '{value}': {message}")]
    InvalidHost { value: String, message: String },

    #[error("invalid pattern '{value}': {source}")]
    InvalidPattern {
        value: String,
        #[source]
        source: regex::Error,
    },

    #[error("request path '{0}' does not percent-decode to UTF-8")]
    MalformedPath(String),
}

/// The rule kinds a configuration may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    PathPrefix,
    ExactPath,
    Domain,
    Port,
    Protocol,
    Host,
    Pattern,
    Any,
}

impl MatcherKind {
    /// Name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherKind::PathPrefix => "path",
            MatcherKind::ExactPath => "exact",
            MatcherKind::Domain => "domain",
            MatcherKind::Port => "port",
            MatcherKind::Protocol => "protocol",
            MatcherKind::Host => "host",
            MatcherKind::Pattern => "match",
            MatcherKind::Any => "any",
        }
    }

    /// Whether a successful match consumes part of the request path
    pub fn consumes_path(&self) -> bool {
        matches!(self, MatcherKind::PathPrefix | MatcherKind::ExactPath)
    }
}

impl FromStr for MatcherKind {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(MatcherKind::PathPrefix),
            "exact" => Ok(MatcherKind::ExactPath),
            "domain" => Ok(MatcherKind::Domain),
            "port" => Ok(MatcherKind::Port),
            "protocol" => Ok(MatcherKind::Protocol),
            "host" => Ok(MatcherKind::Host),
            "match" => Ok(MatcherKind::Pattern),
            "any" => Ok(MatcherKind::Any),
            other => Err(MatcherError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request attributes matchers look at, extracted once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    /// Percent-decoded request path; every path matcher and strip offset works on this
    pub path: String,
    /// The path exactly as received, still percent-encoded
    pub raw_path: String,
    /// Lowercased host without port
    pub host: Option<String>,
    /// Explicit port from the authority, else the scheme default
    pub port: Option<u16>,
    /// Lowercased scheme
    pub scheme: String,
}

impl RequestView {
    /// Extract the view from a request's URI and headers.
    ///
    /// The authority comes from the URI when absolute (HTTP/2), otherwise from `Host`.
    /// Requests arrive over plain HTTP unless the URI says otherwise. Fails when the path
    /// does not decode to UTF-8.
    pub fn from_parts(uri: &Uri, headers: &HeaderMap) -> Result<Self, MatcherError> {
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();

        let authority = uri.authority().cloned().or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.parse::<Authority>().ok())
        });

        let host = authority
            .as_ref()
            .map(|a| a.host().to_ascii_lowercase())
            .filter(|h| !h.is_empty());
        let port = authority
            .as_ref()
            .and_then(|a| a.port_u16())
            .or_else(|| default_port(&scheme));

        let raw_path = match uri.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        let path = urlencoding::decode(&raw_path)
            .map_err(|_| MatcherError::MalformedPath(raw_path.clone()))?
            .into_owned();

        Ok(Self {
            path,
            raw_path,
            host,
            port,
            scheme,
        })
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// A compiled matcher.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Normalised prefix, empty for "/"
    PathPrefix(String),
    /// Normalised path, empty for "/"
    ExactPath(String),
    Domain(String),
    Host(String),
    Port(u16),
    Protocol(String),
    Pattern(Regex),
    Any,
}

impl Matcher {
    /// Build a matcher of `kind` over `value`.
    pub fn compile(kind: MatcherKind, value: &str) -> Result<Self, MatcherError> {
        match kind {
            MatcherKind::PathPrefix => Ok(Matcher::PathPrefix(normalize_path_value(value))),
            MatcherKind::ExactPath => Ok(Matcher::ExactPath(normalize_path_value(value))),
            MatcherKind::Domain => Ok(Matcher::Domain(validate_host(value)?)),
            MatcherKind::Host => Ok(Matcher::Host(validate_host(value)?)),
            MatcherKind::Port => value
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .map(Matcher::Port)
                .ok_or_else(|| MatcherError::InvalidPort(value.to_string())),
            MatcherKind::Protocol => {
                let scheme = value.trim().to_ascii_lowercase();
                if scheme == "http" || scheme == "https" {
                    Ok(Matcher::Protocol(scheme))
                } else {
                    Err(MatcherError::InvalidProtocol(value.to_string()))
                }
            }
            MatcherKind::Pattern => Regex::new(value).map(Matcher::Pattern).map_err(|source| {
                MatcherError::InvalidPattern {
                    value: value.to_string(),
                    source,
                }
            }),
            MatcherKind::Any => Ok(Matcher::Any),
        }
    }

    pub fn kind(&self) -> MatcherKind {
        match self {
            Matcher::PathPrefix(_) => MatcherKind::PathPrefix,
            Matcher::ExactPath(_) => MatcherKind::ExactPath,
            Matcher::Domain(_) => MatcherKind::Domain,
            Matcher::Host(_) => MatcherKind::Host,
            Matcher::Port(_) => MatcherKind::Port,
            Matcher::Protocol(_) => MatcherKind::Protocol,
            Matcher::Pattern(_) => MatcherKind::Pattern,
            Matcher::Any => MatcherKind::Any,
        }
    }

    /// Test the request. `remaining` is the part of the path not consumed by enclosing
    /// rules. Returns the number of bytes of `remaining` this match consumes.
    pub fn matches(&self, req: &RequestView, remaining: &str) -> Option<usize> {
        match self {
            Matcher::PathPrefix(prefix) => {
                let rest = remaining.strip_prefix(prefix.as_str())?;
                (rest.is_empty() || rest.starts_with('/')).then_some(prefix.len())
            }
            Matcher::ExactPath(path) => {
                let hit = remaining == path || (path.is_empty() && remaining == "/");
                hit.then_some(remaining.len())
            }
            Matcher::Domain(domain) => {
                let host = req.host.as_deref()?;
                let hit = host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|sub| sub.ends_with('.'));
                hit.then_some(0)
            }
            Matcher::Host(expected) => (req.host.as_deref() == Some(expected.as_str())).then_some(0),
            Matcher::Port(port) => (req.port == Some(*port)).then_some(0),
            Matcher::Protocol(scheme) => (req.scheme == *scheme).then_some(0),
            Matcher::Pattern(regex) => regex.is_match(remaining).then_some(0),
            Matcher::Any => Some(0),
        }
    }

    /// Human readable form for startup logs
    pub fn describe(&self) -> String {
        match self {
            Matcher::PathPrefix(p) | Matcher::ExactPath(p) if p.is_empty() => {
                format!("{} /", self.kind())
            }
            Matcher::PathPrefix(v)
            | Matcher::ExactPath(v)
            | Matcher::Domain(v)
            | Matcher::Host(v)
            | Matcher::Protocol(v) => format!("{} {v}", self.kind()),
            Matcher::Port(p) => format!("port {p}"),
            Matcher::Pattern(r) => format!("match {}", r.as_str()),
            Matcher::Any => "any".to_string(),
        }
    }
}

/// `api`, `/api` and `/api/` all become `/api`; `/` and `` become the empty prefix.
pub fn normalize_path_value(value: &str) -> String {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Validate host field format
fn validate_host(host: &str) -> Result<String, MatcherError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(MatcherError::InvalidHost {
            value: host.to_string(),
            message: "Host cannot be empty".to_string(),
        });
    }

    if host.contains("://") {
        return Err(MatcherError::InvalidHost {
            value: host.to_string(),
            message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
        });
    }

    if !HOSTNAME_REGEX.is_match(host) {
        return Err(MatcherError::InvalidHost {
            value: host.to_string(),
            message: "Invalid hostname format".to_string(),
        });
    }

    Ok(host.to_ascii_lowercase())
}

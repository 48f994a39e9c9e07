//! Configuration data structures for switchyard.
//!
//! These types map directly onto the JSON routing document. Every field is kept as the raw
//! string the operator wrote; turning `type` and `action` into closed enums happens when the
//! tree is compiled (see [`crate::core::router`]), so that unknown values are reported with
//! their position in the tree instead of a bare serde message.
use serde::{Deserialize, Serialize};

/// One node of the routing tree.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RouteRule {
    /// Matcher kind: path, exact, domain, port, protocol, host, match or any
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Value the matcher is built over
    #[serde(rename = "match", default)]
    pub match_value: String,
    /// Strip the matched path prefix before handing the request on
    #[serde(rename = "stripprefix", default)]
    pub strip_prefix: bool,
    /// fileserver, reverseproxy or subrouter
    #[serde(default)]
    pub action: String,
    /// Filesystem root for fileserver, backend URL for reverseproxy
    #[serde(default)]
    pub value: String,
    /// Nested rules, only meaningful for subrouter
    #[serde(rename = "router", default)]
    pub children: Vec<RouteRule>,
}

impl RouteRule {
    /// A rule serving files from `root`.
    pub fn fileserver(
        kind: impl Into<String>,
        match_value: impl Into<String>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            match_value: match_value.into(),
            action: "fileserver".to_string(),
            value: root.into(),
            ..Self::default()
        }
    }

    /// A rule forwarding to `backend`.
    pub fn reverse_proxy(
        kind: impl Into<String>,
        match_value: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            match_value: match_value.into(),
            action: "reverseproxy".to_string(),
            value: backend.into(),
            ..Self::default()
        }
    }

    /// A rule delegating to a nested rule list.
    pub fn subrouter(
        kind: impl Into<String>,
        match_value: impl Into<String>,
        children: Vec<RouteRule>,
    ) -> Self {
        Self {
            kind: kind.into(),
            match_value: match_value.into(),
            action: "subrouter".to_string(),
            children,
            ..Self::default()
        }
    }

    /// Enable prefix stripping on this rule.
    pub fn stripping_prefix(mut self) -> Self {
        self.strip_prefix = true;
        self
    }
}

/// Binds a file extension to an interpreter program looked up on `PATH`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CgiBindingConfig {
    /// Extension without the leading dot (a leading dot is tolerated)
    pub ext: String,
    /// Program name or path, e.g. `php-cgi`
    pub program: String,
}

/// The whole routing document after loading.
///
/// Both accepted shapes end up here: a bare rule list leaves `cgi` empty, the wrapped form
/// `{"cgi": [...], "router": [...]}` fills both.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RoutingConfig {
    #[serde(default)]
    pub cgi: Vec<CgiBindingConfig>,
    #[serde(default)]
    pub router: Vec<RouteRule>,
}

impl RoutingConfig {
    /// Create a new routing configuration builder
    pub fn builder() -> RoutingConfigBuilder {
        RoutingConfigBuilder::default()
    }

    /// Total number of rules in the tree, nested ones included.
    pub fn rule_count(&self) -> usize {
        fn count(rules: &[RouteRule]) -> usize {
            rules.iter().map(|r| 1 + count(&r.children)).sum()
        }
        count(&self.router)
    }
}

/// Builder for RoutingConfig to allow for cleaner configuration creation
#[derive(Debug, Default)]
pub struct RoutingConfigBuilder {
    cgi: Vec<CgiBindingConfig>,
    router: Vec<RouteRule>,
}

impl RoutingConfigBuilder {
    /// Bind an extension to an interpreter program
    pub fn cgi(mut self, ext: impl Into<String>, program: impl Into<String>) -> Self {
        self.cgi.push(CgiBindingConfig {
            ext: ext.into(),
            program: program.into(),
        });
        self
    }

    /// Append a top-level rule
    pub fn rule(mut self, rule: RouteRule) -> Self {
        self.router.push(rule);
        self
    }

    /// Build the final RoutingConfig
    pub fn build(self) -> RoutingConfig {
        RoutingConfig {
            cgi: self.cgi,
            router: self.router,
        }
    }
}

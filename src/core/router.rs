//! Rule tree compilation and dispatch.
//!
//! [`RouterBuilder::build`] walks the configuration tree once at startup. For each rule it
//! compiles a matcher, constructs the rule's handler (file serving, reverse proxy, or a
//! nested graph for subrouters) and appends the pair to the enclosing [`DispatchGraph`] in
//! input order. Every problem in the tree is collected and reported together; nothing is
//! deferred to request time.
//!
//! [`DispatchGraph::route`] is the per-request walk: first match wins at each level, and a
//! subrouter that matches commits to its children (no backtracking to later siblings).
//! The graph is never mutated after construction, so it is shared across request workers
//! without locking.
use std::{fmt, str::FromStr, sync::Arc};

use thiserror::Error;

use crate::{
    config::{RouteRule, RoutingConfigValidator},
    core::{
        cgi::CgiRegistry,
        matcher::{Matcher, MatcherError, MatcherKind, RequestView},
        proxy::{ProxyError, ProxyTarget},
        resolver::FileResolver,
    },
};

/// What a rule does once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    FileServer,
    ReverseProxy,
    Subrouter,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FileServer => "fileserver",
            ActionKind::ReverseProxy => "reverseproxy",
            ActionKind::Subrouter => "subrouter",
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fileserver" => Ok(ActionKind::FileServer),
            "reverseproxy" => Ok(ActionKind::ReverseProxy),
            "subrouter" => Ok(ActionKind::Subrouter),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single problem found while compiling the rule tree.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("{location}: {source}")]
    Matcher {
        location: String,
        #[source]
        source: MatcherError,
    },

    #[error(
        "{location}: unknown action '{action}' (expected fileserver, reverseproxy or subrouter)"
    )]
    UnknownAction { location: String, action: String },

    #[error("{location}: action '{action}' requires a value")]
    MissingValue {
        location: String,
        action: ActionKind,
    },

    #[error("{location}: invalid reverse proxy URL for match '{match_value}': {source}")]
    InvalidProxyUrl {
        location: String,
        match_value: String,
        #[source]
        source: ProxyError,
    },

    #[error(
        "{location}: nested rules are only allowed on subrouter actions ({count} found under '{action}')"
    )]
    UnexpectedChildren {
        location: String,
        action: ActionKind,
        count: usize,
    },
}

/// Every problem found in one compilation pass.
#[derive(Error, Debug)]
#[error("{}", RoutingConfigValidator::format_multiple_errors(.0.iter().collect::<Vec<_>>()))]
pub struct BuildErrors(pub Vec<BuildError>);

impl BuildErrors {
    pub fn errors(&self) -> &[BuildError] {
        &self.0
    }
}

/// The handler attached to a compiled rule.
#[derive(Debug, Clone)]
pub enum Handler {
    FileServer(FileResolver),
    ReverseProxy(ProxyTarget),
    Subrouter(DispatchGraph),
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct DispatchNode {
    matcher: Matcher,
    strip_prefix: bool,
    handler: Handler,
    location: String,
}

impl DispatchNode {
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn strip_prefix(&self) -> bool {
        self.strip_prefix
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Position of the source rule, e.g. `router[1].router[0]`
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// A terminal handler reached by walking the graph.
#[derive(Debug, Clone, Copy)]
pub enum Leaf<'a> {
    FileServer(&'a FileResolver),
    ReverseProxy(&'a ProxyTarget),
}

/// Result of routing one request.
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    pub leaf: Leaf<'a>,
    /// Location of the rule that owns the leaf
    pub location: &'a str,
    /// Byte offset into the decoded request path where the handler's path starts
    strip_to: Option<usize>,
}

impl RouteMatch<'_> {
    /// The decoded path the leaf handler sees: the request path with the consumed prefix
    /// removed when the rule strips, otherwise unchanged. Always starts with `/`.
    pub fn handler_path(&self, req: &RequestView) -> String {
        match self.strip_to {
            Some(offset) => rooted(req.path.get(offset..).unwrap_or("")),
            None => rooted(&req.path),
        }
    }

    /// The same path in wire form, for forwarding.
    ///
    /// The original encoding is kept whenever the raw path starts with the decoded prefix
    /// that was consumed; otherwise the stripped remainder is re-encoded segment by segment.
    pub fn forward_path(&self, req: &RequestView) -> String {
        let Some(offset) = self.strip_to else {
            return rooted(&req.raw_path);
        };
        let consumed = req.path.get(..offset).unwrap_or("");
        match req.raw_path.strip_prefix(consumed) {
            Some(rest) => rooted(rest),
            None => rooted(&encode_path(req.path.get(offset..).unwrap_or(""))),
        }
    }
}

fn rooted(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// The compiled, immutable routing tree.
#[derive(Debug, Clone, Default)]
pub struct DispatchGraph {
    nodes: Vec<DispatchNode>,
}

impl DispatchGraph {
    pub fn nodes(&self) -> &[DispatchNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the leaf handler for a request.
    pub fn route(&self, req: &RequestView) -> Option<RouteMatch<'_>> {
        self.walk(req, 0)
    }

    fn walk<'a>(&'a self, req: &RequestView, consumed: usize) -> Option<RouteMatch<'a>> {
        let remaining = req.path.get(consumed..).unwrap_or("");

        let (node, used) = self
            .nodes
            .iter()
            .find_map(|node| node.matcher.matches(req, remaining).map(|n| (node, n)))?;
        let consumed = consumed + used;

        let leaf = match &node.handler {
            Handler::Subrouter(graph) => return graph.walk(req, consumed),
            Handler::FileServer(resolver) => Leaf::FileServer(resolver),
            Handler::ReverseProxy(target) => Leaf::ReverseProxy(target),
        };

        Some(RouteMatch {
            leaf,
            location: &node.location,
            strip_to: node.strip_prefix.then_some(consumed),
        })
    }

    /// One line per rule, indented by depth, for startup logs and `--check`.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.describe_into(0, &mut lines);
        lines
    }

    fn describe_into(&self, depth: usize, lines: &mut Vec<String>) {
        for node in &self.nodes {
            let indent = "  ".repeat(depth);
            let strip = if node.strip_prefix { " (strip prefix)" } else { "" };
            match &node.handler {
                Handler::FileServer(resolver) => lines.push(format!(
                    "{indent}{} -> fileserver {}{strip}",
                    node.matcher.describe(),
                    resolver.root().display()
                )),
                Handler::ReverseProxy(target) => lines.push(format!(
                    "{indent}{} -> reverseproxy {target}{strip}",
                    node.matcher.describe()
                )),
                Handler::Subrouter(graph) => {
                    lines.push(format!(
                        "{indent}{} -> subrouter ({} rules)",
                        node.matcher.describe(),
                        graph.len()
                    ));
                    graph.describe_into(depth + 1, lines);
                }
            }
        }
    }
}

/// Compiles rule trees against a fixed CGI registry.
#[derive(Debug, Clone)]
pub struct RouterBuilder {
    registry: Arc<CgiRegistry>,
}

impl RouterBuilder {
    pub fn new(registry: Arc<CgiRegistry>) -> Self {
        Self { registry }
    }

    /// Compile `rules` into a dispatch graph, or report every error in the tree.
    pub fn build(&self, rules: &[RouteRule]) -> Result<DispatchGraph, BuildErrors> {
        let mut errors = Vec::new();
        let graph = self.build_level(rules, "router", &mut errors);

        if errors.is_empty() {
            tracing::debug!("Compiled {} top-level rules", graph.len());
            Ok(graph)
        } else {
            Err(BuildErrors(errors))
        }
    }

    fn build_level(
        &self,
        rules: &[RouteRule],
        location: &str,
        errors: &mut Vec<BuildError>,
    ) -> DispatchGraph {
        let nodes = rules
            .iter()
            .enumerate()
            .filter_map(|(i, rule)| self.build_node(rule, format!("{location}[{i}]"), errors))
            .collect();
        DispatchGraph { nodes }
    }

    fn build_node(
        &self,
        rule: &RouteRule,
        location: String,
        errors: &mut Vec<BuildError>,
    ) -> Option<DispatchNode> {
        let matcher = match MatcherKind::from_str(&rule.kind)
            .and_then(|kind| Matcher::compile(kind, &rule.match_value))
        {
            Ok(matcher) => Some(matcher),
            Err(source) => {
                errors.push(BuildError::Matcher {
                    location: location.clone(),
                    source,
                });
                None
            }
        };

        let action = match ActionKind::from_str(&rule.action) {
            Ok(action) => action,
            Err(action) => {
                errors.push(BuildError::UnknownAction { location, action });
                return None;
            }
        };

        if action != ActionKind::Subrouter && !rule.children.is_empty() {
            errors.push(BuildError::UnexpectedChildren {
                location: location.clone(),
                action,
                count: rule.children.len(),
            });
        }

        let handler = match action {
            ActionKind::FileServer => {
                if rule.value.trim().is_empty() {
                    errors.push(BuildError::MissingValue { location, action });
                    return None;
                }
                Handler::FileServer(FileResolver::new(&rule.value, self.registry.clone()))
            }
            ActionKind::ReverseProxy => {
                if rule.value.trim().is_empty() {
                    errors.push(BuildError::MissingValue { location, action });
                    return None;
                }
                match ProxyTarget::parse(&rule.value) {
                    Ok(target) => Handler::ReverseProxy(target),
                    Err(source) => {
                        tracing::error!(
                            "URL {} for match {} does not parse: {}",
                            rule.value,
                            rule.match_value,
                            source
                        );
                        errors.push(BuildError::InvalidProxyUrl {
                            location,
                            match_value: rule.match_value.clone(),
                            source,
                        });
                        return None;
                    }
                }
            }
            ActionKind::Subrouter => {
                if rule.children.is_empty() {
                    tracing::warn!("{location}: subrouter has no rules and will answer 404");
                }
                if rule.strip_prefix {
                    tracing::warn!(
                        "{location}: stripprefix has no effect on a subrouter; set it on the nested rules"
                    );
                }
                let nested = format!("{location}.router");
                Handler::Subrouter(self.build_level(&rule.children, &nested, errors))
            }
        };

        Some(DispatchNode {
            matcher: matcher?,
            strip_prefix: rule.strip_prefix,
            handler,
            location,
        })
    }
}

//! File/CGI resolution.
//!
//! Given a fileserver root and a request path, decide what answers the request:
//! 1. the path's extension is bound to an interpreter: invoke it, whether or not the file
//!    exists (a missing script is the interpreter's problem)
//! 2. the path is a regular file: serve it
//! 3. the path is a directory: serve `index.html`, else invoke the first `index.<ext>` for
//!    the bound extensions in lexicographic order, else not found
//!
//! Directory listings are never produced. Request paths are normalised before they touch
//! the filesystem; a path that would climb out of the root is rejected.
use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use crate::core::cgi::CgiRegistry;

const INDEX_HTML: &str = "index.html";

/// What the resolver decided. The variant fully determines the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    ServeFile(PathBuf),
    Invoke(CgiTarget),
    NotFound,
    /// The request path escapes the root
    Rejected,
}

/// A script to hand to its interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiTarget {
    /// Resolved script path (root + request path)
    pub script: PathBuf,
    /// Interpreter executable recorded at startup
    pub interpreter: PathBuf,
    pub extension: String,
}

/// A file-serving endpoint: one root directory plus the shared CGI registry.
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
    registry: Arc<CgiRegistry>,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<CgiRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &CgiRegistry {
        &self.registry
    }

    /// Resolve the decoded `request_path` against the root.
    pub async fn resolve(&self, request_path: &str) -> Resolution {
        let Some(relative) = normalize_request_path(request_path) else {
            tracing::warn!("Rejected request path escaping root: {}", request_path);
            return Resolution::Rejected;
        };
        let candidate = self.root.join(&relative);

        let extension = file_extension(&relative);
        if let Some(target) = self.cgi_target(&candidate, extension) {
            return Resolution::Invoke(target);
        }

        let metadata = match tokio::fs::metadata(&candidate).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Stat of {} failed: {}", candidate.display(), e);
                return Resolution::NotFound;
            }
        };

        if metadata.is_dir() {
            self.resolve_directory(&candidate).await
        } else if metadata.is_file() {
            Resolution::ServeFile(candidate)
        } else {
            Resolution::NotFound
        }
    }

    async fn resolve_directory(&self, dir: &Path) -> Resolution {
        let index = dir.join(INDEX_HTML);
        if is_non_directory(&index).await {
            return Resolution::ServeFile(index);
        }

        for binding in self.registry.bindings() {
            let index = dir.join(format!("index.{}", binding.extension()));
            if is_non_directory(&index).await {
                return Resolution::Invoke(CgiTarget {
                    script: index,
                    interpreter: binding.interpreter().to_path_buf(),
                    extension: binding.extension().to_string(),
                });
            }
        }

        Resolution::NotFound
    }

    fn cgi_target(&self, candidate: &Path, extension: &str) -> Option<CgiTarget> {
        if extension.is_empty() {
            return None;
        }
        self.registry.get(extension).map(|binding| CgiTarget {
            script: candidate.to_path_buf(),
            interpreter: binding.interpreter().to_path_buf(),
            extension: extension.to_string(),
        })
    }
}

async fn is_non_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| !m.is_dir())
        .unwrap_or(false)
}

/// Lexically normalise a decoded request path into a path relative to the root.
///
/// The path is used as is; decoding happens once, when the request is routed. Empty and
/// `.` segments are dropped and `..` removes the previous segment. Returns `None` when a
/// `..` would leave the root or when the path holds a NUL byte.
pub fn normalize_request_path(request_path: &str) -> Option<PathBuf> {
    if request_path.contains('\0') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in request_path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }

    let relative: PathBuf = segments.iter().collect();
    // A segment such as "C:" could still parse as a prefix on some platforms
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(relative)
}

/// Text after the last `.` of the final segment, empty when there is none.
pub fn file_extension(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .unwrap_or("")
}

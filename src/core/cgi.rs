//! Extension to interpreter bindings.
//!
//! The registry is built once before the dispatch graph and never changes afterwards. Every
//! file-serving handler holds an `Arc` to it, which keeps the dependency explicit and lets
//! request workers read it without synchronisation.
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::config::CgiBindingConfig;

/// Errors raised while resolving interpreters at startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CgiLookupError {
    /// The program name was not found in any `PATH` entry
    #[error("Interpreter '{program}' for extension '{extension}' was not found on PATH")]
    NotFound { extension: String, program: String },

    /// The program was given as a path but is not an executable file
    #[error("Interpreter '{path}' for extension '{extension}' is not an executable file")]
    NotExecutable { extension: String, path: String },
}

/// A resolved extension binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiBinding {
    extension: String,
    program: String,
    interpreter: PathBuf,
}

impl CgiBinding {
    pub fn new(
        extension: impl Into<String>,
        program: impl Into<String>,
        interpreter: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extension: normalize_extension(&extension.into()).to_string(),
            program: program.into(),
            interpreter: interpreter.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Program name as written in the configuration
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Executable found for the program at startup
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

/// Immutable extension -> binding map.
///
/// Ordered by extension so that directory index fallback is deterministic.
#[derive(Debug, Clone, Default)]
pub struct CgiRegistry {
    bindings: BTreeMap<String, CgiBinding>,
}

impl CgiRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve every configured program against the process `PATH`.
    pub fn from_config(entries: &[CgiBindingConfig]) -> Result<Self, CgiLookupError> {
        let search_path = std::env::var_os("PATH");
        Self::from_config_with_path(entries, search_path.as_deref())
    }

    /// Resolve every configured program against an explicit search path.
    pub fn from_config_with_path(
        entries: &[CgiBindingConfig],
        search_path: Option<&OsStr>,
    ) -> Result<Self, CgiLookupError> {
        let mut bindings = Vec::with_capacity(entries.len());
        for entry in entries {
            let extension = normalize_extension(&entry.ext);
            let interpreter = lookup_program(extension, &entry.program, search_path)?;
            tracing::info!(
                "CGI binding .{} -> {} ({})",
                extension,
                entry.program,
                interpreter.display()
            );
            bindings.push(CgiBinding::new(extension, entry.program.clone(), interpreter));
        }
        Ok(Self::from_bindings(bindings))
    }

    /// Build from already resolved bindings. A later binding for the same extension wins.
    pub fn from_bindings(bindings: impl IntoIterator<Item = CgiBinding>) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .map(|b| (b.extension.clone(), b))
                .collect(),
        }
    }

    pub fn get(&self, extension: &str) -> Option<&CgiBinding> {
        self.bindings.get(extension)
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.bindings.contains_key(extension)
    }

    /// Bindings in lexicographic extension order.
    pub fn bindings(&self) -> impl Iterator<Item = &CgiBinding> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Strip one leading dot: `.php` and `php` name the same binding.
pub fn normalize_extension(ext: &str) -> &str {
    ext.strip_prefix('.').unwrap_or(ext)
}

/// Locate `program` the way a shell would.
///
/// A name containing a separator is checked as-is; a bare name is searched in each
/// `search_path` entry in order.
pub fn lookup_program(
    extension: &str,
    program: &str,
    search_path: Option<&OsStr>,
) -> Result<PathBuf, CgiLookupError> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let candidate = PathBuf::from(program);
        return if is_executable(&candidate) {
            Ok(candidate)
        } else {
            Err(CgiLookupError::NotExecutable {
                extension: extension.to_string(),
                path: program.to_string(),
            })
        };
    }

    search_path
        .into_iter()
        .flat_map(std::env::split_paths)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                PathBuf::from(".").join(program)
            } else {
                dir.join(program)
            }
        })
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| CgiLookupError::NotFound {
            extension: extension.to_string(),
            program: program.to_string(),
        })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[cfg(unix)]
    fn make_executable(dir: &TempDir, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".php"), "php");
        assert_eq!(normalize_extension("php"), "php");
        assert_eq!(normalize_extension(""), "");
    }

    #[test]
    fn test_bindings_are_ordered_by_extension() {
        let registry = CgiRegistry::from_bindings(vec![
            CgiBinding::new("py", "python3", "/usr/bin/python3"),
            CgiBinding::new(".cgi", "sh", "/bin/sh"),
            CgiBinding::new("php", "php-cgi", "/usr/bin/php-cgi"),
        ]);

        let order: Vec<&str> = registry.bindings().map(|b| b.extension()).collect();
        assert_eq!(order, vec!["cgi", "php", "py"]);
        assert!(registry.contains("cgi"));
        assert!(!registry.contains(".cgi"));
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_searches_path_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_executable(&second, "fake-cgi");
        let expected = second.path().join("fake-cgi");

        let search =
            std::env::join_paths([first.path().to_path_buf(), second.path().to_path_buf()])
                .unwrap();

        let found = lookup_program("php", "fake-cgi", Some(search.as_os_str())).unwrap();
        assert_eq!(found, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_skips_non_executable_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("plain"), "data").unwrap();

        let result = lookup_program("txt", "plain", Some(dir.path().as_os_str()));
        assert!(matches!(result, Err(CgiLookupError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_accepts_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = make_executable(&dir, "runner");

        let found = lookup_program("run", path.to_str().unwrap(), None).unwrap();
        assert_eq!(found, path);

        let missing = dir.path().join("absent");
        let result = lookup_program("run", missing.to_str().unwrap(), None);
        assert!(matches!(result, Err(CgiLookupError::NotExecutable { .. })));
    }

    #[test]
    fn test_from_config_fails_on_unknown_program() {
        let entries = vec![CgiBindingConfig {
            ext: "php".to_string(),
            program: "definitely-not-a-real-interpreter".to_string(),
        }];
        let dir = TempDir::new().unwrap();

        let result = CgiRegistry::from_config_with_path(&entries, Some(dir.path().as_os_str()));
        assert!(result.is_err());
    }
}

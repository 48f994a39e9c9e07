#![allow(clippy::collapsible_if)]

use std::collections::HashSet;

use eyre::Result;

use crate::config::models::{CgiBindingConfig, RouteRule, RoutingConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Duplicate CGI extension '{extension}'")]
    DuplicateExtension { extension: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Document-level checks that need no compilation: CGI bindings and tree shape.
///
/// Rule kinds, actions and backend URLs are checked by the router builder, which reports
/// them with their location in the tree.
pub struct RoutingConfigValidator;

impl RoutingConfigValidator {
    /// Validate the entire routing document
    pub fn validate(config: &RoutingConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.router.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "router".to_string(),
            });
        }

        if let Err(mut cgi_errors) = Self::validate_cgi_bindings(&config.cgi) {
            errors.append(&mut cgi_errors);
        }

        Self::warn_on_missing_roots(&config.router, "router");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate the extension -> program table
    fn validate_cgi_bindings(bindings: &[CgiBindingConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (i, binding) in bindings.iter().enumerate() {
            let ext = binding.ext.trim_start_matches('.');
            if ext.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("cgi[{i}].ext"),
                    message: "Extension cannot be empty".to_string(),
                });
            } else if ext.contains('/') || ext.contains('.') {
                errors.push(ValidationError::InvalidField {
                    field: format!("cgi[{i}].ext"),
                    message: format!("Extension '{ext}' must be a single suffix such as 'php'"),
                });
            } else if !seen.insert(ext.to_string()) {
                errors.push(ValidationError::DuplicateExtension {
                    extension: ext.to_string(),
                });
            }

            if binding.program.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("cgi[{i}].program"),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// A missing fileserver root is not fatal (every request under it will 404), but it is
    /// almost always a typo worth surfacing at boot.
    fn warn_on_missing_roots(rules: &[RouteRule], location: &str) {
        for (i, rule) in rules.iter().enumerate() {
            let here = format!("{location}[{i}]");
            if rule.action == "fileserver" && !rule.value.is_empty() {
                if !std::path::Path::new(&rule.value).is_dir() {
                    tracing::warn!(
                        "{here}: fileserver root '{}' is not an existing directory",
                        rule.value
                    );
                }
            }
            Self::warn_on_missing_roots(&rule.children, &format!("{here}.router"));
        }
    }

    /// Format multiple validation errors into a single message
    pub(crate) fn format_multiple_errors<E: std::fmt::Display>(errors: Vec<E>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

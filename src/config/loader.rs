use std::path::Path;

use eyre::{Context, Result, eyre};
use serde_json::Value;

use crate::config::models::{RouteRule, RoutingConfig};

/// Load the routing document from a JSON file.
pub async fn load_config(config_path: impl AsRef<Path>) -> Result<RoutingConfig> {
    let config_path = config_path.as_ref();
    let text = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    parse_document(&text)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))
}

/// Load the routing document synchronously
pub fn load_config_sync(config_path: impl AsRef<Path>) -> Result<RoutingConfig> {
    let config_path = config_path.as_ref();
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    parse_document(&text)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))
}

/// Parse either document shape: a bare rule array, or an object holding `cgi` and `router`.
///
/// The JSON is inspected before deserializing so that a malformed rule reports the real
/// serde error rather than an opaque "did not match any variant".
pub fn parse_document(text: &str) -> Result<RoutingConfig> {
    let value: Value = serde_json::from_str(text).wrap_err("Routing document is not valid JSON")?;

    match value {
        Value::Array(_) => {
            let router: Vec<RouteRule> =
                serde_json::from_value(value).wrap_err("Invalid rule list")?;
            Ok(RoutingConfig {
                cgi: Vec::new(),
                router,
            })
        }
        Value::Object(_) => {
            serde_json::from_value(value).wrap_err("Invalid routing document object")
        }
        other => Err(eyre!(
            "Routing document must be a rule array or an object with 'cgi' and 'router', found {}",
            json_type_name(&other)
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

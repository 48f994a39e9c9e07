//! Runtime settings that sit beside the routing document.
//!
//! These cover ambient concerns only (logging and CGI resource limits). They are layered with
//! the `config` crate: built-in defaults first, then `SWITCHYARD_*` environment variables.
//! The listening address is deliberately not among them.
use config::{Config, Environment, Source};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Environment variable prefix, e.g. `SWITCHYARD_LOG_FORMAT=json`.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Output format of the log subscriber
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    pub log_format: LogFormat,
    /// Upper bound on a single CGI process run
    pub cgi_timeout_secs: u64,
    /// Maximum number of interpreter processes alive at once
    pub cgi_max_concurrency: usize,
    /// Largest request body piped to an interpreter
    pub cgi_max_body_bytes: usize,
    /// Largest response an interpreter may write to stdout
    pub cgi_max_output_bytes: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            cgi_timeout_secs: 30,
            cgi_max_concurrency: 64,
            cgi_max_body_bytes: 10 * 1024 * 1024,
            cgi_max_output_bytes: 64 * 1024 * 1024,
        }
    }
}

impl RuntimeSettings {
    /// Defaults overlaid with `SWITCHYARD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Defaults overlaid with an arbitrary `config` source.
    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(source)
            .build()
            .wrap_err("Failed to build runtime settings")?;

        let runtime: RuntimeSettings = settings
            .try_deserialize()
            .wrap_err("Failed to deserialize runtime settings")?;

        if runtime.cgi_max_concurrency == 0 {
            eyre::bail!("cgi_max_concurrency must be at least 1");
        }
        if runtime.cgi_timeout_secs == 0 {
            eyre::bail!("cgi_timeout_secs must be at least 1");
        }
        Ok(runtime)
    }
}

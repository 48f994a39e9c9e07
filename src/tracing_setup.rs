use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, RuntimeSettings};

/// Initialize tracing with custom configuration
///
/// `level` is an `EnvFilter` directive string such as `info` or `switchyard=debug,tower_http=info`.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!(
        "Logging initialized with level: {}, json: {}, spans: {}",
        level,
        json_format,
        include_spans
    );
    Ok(())
}

/// Initialize tracing from runtime settings; `RUST_LOG` takes precedence over the level
pub fn init_from_settings(settings: &RuntimeSettings) -> Result<()> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| settings.log_level.clone());
    init_tracing_with_config(&level, settings.log_format == LogFormat::Json, true)
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, client: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        client.addr = client,
        route = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
    )
}

/// Create a backend request span
pub fn create_backend_span(backend_url: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "backend_request",
        backend.url = backend_url,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}

/// Create a span around one CGI child process
pub fn create_cgi_span(interpreter: &str, script: &str) -> tracing::Span {
    tracing::info_span!(
        "cgi",
        cgi.interpreter = interpreter,
        cgi.script = script,
        cgi.status = tracing::field::Empty,
    )
}

//! Runs CGI scripts through their interpreter (RFC 3875 style).
//!
//! One child process per request: the interpreter gets the script path as its only argument,
//! the request body on stdin, and a clean environment built from the request. Its stdout is
//! parsed as a CGI response (header block, blank line, body).
use std::{collections::BTreeMap, ffi::OsString, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http::uri::Authority;
use hyper::{
    HeaderMap, Request, Response, StatusCode,
    header::{self, HeaderName, HeaderValue},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::Semaphore,
    time::timeout,
};
use tracing::Instrument;

use crate::{
    config::RuntimeSettings,
    core::resolver::CgiTarget,
    ports::cgi_executor::{CgiContext, CgiError, CgiExecutor, CgiResult},
    tracing_setup::create_cgi_span,
};

/// `PATH` handed to scripts when the server itself has none
const DEFAULT_PATH: &str = "/bin:/usr/bin:/usr/local/bin";

const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

/// Stderr beyond this is read and discarded
const MAX_STDERR_BYTES: usize = 64 * 1024;

const SERVER_SOFTWARE: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// CGI executor adapter backed by `tokio::process`.
///
/// A semaphore caps the number of live interpreter processes; requests beyond the cap wait
/// for a slot. A slot is only taken once the request body has been read. Each run is
/// bounded by a timeout and an output limit, after which the child is killed.
#[derive(Debug, Clone)]
pub struct CgiExecutorAdapter {
    timeout: Duration,
    permits: Arc<Semaphore>,
    max_body_bytes: usize,
    max_output_bytes: usize,
}

/// What a finished child left behind
struct ChildOutput {
    status: std::process::ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CgiExecutorAdapter {
    pub fn new(timeout: Duration, max_concurrency: usize, max_body_bytes: usize) -> Self {
        Self {
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            max_body_bytes,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Cap on a script's stdout; a script writing more is killed.
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.cgi_timeout_secs),
            settings.cgi_max_concurrency,
            settings.cgi_max_body_bytes,
        )
        .with_max_output_bytes(settings.cgi_max_output_bytes)
    }

    async fn run(
        &self,
        target: &CgiTarget,
        env: BTreeMap<String, OsString>,
        document_root: &std::path::Path,
        body: bytes::Bytes,
    ) -> CgiResult<ChildOutput> {
        let mut child = Command::new(&target.interpreter)
            .arg(&target.script)
            .env_clear()
            .envs(env)
            .current_dir(document_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CgiError::Spawn {
                program: target.interpreter.display().to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(
                async move {
                    // Scripts may exit without reading their input
                    if let Err(e) = stdin.write_all(&body).await {
                        tracing::debug!("CGI stdin closed early: {}", e);
                    }
                }
                .in_current_span(),
            );
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout, self.max_output_bytes),
                drain_truncated(stderr, MAX_STDERR_BYTES),
            )?;
            let status = child.wait().await?;
            Ok::<_, CgiError>(ChildOutput {
                status,
                stdout,
                stderr,
            })
        };

        // On timeout or oversized output the child is dropped, which kills it
        match timeout(self.timeout, collect).await {
            Ok(output) => output,
            Err(_) => Err(CgiError::Timeout(self.timeout.as_secs())),
        }
    }
}

#[async_trait]
impl CgiExecutor for CgiExecutorAdapter {
    async fn invoke(
        &self,
        target: &CgiTarget,
        ctx: &CgiContext,
        req: Request<AxumBody>,
    ) -> CgiResult<Response<AxumBody>> {
        let span = create_cgi_span(
            &target.interpreter.display().to_string(),
            &target.script.display().to_string(),
        );

        async {
            let (parts, body) = req.into_parts();
            let body = axum::body::to_bytes(body, self.max_body_bytes)
                .await
                .map_err(|e| CgiError::RequestBody(e.to_string()))?;

            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| CgiError::Unavailable)?;

            let env = build_environment(
                &parts,
                target,
                ctx,
                body.len(),
                std::env::var_os("PATH"),
            );
            let output = self.run(target, env, &ctx.document_root, body).await?;

            let stderr = String::from_utf8_lossy(&output.stderr);
            for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
                tracing::warn!("CGI stderr: {}", line);
            }
            if !output.status.success() {
                tracing::warn!("CGI interpreter exited with {}", output.status);
            }

            let response = parse_cgi_output(&output.stdout)?;
            tracing::Span::current().record("cgi.status", response.status().as_u16());
            Ok::<_, CgiError>(response)
        }
        .instrument(span)
        .await
    }
}

/// Read to EOF, failing once more than `limit` bytes arrive.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> CgiResult<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        reader.take(cap).read_to_end(&mut buf).await?;
    }
    if buf.len() > limit {
        return Err(CgiError::OutputTooLarge(limit));
    }
    Ok(buf)
}

/// Read to EOF, keeping only the first `limit` bytes.
async fn drain_truncated<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> CgiResult<Vec<u8>> {
    let mut kept = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(kept);
    };
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// The child's complete environment.
///
/// `inherited_path` is the server's own `PATH`; nothing else leaks from the parent.
pub fn build_environment(
    parts: &http::request::Parts,
    target: &CgiTarget,
    ctx: &CgiContext,
    content_length: usize,
    inherited_path: Option<OsString>,
) -> BTreeMap<String, OsString> {
    let mut env: BTreeMap<String, OsString> = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), OsString::from(value));
    };

    let host_header = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok());
    let header_authority = host_header.and_then(|h| h.parse::<Authority>().ok());
    let server_name = parts
        .uri
        .host()
        .or_else(|| header_authority.as_ref().map(Authority::host))
        .unwrap_or("localhost");

    set("GATEWAY_INTERFACE", "CGI/1.1".to_string());
    set("SERVER_SOFTWARE", SERVER_SOFTWARE.to_string());
    set("SERVER_PROTOCOL", format!("{:?}", parts.version));
    set("SERVER_NAME", server_name.to_string());
    set("SERVER_PORT", ctx.server_port.to_string());
    set("REQUEST_METHOD", parts.method.to_string());
    set(
        "REQUEST_URI",
        parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), |pq| pq.to_string()),
    );
    set(
        "QUERY_STRING",
        parts.uri.query().unwrap_or_default().to_string(),
    );
    set("SCRIPT_NAME", ctx.script_name.clone());
    set("PATH_INFO", String::new());
    set("REDIRECT_STATUS", "200".to_string());

    if let Some(addr) = ctx.remote_addr {
        set("REMOTE_ADDR", addr.ip().to_string());
        set("REMOTE_HOST", addr.ip().to_string());
        set("REMOTE_PORT", addr.port().to_string());
    }

    if let Some(content_type) = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        set("CONTENT_TYPE", content_type.to_string());
    }
    if content_length > 0 {
        set("CONTENT_LENGTH", content_length.to_string());
    }

    for (name, value) in header_variables(&parts.headers) {
        set(&name, value);
    }

    env.insert(
        "DOCUMENT_ROOT".to_string(),
        ctx.document_root.clone().into_os_string(),
    );
    env.insert(
        "SCRIPT_FILENAME".to_string(),
        target.script.clone().into_os_string(),
    );
    env.insert(
        "PATH".to_string(),
        inherited_path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| OsString::from(DEFAULT_PATH)),
    );
    env
}

/// `HTTP_*` variables, one per header name with repeated values joined.
fn header_variables(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for name in headers.keys() {
        let key = name.as_str().to_ascii_uppercase().replace('-', "_");
        // httpoxy: never let a client set HTTP_PROXY
        if key == "PROXY" {
            continue;
        }
        let separator = if name == header::COOKIE { "; " } else { ", " };
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(separator);
        vars.insert(format!("HTTP_{key}"), joined);
    }
    vars
}

/// Turn a script's stdout into a response.
///
/// The output must start with a header block terminated by an empty line. `Status` sets the
/// response code; `Location` without `Status` means 302; otherwise a `Content-Type` is
/// required.
pub fn parse_cgi_output(stdout: &[u8]) -> CgiResult<Response<AxumBody>> {
    let (header_block, body) = split_header_block(stdout)
        .ok_or_else(|| CgiError::MalformedOutput("no header block in output".to_string()))?;
    let header_block = std::str::from_utf8(header_block)
        .map_err(|_| CgiError::MalformedOutput("header block is not UTF-8".to_string()))?;

    let mut status: Option<StatusCode> = None;
    let mut headers = HeaderMap::new();
    for line in header_block.lines() {
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once(':') else {
            tracing::warn!("Ignoring bogus CGI header line: {:?}", line);
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        if key.eq_ignore_ascii_case("status") {
            let code = value
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| CgiError::MalformedOutput(format!("bad Status header {value:?}")))?;
            status = Some(code);
            continue;
        }

        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!("Ignoring invalid CGI header: {:?}", line),
        }
    }

    if headers.is_empty() && status.is_none() {
        return Err(CgiError::MalformedOutput(
            "no headers in output".to_string(),
        ));
    }

    let status = match status {
        Some(status) => status,
        None if headers.contains_key(header::LOCATION) => StatusCode::FOUND,
        None if headers.contains_key(header::CONTENT_TYPE) => StatusCode::OK,
        None => {
            return Err(CgiError::MalformedOutput(
                "missing required Content-Type in headers".to_string(),
            ));
        }
    };

    // The body is fully buffered; framing is recomputed
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);

    let mut response = Response::new(AxumBody::from(body.to_vec()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Split at the first empty line (`\n\n` or `\r\n\r\n`).
fn split_header_block(output: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut line_start = 0;
    while line_start < output.len() {
        let line_end = output[line_start..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|p| line_start + p)?;
        let line = &output[line_start..line_end];
        if line.is_empty() || line == b"\r" {
            return Some((&output[..line_start], &output[line_end + 1..]));
        }
        line_start = line_end + 1;
    }
    None
}

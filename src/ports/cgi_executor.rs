use std::{net::SocketAddr, path::PathBuf};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::core::resolver::CgiTarget;

/// Errors from running a CGI interpreter
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CgiError {
    /// The interpreter could not be started
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the child failed
    #[error("CGI I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The script did not finish in time
    #[error("CGI script timed out after {0} seconds")]
    Timeout(u64),

    /// The request body could not be read or was too large
    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    /// The script's output is not a valid CGI response
    #[error("Malformed CGI response: {0}")]
    MalformedOutput(String),

    /// The script wrote more than the configured output limit
    #[error("CGI output exceeded {0} bytes")]
    OutputTooLarge(usize),

    /// No execution slot became available
    #[error("CGI executor unavailable")]
    Unavailable,
}

/// Result type for CGI operations
pub type CgiResult<T> = Result<T, CgiError>;

/// Per-request facts the CGI environment needs beyond the request itself.
#[derive(Debug, Clone)]
pub struct CgiContext {
    /// Root of the fileserver that resolved the script
    pub document_root: PathBuf,
    /// Path the handler saw (after any prefix stripping)
    pub script_name: String,
    pub remote_addr: Option<SocketAddr>,
    pub server_port: u16,
}

/// CgiExecutor defines the port (interface) for running scripts through their interpreter
#[async_trait]
pub trait CgiExecutor: Send + Sync + 'static {
    /// Run `target` for `req` and translate its output into a response
    ///
    /// # Arguments
    /// * `target` - Script and interpreter chosen by the resolver
    /// * `ctx` - Server-side facts for the environment
    /// * `req` - The original request; its body becomes the script's stdin
    async fn invoke(
        &self,
        target: &CgiTarget,
        ctx: &CgiContext,
        req: Request<AxumBody>,
    ) -> CgiResult<Response<AxumBody>>;
}

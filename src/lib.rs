//! Switchyard - a declarative HTTP front end.
//!
//! An operator describes routing as a tree of JSON rules. At startup the tree is compiled,
//! once, into an immutable dispatch graph whose leaves either serve files from a directory
//! (handing selected extensions to external CGI interpreters) or forward requests to a
//! backend over a reverse proxy. Nothing in the graph changes while requests are served,
//! so the hot path takes no locks.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchyard::{CgiRegistry, RouterBuilder, config::loader::load_config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let document = load_config("routes.json").await?;
//! let registry = Arc::new(CgiRegistry::from_config(&document.cgi)?);
//! let graph = RouterBuilder::new(registry).build(&document.router)?;
//! // Hand the graph to the provided HttpHandler adapter (see the binary crate)
//! # let _ = graph;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! routing and resolution logic inside `core`:
//! * `core::router` compiles rules into a [`DispatchGraph`] and walks it per request
//! * `core::resolver` decides between a static file, a CGI invocation and a directory index
//! * `adapters` talk to the filesystem, child processes and backend servers
//!
//! # Error Handling
//! Startup problems (unreadable document, unknown rule kinds, unparseable backend URLs,
//! missing interpreters) are reported as typed errors and abort the process before the
//! listener opens. Per-request failures only ever affect their own request.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{CgiExecutorAdapter, FileSystemAdapter, HttpClientAdapter, HttpHandler},
    core::{CgiRegistry, DispatchGraph, RouterBuilder},
    ports::{cgi_executor::CgiExecutor, http_client::HttpClient},
    utils::GracefulShutdown,
};

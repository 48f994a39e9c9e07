use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Router,
    extract::{ConnectInfo, Request},
    response::IntoResponse,
};
use clap::Parser;
use color_eyre::{Result, eyre::Context};
use switchyard::{
    adapters::{CgiExecutorAdapter, FileSystemAdapter, HttpClientAdapter, HttpHandler},
    config::{RoutingConfigValidator, RuntimeSettings, load_config},
    core::{CgiRegistry, DispatchGraph, RouterBuilder},
    ports::{cgi_executor::CgiExecutor, http_client::HttpClient},
    tracing_setup,
    utils::GracefulShutdown,
};
use tower_http::trace::TraceLayer;

/// The listener is not configurable
const LISTEN_PORT: u16 = 8080;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON routing document
    config: PathBuf,

    /// Compile the routing document, print the resulting routes and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let settings = RuntimeSettings::from_env().context("Failed to load runtime settings")?;
    tracing_setup::init_from_settings(&settings).context("Failed to initialize tracing")?;

    let (registry, graph) = compile(&args.config).await?;

    if args.check {
        println!("Configuration {} is valid", args.config.display());
        println!("  CGI bindings: {}", registry.len());
        for binding in registry.bindings() {
            println!(
                "    .{} -> {}",
                binding.extension(),
                binding.interpreter().display()
            );
        }
        println!("  Routes:");
        for line in graph.describe() {
            println!("    {line}");
        }
        return Ok(());
    }

    serve(graph, &settings).await
}

/// Everything that can fail at startup, in order. Nothing here touches the network.
async fn compile(config_path: &Path) -> Result<(Arc<CgiRegistry>, DispatchGraph)> {
    tracing::info!("Loading routing document from {}", config_path.display());

    let document = load_config(config_path).await?;
    RoutingConfigValidator::validate(&document)
        .with_context(|| format!("Invalid routing document {}", config_path.display()))?;

    let registry = Arc::new(
        CgiRegistry::from_config(&document.cgi).context("Failed to resolve CGI interpreters")?,
    );

    let graph = RouterBuilder::new(registry.clone())
        .build(&document.router)
        .with_context(|| format!("Failed to compile routes from {}", config_path.display()))?;

    tracing::info!(
        "Compiled {} rules ({} top-level) with {} CGI bindings",
        document.rule_count(),
        graph.len(),
        registry.len()
    );
    for line in graph.describe() {
        tracing::info!("Route: {}", line);
    }

    Ok((registry, graph))
}

async fn serve(graph: DispatchGraph, settings: &RuntimeSettings) -> Result<()> {
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);
    let cgi_executor: Arc<dyn CgiExecutor> = Arc::new(CgiExecutorAdapter::from_settings(settings));
    let file_system = Arc::new(FileSystemAdapter::new());

    let http_handler = Arc::new(HttpHandler::new(
        Arc::new(graph),
        http_client,
        file_system,
        cgi_executor,
        LISTEN_PORT,
    ));

    let app = Router::new()
        .fallback(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = http_handler.clone();
                async move {
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => response,
                        Err(e) => e.into_response(),
                    }
                }
            },
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let mut shutdown_token = graceful_shutdown.shutdown_token();
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move { signal_handler.run_signal_handler().await });

    tracing::info!("Switchyard listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_token.wait_for_shutdown().await;
    })
    .await
    .context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

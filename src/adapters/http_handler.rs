use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    http::{StatusCode, header},
};
use hyper::{Request, Response};
use tracing::Instrument;

use crate::{
    adapters::FileSystemAdapter,
    core::{
        matcher::RequestView,
        proxy::{ProxyTarget, append_forwarded_headers, strip_hop_by_hop_headers},
        resolver::{FileResolver, Resolution},
        router::{DispatchGraph, Leaf},
    },
    ports::{
        cgi_executor::{CgiContext, CgiError, CgiExecutor},
        file_system::FileSystem,
        handler::HandlerError,
        http_client::HttpClient,
    },
    tracing_setup::create_request_span,
};

const NOT_FOUND_BODY: &str = "404 page not found\n";

/// Request entry point: walks the dispatch graph and runs the selected leaf.
#[derive(Clone)]
pub struct HttpHandler {
    graph: Arc<DispatchGraph>,
    http_client: Arc<dyn HttpClient>,
    file_system: Arc<FileSystemAdapter>,
    cgi_executor: Arc<dyn CgiExecutor>,
    server_port: u16,
}

impl HttpHandler {
    pub fn new(
        graph: Arc<DispatchGraph>,
        http_client: Arc<dyn HttpClient>,
        file_system: Arc<FileSystemAdapter>,
        cgi_executor: Arc<dyn CgiExecutor>,
        server_port: u16,
    ) -> Self {
        Self {
            graph,
            http_client,
            file_system,
            cgi_executor,
            server_port,
        }
    }

    /// Main request handler
    ///
    /// Unmatched requests get a plain 404. Failures inside a leaf come back as a
    /// [`HandlerError`] carrying the status the client should see.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, HandlerError> {
        let client = client_addr.map_or_else(|| "-".to_string(), |a| a.to_string());
        let span = create_request_span(req.method().as_str(), req.uri().path(), &client);
        let view = RequestView::from_parts(req.uri(), req.headers());

        async {
            let result = match view {
                Ok(view) => self.dispatch(req, client_addr, &view).await,
                Err(e) => Err(HandlerError::BadRequest(e.to_string())),
            };
            let status = match &result {
                Ok(response) => response.status(),
                Err(e) => e.status_code(),
            };
            tracing::Span::current().record("http.status_code", status.as_u16());
            if let Err(e) = &result {
                tracing::warn!("Request failed: {}", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
        view: &RequestView,
    ) -> Result<Response<AxumBody>, HandlerError> {
        let Some(route) = self.graph.route(view) else {
            tracing::debug!("No rule matched {}", view.path);
            return not_found();
        };
        tracing::Span::current().record("route", route.location);

        match route.leaf {
            Leaf::FileServer(resolver) => {
                self.serve_from_root(resolver, route.handler_path(view), req, client_addr)
                    .await
            }
            Leaf::ReverseProxy(target) => {
                self.forward(target, &route.forward_path(view), req, client_addr, view)
                    .await
            }
        }
    }

    /// Resolve against a fileserver root, then send the file or run the script
    async fn serve_from_root(
        &self,
        resolver: &FileResolver,
        handler_path: String,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, HandlerError> {
        match resolver.resolve(&handler_path).await {
            Resolution::ServeFile(path) => {
                tracing::debug!("Serving file {}", path.display());
                self.file_system
                    .serve_file(&path, req)
                    .await
                    .map_err(|e| HandlerError::InternalError(e.to_string()))
            }
            Resolution::Invoke(target) => {
                tracing::debug!(
                    "Invoking {} for {}",
                    target.interpreter.display(),
                    target.script.display()
                );
                let ctx = CgiContext {
                    document_root: resolver.root().to_path_buf(),
                    script_name: handler_path,
                    remote_addr: client_addr,
                    server_port: self.server_port,
                };
                self.cgi_executor
                    .invoke(&target, &ctx, req)
                    .await
                    .map_err(cgi_error_to_handler_error)
            }
            Resolution::NotFound => not_found(),
            Resolution::Rejected => Err(HandlerError::BadRequest(format!(
                "path {handler_path} escapes the fileserver root"
            ))),
        }
    }

    /// Proxy the request to the rule's backend
    async fn forward(
        &self,
        target: &ProxyTarget,
        forward_path: &str,
        mut req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
        view: &RequestView,
    ) -> Result<Response<AxumBody>, HandlerError> {
        let backend_uri = target
            .rewrite_uri(forward_path, req.uri().query())
            .map_err(|e| HandlerError::InternalError(e.to_string()))?;

        let original_host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()));

        let headers = req.headers_mut();
        strip_hop_by_hop_headers(headers);
        append_forwarded_headers(
            headers,
            client_addr.map(|a| a.ip()),
            original_host.as_deref(),
            &view.scheme,
        )
        .map_err(|e| HandlerError::BadRequest(e.to_string()))?;

        tracing::debug!("Forwarding {} to {}", view.path, backend_uri);
        *req.uri_mut() = backend_uri;

        let mut response = self
            .http_client
            .send_request(req)
            .await
            .map_err(|e| HandlerError::BadGateway(e.to_string()))?;
        strip_hop_by_hop_headers(response.headers_mut());
        Ok(response)
    }
}

fn not_found() -> Result<Response<AxumBody>, HandlerError> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(AxumBody::from(NOT_FOUND_BODY))
        .map_err(|e| HandlerError::InternalError(e.to_string()))
}

fn cgi_error_to_handler_error(err: CgiError) -> HandlerError {
    match err {
        CgiError::Timeout(_) => HandlerError::GatewayTimeout(err.to_string()),
        CgiError::RequestBody(_) => HandlerError::PayloadTooLarge(err.to_string()),
        other => HandlerError::InternalError(other.to_string()),
    }
}

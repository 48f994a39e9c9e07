// End-to-end routing through HttpHandler with in-memory backends
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::body::Body;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Request, Response, StatusCode, Uri};
use switchyard::{
    FileSystemAdapter, HttpHandler, RouterBuilder,
    config::RouteRule,
    core::{CgiRegistry, cgi::CgiBinding, resolver::CgiTarget},
    ports::{
        cgi_executor::{CgiContext, CgiExecutor, CgiResult},
        http_client::{HttpClient, HttpClientError, HttpClientResult},
    },
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingClient {
    seen: Mutex<Vec<(Uri, HeaderMap)>>,
    refuse: bool,
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
        if self.refuse {
            return Err(HttpClientError::ConnectionError(
                "connection refused".to_string(),
            ));
        }
        self.seen
            .lock()
            .unwrap()
            .push((req.uri().clone(), req.headers().clone()));
        Ok(Response::new(Body::from("from backend")))
    }
}

#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<(CgiTarget, CgiContext)>>,
}

#[async_trait]
impl CgiExecutor for RecordingExecutor {
    async fn invoke(
        &self,
        target: &CgiTarget,
        ctx: &CgiContext,
        _req: Request<Body>,
    ) -> CgiResult<Response<Body>> {
        self.seen
            .lock()
            .unwrap()
            .push((target.clone(), ctx.clone()));
        Ok(Response::new(Body::from("from script")))
    }
}

struct Harness {
    handler: HttpHandler,
    client: Arc<RecordingClient>,
    executor: Arc<RecordingExecutor>,
}

fn harness(rules: Vec<RouteRule>, registry: CgiRegistry) -> Harness {
    harness_with_client(rules, registry, RecordingClient::default())
}

fn harness_with_client(
    rules: Vec<RouteRule>,
    registry: CgiRegistry,
    client: RecordingClient,
) -> Harness {
    let graph = RouterBuilder::new(Arc::new(registry))
        .build(&rules)
        .expect("rules should compile");
    let client = Arc::new(client);
    let executor = Arc::new(RecordingExecutor::default());
    let handler = HttpHandler::new(
        Arc::new(graph),
        client.clone(),
        Arc::new(FileSystemAdapter::new()),
        executor.clone(),
        8080,
    );
    Harness {
        handler,
        client,
        executor,
    }
}

fn php_registry() -> CgiRegistry {
    CgiRegistry::from_bindings(vec![CgiBinding::new(
        "php",
        "php-cgi",
        "/usr/bin/php-cgi",
    )])
}

fn get(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Host", host)
        .body(Body::empty())
        .unwrap()
}

fn client_addr() -> Option<SocketAddr> {
    Some("127.0.0.1:41000".parse().unwrap())
}

fn root_str(dir: &TempDir) -> String {
    dir.path().to_str().unwrap().to_string()
}

async fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    tokio::fs::create_dir_all(path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(path, content).await.unwrap();
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn root_fileserver_serves_index_html() {
    let www = TempDir::new().unwrap();
    write(www.path(), "index.html", "<h1>welcome</h1>").await;
    let h = harness(
        vec![RouteRule::fileserver("path", "/", &root_str(&www))],
        CgiRegistry::empty(),
    );

    let response = h
        .handler
        .handle_request(get("/", "localhost:8080"), client_addr())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<h1>welcome</h1>");
}

#[tokio::test]
async fn php_request_goes_to_the_bound_interpreter() {
    let www = TempDir::new().unwrap();
    let h = harness(
        vec![RouteRule::fileserver("path", "/", &root_str(&www))],
        php_registry(),
    );

    let response = h
        .handler
        .handle_request(get("/foo.php", "localhost:8080"), client_addr())
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "from script");

    let seen = h.executor.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (target, ctx) = &seen[0];
    assert_eq!(target.script, www.path().join("foo.php"));
    assert_eq!(target.interpreter, PathBuf::from("/usr/bin/php-cgi"));
    assert_eq!(ctx.document_root, www.path());
    assert_eq!(ctx.script_name, "/foo.php");
    assert_eq!(ctx.server_port, 8080);
}

#[tokio::test]
async fn stripped_proxy_rule_forwards_remaining_path() {
    let h = harness(
        vec![RouteRule::reverse_proxy("path", "api", "http://backend:9000").stripping_prefix()],
        CgiRegistry::empty(),
    );

    let mut req = get("/api/users?page=2", "www.example.com");
    req.headers_mut()
        .insert("Connection", "keep-alive".parse().unwrap());
    let response = h.handler.handle_request(req, client_addr()).await.unwrap();
    assert_eq!(body_text(response).await, "from backend");

    let seen = h.client.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (uri, headers) = &seen[0];
    assert_eq!(uri.to_string(), "http://backend:9000/users?page=2");
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-host"], "www.example.com");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert!(headers.get("connection").is_none());
}

#[tokio::test]
async fn unstripped_proxy_rule_keeps_full_path() {
    let h = harness(
        vec![RouteRule::reverse_proxy("path", "api", "http://backend:9000/base")],
        CgiRegistry::empty(),
    );

    h.handler
        .handle_request(get("/api/users", "www.example.com"), client_addr())
        .await
        .unwrap();

    let seen = h.client.seen.lock().unwrap();
    assert_eq!(seen[0].0.to_string(), "http://backend:9000/base/api/users");
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    let h = harness_with_client(
        vec![RouteRule::reverse_proxy("any", "", "http://backend:9000")],
        CgiRegistry::empty(),
        RecordingClient {
            refuse: true,
            ..RecordingClient::default()
        },
    );

    let err = h
        .handler
        .handle_request(get("/anything", "www.example.com"), client_addr())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn encoded_path_cannot_bypass_an_earlier_rule() {
    let www = TempDir::new().unwrap();
    write(www.path(), "admin/secret", "on disk").await;
    let h = harness(
        vec![
            RouteRule::reverse_proxy("path", "admin", "http://backend:9000").stripping_prefix(),
            RouteRule::fileserver("path", "/", &root_str(&www)),
        ],
        CgiRegistry::empty(),
    );

    let response = h
        .handler
        .handle_request(get("/%61dmin/secret", "localhost"), client_addr())
        .await
        .unwrap();

    assert_eq!(body_text(response).await, "from backend");
    let seen = h.client.seen.lock().unwrap();
    assert_eq!(seen[0].0.to_string(), "http://backend:9000/secret");
}

#[tokio::test]
async fn encoded_file_names_are_decoded_once() {
    let www = TempDir::new().unwrap();
    write(www.path(), "hello world.txt", "spaced").await;
    write(www.path(), "100%.txt", "percent").await;
    let h = harness(
        vec![RouteRule::fileserver("path", "/", &root_str(&www))],
        CgiRegistry::empty(),
    );

    for (uri, expected) in [("/hello%20world.txt", "spaced"), ("/100%25.txt", "percent")] {
        let response = h
            .handler
            .handle_request(get(uri, "localhost"), client_addr())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "uri {uri}");
        assert_eq!(body_text(response).await, expected, "uri {uri}");
    }

    let err = h
        .handler
        .handle_request(get("/%ff", "localhost"), client_addr())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn static_files_answer_any_method() {
    let www = TempDir::new().unwrap();
    write(www.path(), "index.html", "<h1>welcome</h1>").await;
    let h = harness(
        vec![RouteRule::fileserver("path", "/", &root_str(&www))],
        CgiRegistry::empty(),
    );

    for method in ["POST", "PUT", "DELETE"] {
        let req = Request::builder()
            .method(method)
            .uri("/")
            .header("Host", "localhost")
            .body(Body::from("ignored"))
            .unwrap();
        let response = h.handler.handle_request(req, client_addr()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "method {method}");
        assert_eq!(body_text(response).await, "<h1>welcome</h1>");
    }
}

#[tokio::test]
async fn directory_without_index_is_not_found() {
    let www = TempDir::new().unwrap();
    write(www.path(), "somedir/notes.txt", "private").await;
    write(www.path(), "somedir/index.txt", "not an index").await;
    let h = harness(
        vec![RouteRule::fileserver("path", "/", &root_str(&www))],
        php_registry(),
    );

    let response = h
        .handler
        .handle_request(get("/somedir/", "localhost"), client_addr())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_text(response).await;
    assert_eq!(body, "404 page not found\n");
    assert!(!body.contains("notes.txt"));
}

#[tokio::test]
async fn index_html_is_preferred_over_script_index() {
    let www = TempDir::new().unwrap();
    write(www.path(), "app/index.html", "static index").await;
    write(www.path(), "app/index.php", "<?php echo 1;").await;
    let h = harness(
        vec![RouteRule::fileserver("path", "/", &root_str(&www))],
        php_registry(),
    );

    let response = h
        .handler
        .handle_request(get("/app/", "localhost"), client_addr())
        .await
        .unwrap();

    assert_eq!(body_text(response).await, "static index");
    assert!(h.executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn nested_subrouter_resolves_in_inner_root() {
    let outer = TempDir::new().unwrap();
    let inner = TempDir::new().unwrap();
    write(inner.path(), "api/v1/readme.txt", "inner readme").await;
    let h = harness(
        vec![
            RouteRule::subrouter(
                "path",
                "api",
                vec![RouteRule::fileserver("path", "/v1", &root_str(&inner))],
            ),
            RouteRule::fileserver("path", "/", &root_str(&outer)),
        ],
        CgiRegistry::empty(),
    );

    let response = h
        .handler
        .handle_request(get("/api/v1/readme.txt", "localhost"), client_addr())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "inner readme");

    // Matched subrouter with no matching child does not fall through to "/"
    let response = h
        .handler
        .handle_request(get("/api/v2/readme.txt", "localhost"), client_addr())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn host_rules_select_between_sites() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "index.html", "site a").await;
    write(b.path(), "index.html", "site b").await;
    let h = harness(
        vec![
            RouteRule::fileserver("host", "a.example.com", &root_str(&a)),
            RouteRule::fileserver("domain", "example.com", &root_str(&b)),
        ],
        CgiRegistry::empty(),
    );

    for (host, expected) in [
        ("a.example.com", "site a"),
        ("A.Example.com:8080", "site a"),
        ("b.example.com", "site b"),
        ("example.com", "site b"),
    ] {
        let response = h
            .handler
            .handle_request(get("/", host), client_addr())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, expected, "host {host}");
    }

    let response = h
        .handler
        .handle_request(get("/", "other.org"), client_addr())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn traversal_outside_root_is_rejected() {
    let parent = TempDir::new().unwrap();
    write(parent.path(), "secret.txt", "top secret").await;
    write(parent.path(), "www/index.html", "public").await;
    let root = parent.path().join("www");
    let h = harness(
        vec![RouteRule::fileserver("path", "/", root.to_str().unwrap())],
        CgiRegistry::empty(),
    );

    for uri in ["/../secret.txt", "/%2e%2e/secret.txt", "/a/..%2f..%2fsecret.txt"] {
        let err = h
            .handler
            .handle_request(get(uri, "localhost"), client_addr())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "uri {uri}");
    }
}

#[tokio::test]
async fn compiling_twice_dispatches_identically() {
    let www = TempDir::new().unwrap();
    write(www.path(), "robots.txt", "User-agent: *").await;
    let rules = vec![
        RouteRule::fileserver("exact", "/robots.txt", &root_str(&www)),
        RouteRule::reverse_proxy("path", "api", "http://backend:9000").stripping_prefix(),
        RouteRule::fileserver("path", "/", &root_str(&www)),
    ];
    let first = harness(rules.clone(), CgiRegistry::empty());
    let second = harness(rules, CgiRegistry::empty());

    for uri in ["/robots.txt", "/api/users", "/missing.html"] {
        let a = first
            .handler
            .handle_request(get(uri, "localhost"), client_addr())
            .await
            .unwrap();
        let b = second
            .handler
            .handle_request(get(uri, "localhost"), client_addr())
            .await
            .unwrap();
        assert_eq!(a.status(), b.status(), "uri {uri}");
        assert_eq!(body_text(a).await, body_text(b).await, "uri {uri}");
    }
    assert_eq!(
        first.client.seen.lock().unwrap()[0].0,
        second.client.seen.lock().unwrap()[0].0
    );
}

use std::path::Path;

use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr};
use http_body_util::BodyExt;
use hyper::{Method, Request, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::ports::file_system::{FileSystem, FileSystemError};

/// File system adapter using tower-http ServeFile for static file serving
///
/// Path resolution (index fallback, traversal checks, CGI dispatch) happens before this
/// adapter is reached; it only streams one already-located file, with content type, range
/// and conditional request handling from tower-http.
///
/// A located file answers every method: anything other than `HEAD` is served as a `GET`
/// and its request body is dropped.
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(
        &self,
        path: &Path,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, FileSystemError> {
        if !path.is_absolute() {
            return Err(FileSystemError::InvalidPath(path.display().to_string()));
        }

        let (mut parts, _body) = req.into_parts();
        if parts.method != Method::HEAD {
            parts.method = Method::GET;
        }

        let response = ServeFile::new(path)
            .oneshot(Request::from_parts(parts, AxumBody::empty()))
            .await
            .wrap_err("ServeFile failed to serve file")
            .map_err(|e| {
                FileSystemError::IoError(std::io::Error::other(format!("ServeFile error: {e}")))
            })?;

        let (parts, tower_body) = response.into_parts();
        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));

        Ok(Response::from_parts(parts, axum_body))
    }
}

#[cfg(test)]
mod tests {
    use hyper::{StatusCode, header};
    use tempfile::TempDir;

    use super::*;

    async fn create_test_file(dir: &TempDir, path: &str, content: &str) -> std::io::Result<()> {
        let full_path = dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full_path, content).await
    }

    #[tokio::test]
    async fn test_serve_file_streams_content() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "docs/readme.txt", "Hello, world!")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new();

        let req = Request::builder()
            .uri("/docs/readme.txt")
            .body(AxumBody::empty())
            .unwrap();
        let response = fs
            .serve_file(&temp_dir.path().join("docs/readme.txt"), req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Hello, world!");
    }

    #[tokio::test]
    async fn test_serve_file_ignores_request_path() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "index.html", "<h1>home</h1>")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new();

        // Directory requests are answered with the index the resolver picked
        let req = Request::builder()
            .uri("/")
            .body(AxumBody::empty())
            .unwrap();
        let response = fs
            .serve_file(&temp_dir.path().join("index.html"), req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_non_get_methods_are_served_as_get() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "index.html", "<h1>home</h1>")
            .await
            .unwrap();
        let fs = FileSystemAdapter::new();
        let path = temp_dir.path().join("index.html");

        for method in [Method::POST, Method::PUT, Method::PATCH] {
            let req = Request::builder()
                .method(method.clone())
                .uri("/")
                .body(AxumBody::from("form=1"))
                .unwrap();
            let response = fs.serve_file(&path, req).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK, "method {method}");
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"<h1>home</h1>");
        }

        let req = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .body(AxumBody::empty())
            .unwrap();
        let response = fs.serve_file(&path, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_relative_path_is_invalid() {
        let fs = FileSystemAdapter::new();
        let req = Request::builder().body(AxumBody::empty()).unwrap();

        let result = fs.serve_file(Path::new("relative.txt"), req).await;
        assert!(matches!(result, Err(FileSystemError::InvalidPath(_))));
    }
}

use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response},
};
use hyper::{StatusCode, header};
use thiserror::Error;

/// Error type for HTTP handler operations
///
/// Each variant maps to the status the client receives; the message is logged, never sent.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("Internal server error: {0}")]
    InternalError(String),
    #[error("Bad gateway: {0}")]
    BadGateway(String),
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl HandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HandlerError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HandlerError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandlerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!(
            "{} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        let mut response = Response::new(AxumBody::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when connecting or waiting for the response head takes too long
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other failure while talking to the backend
    #[error("Backend error, url: {url}: {reason}")]
    BackendError {
        /// The URL that was requested
        url: String,
        reason: String,
    },
}

impl HttpClientError {
    /// Status returned to the client when a request fails with this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpClientError::ConnectionError(_) | HttpClientError::Timeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            HttpClientError::InvalidRequest(_) | HttpClientError::BackendError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// # Arguments
    /// * `req` - The HTTP request to send, with an absolute URI
    ///
    /// # Returns
    /// The backend's response head with a streaming body, or an error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}

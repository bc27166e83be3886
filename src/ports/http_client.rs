use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::config::ProxyTlsConfig;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connection to the backend failed or the response was malformed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No response head arrived in time
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// The outbound request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The transport security context could not be set up
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// # Arguments
    /// * `req` - The fully built outbound request (absolute URI)
    /// * `timeout` - Upper bound for connecting and receiving the response head
    ///
    /// # Returns
    /// The backend's response with a streaming body, or an error
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;
}

/// Hands out clients for proxy targets, one per distinct TLS context.
pub trait HttpClientProvider: Send + Sync {
    fn client_for(&self, tls: Option<&ProxyTlsConfig>) -> HttpClientResult<Arc<dyn HttpClient>>;
}

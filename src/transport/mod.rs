//! Pooled HTTP transport seam.
//!
//! The connection layer never talks to an HTTP library directly; it asks a
//! [`Connector`] for a [`Transport`] when opened and sends every request
//! through it. The default connector is backed by `reqwest`; tests inject a
//! scripted stub.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;

use crate::config::PoolOptions;
use crate::connection::events::ConnectivityMonitor;
use crate::encoder::ByteStream;
use crate::error::Result;

pub mod http;

pub use http::{ReqwestConnector, ReqwestTransport};

/// A request relative to the server base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path plus query string, e.g. `/?session_id=...`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// A response whose body is still arriving.
pub struct StreamingResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl StreamingResponse {
    /// Drain the remaining body into a string (lossy UTF-8).
    ///
    /// # Errors
    /// Propagates the first chunk error.
    pub async fn into_text(self) -> Result<String> {
        use futures_util::TryStreamExt;

        let chunks: Vec<bytes::Bytes> = self.body.try_collect().await?;
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Pooled keep-alive HTTP agent bound to one server.
///
/// Implementations report what they observe about their connections to the
/// [`ConnectivityMonitor`] handed to [`Connector::connect`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request with an optional in-memory body and read the whole response.
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Send a request whose body is produced by `body`, returning once the
    /// response headers arrive. `request.body` is ignored.
    async fn stream(&self, request: HttpRequest, body: ByteStream) -> Result<StreamingResponse>;

    /// Release pooled connections.
    async fn close(&self);
}

/// Builds a [`Transport`] for a server base URL.
pub trait Connector: Send + Sync {
    /// # Errors
    /// Returns an error when the transport cannot be constructed (bad URL,
    /// TLS backend failure ...).
    fn connect(
        &self,
        url: &str,
        options: &PoolOptions,
        monitor: ConnectivityMonitor,
    ) -> Result<Arc<dyn Transport>>;
}

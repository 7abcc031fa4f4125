use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::{Body, RequestBuilder, Response};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{Connector, HttpRequest, HttpResponse, StreamingResponse, Transport};
use crate::config::PoolOptions;
use crate::connection::events::{ConnectivityEvent, ConnectivityMonitor};
use crate::encoder::ByteStream;
use crate::error::{ClickhouseError, Result};

/// Default connector: one keep-alive `reqwest::Client` per opened connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestConnector;

impl Connector for ReqwestConnector {
    fn connect(
        &self,
        url: &str,
        options: &PoolOptions,
        monitor: ConnectivityMonitor,
    ) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(ReqwestTransport::new(url, options, monitor)?))
    }
}

/// `reqwest`-backed [`Transport`].
///
/// Keep-alive sockets are pooled per host, capped at the configured pool
/// size. A header timeout bounds the wait for the status line; a body
/// timeout bounds the gap between successive body chunks.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    header_timeout: Option<Duration>,
    body_timeout: Option<Duration>,
    monitor: ConnectivityMonitor,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl ReqwestTransport {
    /// # Errors
    /// `ConfigError` for an unparsable base URL; `Transport` if the client
    /// cannot be built.
    pub fn new(url: &str, options: &PoolOptions, monitor: ConnectivityMonitor) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ClickhouseError::ConfigError(format!("invalid server url `{url}`: {e}")))?;

        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(options.keep_alive)
            .tcp_keepalive(options.keep_alive)
            .http1_only();
        if let Some(connections) = options.connections {
            builder = builder.pool_max_idle_per_host(connections);
        }
        let client = builder.build()?;

        debug!(
            url = %parsed,
            connections = ?options.connections,
            keep_alive = ?options.keep_alive,
            "http transport created"
        );
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            header_timeout: options.header_timeout,
            body_timeout: options.body_timeout,
            monitor,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn builder(&self, request: &HttpRequest) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, request.path);
        self.client
            .request(request.method.clone(), url)
            .headers(request.headers.clone())
    }

    /// Send and wait for the status line. With `uploaded`, the header
    /// timeout starts once the request body has been fully written, and an
    /// expiry is not treated as a connectivity failure.
    async fn send(
        &self,
        builder: RequestBuilder,
        uploaded: Option<oneshot::Receiver<()>>,
    ) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClickhouseError::NotOpen);
        }
        let streamed = uploaded.is_some();
        let sent = match self.header_timeout {
            Some(limit) => {
                let deadline = async move {
                    if let Some(uploaded) = uploaded {
                        // A dropped sender means the body ended early; start timing anyway.
                        let _ = uploaded.await;
                    }
                    tokio::time::sleep(limit).await;
                };
                tokio::select! {
                    sent = builder.send() => sent,
                    () = deadline => {
                        if streamed {
                            warn!(?limit, "no response headers after upload");
                        } else {
                            self.report_failure("header timeout");
                        }
                        return Err(ClickhouseError::Timeout(format!(
                            "no response headers within {limit:?}"
                        )));
                    }
                }
            }
            None => builder.send().await,
        };
        match sent {
            Ok(response) => {
                self.report_success();
                Ok(response)
            }
            Err(e) => {
                if e.is_connect() || (e.is_timeout() && !streamed) {
                    self.report_failure(&e.to_string());
                }
                Err(e.into())
            }
        }
    }

    fn report_success(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.monitor.handle(ConnectivityEvent::Connect);
        }
    }

    fn report_failure(&self, reason: &str) {
        warn!(reason, "http transport connection error");
        self.connected.store(false, Ordering::Release);
        self.monitor.handle(ConnectivityEvent::ConnectionError);
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.builder(&request);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = self.send(builder, None).await?;
        let status = response.status().as_u16();
        let chunks: Vec<Bytes> = body_chunks(response, self.body_timeout)
            .try_collect()
            .await?;
        let body = String::from_utf8_lossy(&chunks.concat()).into_owned();
        trace!(status, len = body.len(), "response read");
        Ok(HttpResponse { status, body })
    }

    async fn stream(&self, request: HttpRequest, body: ByteStream) -> Result<StreamingResponse> {
        let (done, uploaded) = oneshot::channel();
        let body = UploadBody {
            inner: Mutex::new(body),
            done: Some(done),
        };
        let builder = self.builder(&request).body(Body::wrap_stream(body));
        let response = self.send(builder, Some(uploaded)).await?;
        let status = response.status().as_u16();
        Ok(StreamingResponse {
            status,
            body: body_chunks(response, self.body_timeout),
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.connected.store(false, Ordering::Release);
            self.monitor.handle(ConnectivityEvent::Disconnect);
            debug!(url = %self.base_url, "http transport closed");
        }
    }
}

/// Response body as a chunk stream, each read bounded by `limit`.
fn body_chunks(response: Response, limit: Option<Duration>) -> ByteStream {
    stream::try_unfold(response, move |mut response| async move {
        let chunk = match limit {
            Some(limit) => tokio::time::timeout(limit, response.chunk())
                .await
                .map_err(|_| ClickhouseError::Timeout(format!("no body data within {limit:?}")))??,
            None => response.chunk().await?,
        };
        Ok::<_, ClickhouseError>(chunk.map(|chunk| (chunk, response)))
    })
    .boxed()
}

/// Request body that signals `done` once the last chunk has been handed to
/// the connection.
// `Body::wrap_stream` may demand `Sync`; the mutex is only ever accessed
// through `&mut`, so it never actually locks.
struct UploadBody {
    inner: Mutex<ByteStream>,
    done: Option<oneshot::Sender<()>>,
}

impl Stream for UploadBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let inner = match this.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = next {
            if let Some(done) = this.done.take() {
                let _ = done.send(());
            }
        }
        next
    }
}

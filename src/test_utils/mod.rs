//! Scripted in-memory transport for tests.
//!
//! `StubTransport` records every request it receives and answers from a
//! queue of scripted replies (an empty `200` once the queue runs dry).
//! Enabled under `cfg(test)` or with the `test-utils` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest::Method;
use reqwest::header::HeaderMap;

use crate::config::PoolOptions;
use crate::connection::{ConnectivityEvent, ConnectivityMonitor};
use crate::encoder::ByteStream;
use crate::error::{ClickhouseError, Result};
use crate::transport::{Connector, HttpRequest, HttpResponse, StreamingResponse, Transport};

/// A request as the stub saw it. Streamed bodies are collected into `body`.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RecordedRequest {
    /// Value of query parameter `key` in the recorded path.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<String> {
        let query = self.path.split_once('?')?.1;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Response { status: u16, body: String },
    Failure(String),
}

#[derive(Default)]
struct StubState {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
    closed: AtomicBool,
    discard: AtomicBool,
    delay: Mutex<Option<Duration>>,
    monitor: Mutex<Option<ConnectivityMonitor>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted transport. Clones share the script and the request log.
#[derive(Clone, Default)]
pub struct StubTransport {
    state: Arc<StubState>,
}

impl StubTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        lock(&self.state.replies).push_back(Reply::Response {
            status,
            body: body.into(),
        });
    }

    /// Queue a transport-level failure (e.g. connection refused). It is
    /// reported to the monitor as a connection error, like a real transport.
    pub fn push_failure(&self, message: impl Into<String>) {
        lock(&self.state.replies).push_back(Reply::Failure(message.into()));
    }

    /// Hold every reply for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.state.delay) = Some(delay);
    }

    /// Stop keeping request records (calls are still counted). For
    /// long-running benchmarks.
    pub fn stop_recording(&self) {
        self.state.discard.store(true, Ordering::SeqCst);
    }

    /// Deliver a connectivity event as the pool would.
    ///
    /// # Panics
    /// If called before a connector handed the stub a monitor.
    pub fn emit(&self, event: ConnectivityEvent) {
        lock(&self.state.monitor)
            .as_ref()
            .expect("stub transport is not connected")
            .handle(event);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }

    /// Number of requests that reached the transport.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    async fn answer(&self, recorded: RecordedRequest) -> Result<HttpResponse> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.discard.load(Ordering::SeqCst) {
            lock(&self.state.requests).push(recorded);
        }
        let delay = *lock(&self.state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = lock(&self.state.replies).pop_front();
        match reply {
            Some(Reply::Response { status, body }) => Ok(HttpResponse { status, body }),
            Some(Reply::Failure(message)) => {
                let monitor = lock(&self.state.monitor).clone();
                if let Some(monitor) = monitor {
                    monitor.handle(ConnectivityEvent::ConnectionError);
                }
                Err(ClickhouseError::ConnectionError(message))
            }
            None => Ok(HttpResponse {
                status: 200,
                body: String::new(),
            }),
        }
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.answer(RecordedRequest {
            method: request.method,
            path: request.path,
            headers: request.headers,
            body: request.body,
        })
        .await
    }

    async fn stream(&self, request: HttpRequest, body: ByteStream) -> Result<StreamingResponse> {
        let chunks: Vec<Bytes> = body.try_collect().await?;
        let response = self
            .answer(RecordedRequest {
                method: request.method,
                path: request.path,
                headers: request.headers,
                body: Some(String::from_utf8_lossy(&chunks.concat()).into_owned()),
            })
            .await?;
        Ok(StreamingResponse {
            status: response.status,
            body: stream::once(async move { Ok::<_, ClickhouseError>(Bytes::from(response.body)) })
                .boxed(),
        })
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        let monitor = lock(&self.state.monitor).clone();
        if let Some(monitor) = monitor {
            monitor.handle(ConnectivityEvent::Disconnect);
        }
    }
}

/// Hands out one shared [`StubTransport`] and counts connects.
#[derive(Default)]
pub struct StubConnector {
    transport: StubTransport,
    connects: AtomicUsize,
}

impl StubConnector {
    #[must_use]
    pub fn new(transport: StubTransport) -> Self {
        Self {
            transport,
            connects: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &StubTransport {
        &self.transport
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for StubConnector {
    fn connect(
        &self,
        _url: &str,
        _options: &PoolOptions,
        monitor: ConnectivityMonitor,
    ) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.transport.state.closed.store(false, Ordering::SeqCst);
        *lock(&self.transport.state.monitor) = Some(monitor);
        Ok(Arc::new(self.transport.clone()))
    }
}

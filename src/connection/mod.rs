//! Stateful connection: owns the transport, the session pool and the
//! fallback flag, and applies the fixed database headers to every request.

pub mod events;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::config::{ClientConfig, PoolOptions};
use crate::encoder::ByteStream;
use crate::error::{ClickhouseError, Result};
use crate::ids::IdGenerator;
use crate::response::{QueryResponse, classify_response, request_error};
use crate::session::{SessionLease, SessionPool, SessionPoolStatus};
use crate::transport::{Connector, HttpRequest, ReqwestConnector, Transport};

pub use events::{ConnectivityEvent, ConnectivityMonitor};

pub const DATABASE_HEADER: &str = "x-clickhouse-database";
pub const USER_HEADER: &str = "x-clickhouse-user";
pub const KEY_HEADER: &str = "x-clickhouse-key";

/// Receives response body chunks of a streamed request.
pub trait ResponseSink: Send {
    /// # Errors
    /// An error aborts the request and is returned to the caller.
    fn write_chunk(&mut self, chunk: Bytes) -> Result<()>;
}

impl ResponseSink for Vec<u8> {
    fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Adapts a closure into a [`ResponseSink`].
pub struct FnSink<F>(pub F);

impl<F> ResponseSink for FnSink<F>
where
    F: FnMut(Bytes) -> Result<()> + Send,
{
    fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        (self.0)(chunk)
    }
}

enum State {
    Unopened,
    Open {
        transport: Arc<dyn Transport>,
        sessions: SessionPool,
    },
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unopened => "unopened",
            State::Open { .. } => "open",
            State::Closed => "closed",
        }
    }
}

/// Lifecycle: unopened, then open, then closed. Reopening after close is allowed.
pub struct Connection {
    db_headers: HeaderMap,
    connector: Arc<dyn Connector>,
    monitor: ConnectivityMonitor,
    ids: Arc<IdGenerator>,
    state: RwLock<State>,
}

impl Connection {
    /// Connection using the default `reqwest` transport.
    ///
    /// # Errors
    /// `ConfigError` when the database, user or password cannot be sent as
    /// an HTTP header value.
    pub fn new(config: &ClientConfig, ids: Arc<IdGenerator>) -> Result<Self> {
        Self::with_connector(config, ids, Arc::new(ReqwestConnector))
    }

    /// # Errors
    /// See [`Connection::new`].
    pub fn with_connector(
        config: &ClientConfig,
        ids: Arc<IdGenerator>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let mut db_headers = HeaderMap::new();
        for (name, value, sensitive) in [
            (DATABASE_HEADER, config.database.as_str(), false),
            (USER_HEADER, config.user.as_str(), false),
            (KEY_HEADER, config.password.as_str(), true),
        ] {
            if value.is_empty() {
                continue;
            }
            let mut value = HeaderValue::from_str(value).map_err(|e| {
                ClickhouseError::ConfigError(format!("`{name}` is not a valid header value: {e}"))
            })?;
            value.set_sensitive(sensitive);
            db_headers.insert(HeaderName::from_static(name), value);
        }
        Ok(Self {
            db_headers,
            connector,
            monitor: ConnectivityMonitor::new(),
            ids,
            state: RwLock::new(State::Unopened),
        })
    }

    /// Create the transport and session pool. Calling it on an open
    /// connection is a no-op.
    ///
    /// # Errors
    /// Propagates connector failures and `ConfigError` for a zero pool size.
    pub fn open(&self, url: &str, options: &PoolOptions) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, State::Open { .. }) {
            debug!(url, "connection already open");
            return Ok(());
        }
        let sessions = SessionPool::with_capacity(options.connections, Arc::clone(&self.ids))?;
        let transport = self.connector.connect(url, options, self.monitor.clone())?;
        *state = State::Open {
            transport,
            sessions,
        };
        debug!(url, pool = ?options.connections, "connection opened");
        Ok(())
    }

    /// Release the transport and wake any session waiters with `NotOpen`.
    /// Closing an unopened or closed connection does nothing.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !matches!(*state, State::Open { .. }) {
                return;
            }
            std::mem::replace(&mut *state, State::Closed)
        };
        if let State::Open {
            transport,
            sessions,
        } = previous
        {
            sessions.close();
            transport.close().await;
            debug!("connection closed");
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(PoisonError::into_inner),
            State::Open { .. }
        )
    }

    #[must_use]
    pub fn in_fallback_mode(&self) -> bool {
        self.monitor.in_fallback_mode()
    }

    /// Feed a connectivity event through the same handler the transport uses.
    pub fn handle_event(&self, event: ConnectivityEvent) {
        self.monitor.handle(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.monitor.subscribe()
    }

    #[must_use]
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Check out a session id from the pool.
    ///
    /// # Errors
    /// `NotOpen` before `open` or after `close`.
    pub async fn acquire_session(&self) -> Result<SessionLease> {
        let sessions = self.snapshot()?.1;
        sessions.acquire().await
    }

    #[must_use]
    pub fn session_status(&self) -> Option<SessionPoolStatus> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Open { sessions, .. } => Some(sessions.status()),
            _ => None,
        }
    }

    fn snapshot(&self) -> Result<(Arc<dyn Transport>, SessionPool)> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Open {
                transport,
                sessions,
            } => Ok((Arc::clone(transport), sessions.clone())),
            _ => Err(ClickhouseError::NotOpen),
        }
    }

    /// Headers in precedence order: content type, content length, database
    /// headers, then caller headers (which override the rest).
    fn compose_headers(&self, body_len: Option<usize>, extra: Option<&HeaderMap>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(len) = body_len {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        for (name, value) in &self.db_headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(extra) = extra {
            for (name, value) in extra {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }

    /// Send one request and classify the response.
    ///
    /// # Errors
    /// `NotOpen`, transport failures, or `Request` for a non-200 status.
    pub async fn raw(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        headers: Option<&HeaderMap>,
    ) -> Result<QueryResponse> {
        let (transport, _) = self.snapshot()?;
        let request = HttpRequest {
            headers: self.compose_headers(body.as_ref().map(String::len), headers),
            method,
            path: path.to_string(),
            body,
        };
        debug!(method = %request.method, path = %request.path, "sending request");
        trace!(body = ?request.body, "request body");
        let response = transport.request(request).await?;
        trace!(status = response.status, body = %response.body, "response received");
        classify_response(response.status, response.body)
    }

    /// # Errors
    /// See [`Connection::raw`].
    pub async fn get(&self, path: &str, headers: Option<&HeaderMap>) -> Result<QueryResponse> {
        self.raw(Method::GET, path, None, headers).await
    }

    /// POST `body` to `path`. Rejected with `FallbackMode`, without
    /// touching the network, while the pool is in fallback mode.
    ///
    /// # Errors
    /// `FallbackMode`, or anything [`Connection::raw`] returns.
    pub async fn post(
        &self,
        path: &str,
        body: Option<String>,
        headers: Option<&HeaderMap>,
    ) -> Result<QueryResponse> {
        self.ensure_writable()?;
        self.raw(Method::POST, path, body, headers).await
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.monitor.in_fallback_mode() {
            debug!("request rejected in fallback mode");
            return Err(ClickhouseError::FallbackMode);
        }
        Ok(())
    }

    /// POST a streamed body and return the response body stream once a 200
    /// status arrives.
    ///
    /// # Errors
    /// `FallbackMode`, `NotOpen`, transport failures, or `Request` (with
    /// the full error body) for a non-200 status.
    pub async fn open_stream(
        &self,
        path: &str,
        body: ByteStream,
        headers: Option<&HeaderMap>,
    ) -> Result<ByteStream> {
        self.ensure_writable()?;
        let (transport, _) = self.snapshot()?;
        let request = HttpRequest {
            method: Method::POST,
            path: path.to_string(),
            headers: self.compose_headers(None, headers),
            body: None,
        };
        debug!(path = %request.path, "sending streamed request");
        let response = transport.stream(request, body).await?;
        if response.status != 200 {
            let status = response.status;
            let text = response.into_text().await?;
            return Err(ClickhouseError::Request(request_error(status, text)));
        }
        Ok(response.body)
    }

    /// POST a streamed body and feed the response body to `sink` until the
    /// transport signals completion. Nothing reaches the sink on a non-200
    /// status.
    ///
    /// # Errors
    /// See [`Connection::open_stream`]; sink errors abort the read.
    pub async fn stream(
        &self,
        path: &str,
        body: ByteStream,
        headers: Option<&HeaderMap>,
        sink: &mut dyn ResponseSink,
    ) -> Result<()> {
        let mut response = self.open_stream(path, body, headers).await?;
        while let Some(chunk) = response.next().await {
            sink.write_chunk(chunk?)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Connection")
            .field("state", &state.name())
            .field("fallback", &self.monitor.in_fallback_mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoded;
    use crate::test_utils::{StubConnector, StubTransport};

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .database("analytics")
            .user("reader")
            .password("s3cret")
            .pool_size(Some(2))
            .finish()
    }

    fn open_with_stub(config: &ClientConfig) -> (Connection, StubTransport) {
        let stub = StubTransport::new();
        let conn = Connection::with_connector(
            config,
            Arc::new(IdGenerator::new()),
            Arc::new(StubConnector::new(stub.clone())),
        )
        .unwrap();
        conn.open(&config.url(), &config.pool_options()).unwrap();
        (conn, stub)
    }

    #[tokio::test]
    async fn requests_before_open_fail_with_not_open() {
        let conn = Connection::new(&config(), Arc::new(IdGenerator::new())).unwrap();
        assert!(matches!(conn.get("/ping", None).await, Err(ClickhouseError::NotOpen)));
        assert!(matches!(conn.acquire_session().await, Err(ClickhouseError::NotOpen)));
    }

    #[tokio::test]
    async fn open_twice_keeps_the_first_transport() {
        let cfg = config();
        let stub = StubTransport::new();
        let connector = Arc::new(StubConnector::new(stub));
        let conn =
            Connection::with_connector(&cfg, Arc::new(IdGenerator::new()), connector.clone())
                .unwrap();
        conn.open(&cfg.url(), &cfg.pool_options()).unwrap();
        conn.open(&cfg.url(), &cfg.pool_options()).unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(conn.session_status().unwrap().capacity, Some(2));
    }

    #[tokio::test]
    async fn close_then_request_fails() {
        let (conn, stub) = open_with_stub(&config());
        conn.close().await;
        assert!(stub.is_closed());
        assert!(!conn.is_open());
        assert!(matches!(
            conn.post("/", Some("SELECT 1".into()), None).await,
            Err(ClickhouseError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn database_headers_are_applied_and_overridable() {
        let (conn, stub) = open_with_stub(&config());
        let mut extra = HeaderMap::new();
        extra.insert(
            HeaderName::from_static(DATABASE_HEADER),
            HeaderValue::from_static("other"),
        );
        conn.post("/", Some("SELECT 1".into()), Some(&extra))
            .await
            .unwrap();
        let sent = stub.requests().pop().unwrap();
        assert_eq!(sent.headers[CONTENT_TYPE], "application/json");
        assert_eq!(sent.headers[CONTENT_LENGTH], "8");
        assert_eq!(sent.headers[DATABASE_HEADER], "other");
        assert_eq!(sent.headers[USER_HEADER], "reader");
        assert_eq!(sent.headers[KEY_HEADER], "s3cret");
    }

    #[tokio::test]
    async fn empty_credentials_are_omitted() {
        let cfg = ClientConfig::builder().database("").finish();
        let (conn, stub) = open_with_stub(&cfg);
        conn.get("/ping", None).await.unwrap();
        let sent = stub.requests().pop().unwrap();
        assert!(!sent.headers.contains_key(DATABASE_HEADER));
        assert!(!sent.headers.contains_key(USER_HEADER));
        assert!(!sent.headers.contains_key(KEY_HEADER));
        assert!(!sent.headers.contains_key(CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn fallback_blocks_posts_but_not_gets() {
        let (conn, stub) = open_with_stub(&config());
        conn.handle_event(ConnectivityEvent::Drain);
        assert!(matches!(
            conn.post("/", Some("SELECT 1".into()), None).await,
            Err(ClickhouseError::FallbackMode)
        ));
        assert_eq!(stub.calls(), 0);

        stub.push_response(200, "Ok.\n");
        assert_eq!(conn.get("/ping", None).await.unwrap().text(), Some("Ok."));
        assert_eq!(stub.calls(), 1);

        conn.handle_event(ConnectivityEvent::Connect);
        conn.post("/", Some("SELECT 1".into()), None).await.unwrap();
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn stream_feeds_sink_on_success() {
        let (conn, stub) = open_with_stub(&config());
        stub.push_response(200, "done");
        let mut sink = Vec::new();
        conn.stream(
            "/?query=INSERT",
            Encoded::Text("a,b\n".into()).into_stream(),
            None,
            &mut sink,
        )
        .await
        .unwrap();
        assert_eq!(sink, b"done");
        assert_eq!(stub.requests()[0].body.as_deref(), Some("a,b\n"));
    }

    #[tokio::test]
    async fn stream_error_status_skips_sink() {
        let (conn, stub) = open_with_stub(&config());
        stub.push_response(500, "Code: 27. DB::Exception: Cannot parse input\n");
        let mut seen = 0usize;
        let mut sink = FnSink(|chunk: Bytes| -> Result<()> {
            seen += chunk.len();
            Ok(())
        });
        let err = conn
            .stream("/", Encoded::Text("x".into()).into_stream(), None, &mut sink)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.as_request_error().unwrap().code, Some(27));
        drop(sink);
        assert_eq!(seen, 0);
    }
}

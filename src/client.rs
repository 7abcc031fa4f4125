//! Public entry point.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectivityEvent};
use crate::encoder::{Encoded, encode, encode_batch};
use crate::error::{ClickhouseError, Result};
use crate::formats::Format;
use crate::ids::IdGenerator;
use crate::insert::{
    BatchInsert, FailedInsert, InsertFallback, InsertOutcome, InsertReceipt, StreamInsert,
};
use crate::path::{JSON_SUFFIX, RequestPath, insert_statement};
use crate::response::{OK_MARKER, QueryResponse, decode_body};
use crate::session::SessionPoolStatus;
use crate::sql::{QuestionMarkFormatter, SqlFormatter, strip_trailing_semicolons};
use crate::stream::QueryStream;
use crate::transport::Connector;

/// ClickHouse HTTP client.
///
/// Cheap to clone; clones share the connection, the session pool and the
/// fallback flag.
///
/// ```rust,no_run
/// use clickhouse_http_middleware::prelude::*;
///
/// # async fn demo() -> Result<(), ClickhouseError> {
/// let client = Client::new(ClientConfig::from_env()?)?;
/// client.open().await?;
/// let res = client
///     .select_json("SELECT number FROM system.numbers LIMIT ?", &[3.into()], None)
///     .await?;
/// assert_eq!(res.rows(), Some(3));
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    connection: Connection,
    ids: Arc<IdGenerator>,
    formatter: Arc<dyn SqlFormatter>,
}

impl Client {
    /// Client using the `reqwest` transport. Nothing is sent until
    /// [`Client::open`] is awaited.
    ///
    /// # Errors
    /// `ConfigError` if the config fails validation or a credential cannot
    /// be sent as a header.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let ids = Arc::new(IdGenerator::new());
        let connection = Connection::new(&config, Arc::clone(&ids))?;
        Ok(Self::assemble(config, connection, ids))
    }

    /// Client using a caller-supplied transport.
    ///
    /// # Errors
    /// See [`Client::new`].
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let ids = Arc::new(IdGenerator::new());
        let connection = Connection::with_connector(&config, Arc::clone(&ids), connector)?;
        Ok(Self::assemble(config, connection, ids))
    }

    fn assemble(config: ClientConfig, connection: Connection, ids: Arc<IdGenerator>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                connection,
                ids,
                formatter: Arc::new(QuestionMarkFormatter),
            }),
        }
    }

    /// Replace the parameter formatter. Must be called before the client is
    /// cloned.
    ///
    /// # Errors
    /// `ConfigError` if another clone already shares this client.
    pub fn with_formatter(mut self, formatter: Arc<dyn SqlFormatter>) -> Result<Self> {
        let Some(inner) = Arc::get_mut(&mut self.inner) else {
            return Err(ClickhouseError::ConfigError(
                "formatter must be set before the client is cloned".into(),
            ));
        };
        inner.formatter = formatter;
        Ok(self)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Open the transport and session pool. Idempotent.
    ///
    /// # Errors
    /// Transport construction failures.
    #[allow(clippy::unused_async)]
    pub async fn open(&self) -> Result<()> {
        let config = &self.inner.config;
        self.inner
            .connection
            .open(&config.url(), &config.pool_options())
    }

    pub async fn close(&self) {
        self.inner.connection.close().await;
    }

    #[must_use]
    pub fn in_fallback_mode(&self) -> bool {
        self.inner.connection.in_fallback_mode()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.connection.subscribe()
    }

    /// `None` while the client is not open.
    #[must_use]
    pub fn session_status(&self) -> Option<SessionPoolStatus> {
        self.inner.connection.session_status()
    }

    fn query_id(&self, supplied: Option<&str>) -> String {
        supplied.map_or_else(|| self.inner.ids.next_id(), str::to_string)
    }

    fn render(&self, sql: &str, params: &[JsonValue]) -> Result<String> {
        if sql.trim().is_empty() {
            return Err(ClickhouseError::MissingQuery);
        }
        self.inner.formatter.format(sql, params)
    }

    /// Run a statement and classify the response.
    ///
    /// # Errors
    /// `MissingQuery` for blank SQL, `FallbackMode` while the pool is
    /// unhealthy, `NotOpen`, transport failures, or `Request` for a non-200
    /// status.
    pub async fn query(
        &self,
        sql: &str,
        params: &[JsonValue],
        query_id: Option<&str>,
    ) -> Result<QueryResponse> {
        let sql = self.render(sql, params)?;
        self.post_sql(sql, query_id).await
    }

    /// Run a `SELECT` with `FORMAT JSON` appended (after stripping trailing
    /// semicolons).
    ///
    /// # Errors
    /// See [`Client::query`].
    pub async fn select_json(
        &self,
        sql: &str,
        params: &[JsonValue],
        query_id: Option<&str>,
    ) -> Result<QueryResponse> {
        let sql = self.render(sql, params)?;
        let sql = format!("{} {JSON_SUFFIX}", strip_trailing_semicolons(&sql));
        self.post_sql(sql, query_id).await
    }

    async fn post_sql(&self, sql: String, query_id: Option<&str>) -> Result<QueryResponse> {
        let lease = self.inner.connection.acquire_session().await?;
        let query_id = self.query_id(query_id);
        let path = RequestPath::new(lease.id(), &query_id).build();
        debug!(%query_id, session_id = lease.id(), "query");
        let res = self.inner.connection.post(&path, Some(sql), None).await;
        drop(lease);
        res
    }

    /// Run a query and stream its response body instead of buffering it.
    /// The session stays checked out until the stream is dropped.
    ///
    /// # Errors
    /// Same as [`Client::query`]; a non-200 status is reported here, before
    /// any body is handed out.
    pub async fn query_stream(
        &self,
        sql: &str,
        params: &[JsonValue],
        query_id: Option<&str>,
    ) -> Result<QueryStream> {
        let sql = self.render(sql, params)?;
        let lease = self.inner.connection.acquire_session().await?;
        let query_id = self.query_id(query_id);
        let path = RequestPath::new(lease.id(), &query_id).build();
        debug!(%query_id, session_id = lease.id(), "streaming query");
        let body = self
            .inner
            .connection
            .open_stream(&path, Encoded::Text(sql).into_stream(), None)
            .await?;
        Ok(QueryStream::new(query_id, body, lease))
    }

    /// Insert a batch as `JSONEachRow`.
    ///
    /// # Errors
    /// `MissingTable`/`MissingItems` before any I/O, otherwise as
    /// [`Client::query`].
    pub async fn insert_batch(&self, batch: BatchInsert) -> Result<QueryResponse> {
        batch.validate()?;
        self.send_batch(&batch).await
    }

    /// Like [`Client::insert_batch`], but a request failure is handed to
    /// `fallback` instead of being returned. Validation errors still fail.
    ///
    /// # Errors
    /// Validation errors, or the fallback's own error.
    pub async fn insert_batch_or_fallback(
        &self,
        batch: BatchInsert,
        fallback: &dyn InsertFallback,
    ) -> Result<InsertOutcome<QueryResponse>> {
        batch.validate()?;
        match self.send_batch(&batch).await {
            Ok(res) => Ok(InsertOutcome::Inserted(res)),
            Err(error) => {
                warn!(table = %batch.table, %error, "batch insert failed; diverting to fallback");
                fallback
                    .on_failure(
                        FailedInsert::Batch {
                            table: batch.table,
                            items: batch.items,
                        },
                        error,
                    )
                    .await?;
                Ok(InsertOutcome::Diverted)
            }
        }
    }

    async fn send_batch(&self, batch: &BatchInsert) -> Result<QueryResponse> {
        let format = Format::JsonEachRow;
        let body = encode_batch(&batch.items, format)?;
        let statement = insert_statement(&batch.table, format.name());
        let lease = self.inner.connection.acquire_session().await?;
        let query_id = self.inner.ids.next_id();
        let path = RequestPath::new(lease.id(), &query_id)
            .with_query(&statement)
            .build();
        debug!(%query_id, table = %batch.table, rows = batch.items.len(), "batch insert");
        let res = self.inner.connection.post(&path, Some(body), None).await;
        drop(lease);
        res
    }

    /// Stream values into `table` in the given format.
    ///
    /// # Errors
    /// `MissingTable`/`MissingItems`/`MissingFormat`, `UnsupportedFormat` or
    /// `UnsupportedValueType` before any I/O; otherwise as [`Client::query`].
    pub async fn insert_stream(&self, insert: StreamInsert) -> Result<InsertReceipt> {
        let (table, values, format) = insert.into_parts()?;
        let encoded = encode(values, format)?;
        let query_id = self.inner.ids.next_id();
        self.send_stream(&table, format, &query_id, encoded).await
    }

    /// Like [`Client::insert_stream`], with request failures handed to
    /// `fallback`.
    ///
    /// # Errors
    /// Validation and encoding errors, or the fallback's own error.
    pub async fn insert_stream_or_fallback(
        &self,
        insert: StreamInsert,
        fallback: &dyn InsertFallback,
    ) -> Result<InsertOutcome<InsertReceipt>> {
        let (table, values, format) = insert.into_parts()?;
        let encoded = encode(values, format)?;
        let query_id = self.inner.ids.next_id();
        match self.send_stream(&table, format, &query_id, encoded).await {
            Ok(receipt) => Ok(InsertOutcome::Inserted(receipt)),
            Err(error) => {
                warn!(%table, %query_id, %error, "stream insert failed; diverting to fallback");
                fallback
                    .on_failure(
                        FailedInsert::Stream {
                            table,
                            format,
                            query_id,
                        },
                        error,
                    )
                    .await?;
                Ok(InsertOutcome::Diverted)
            }
        }
    }

    async fn send_stream(
        &self,
        table: &str,
        format: Format,
        query_id: &str,
        encoded: Encoded,
    ) -> Result<InsertReceipt> {
        let statement = insert_statement(table, format.name());
        let lease = self.inner.connection.acquire_session().await?;
        let path = RequestPath::new(lease.id(), query_id)
            .with_query(&statement)
            .build();
        debug!(%query_id, %table, %format, "stream insert");
        let mut sink = Vec::new();
        let res = self
            .inner
            .connection
            .stream(&path, encoded.into_stream(), None, &mut sink)
            .await;
        drop(lease);
        res?;
        Ok(InsertReceipt {
            query_id: query_id.to_string(),
            response: decode_body(String::from_utf8_lossy(&sink).into_owned()),
        })
    }

    /// Health check against `/ping`.
    ///
    /// # Errors
    /// `NotOpen`, transport failures, `Request` for a non-200 status, or
    /// `ConnectionError` when the body is not `Ok.`.
    pub async fn ping(&self) -> Result<QueryResponse> {
        let res = self.inner.connection.get("/ping", None).await?;
        if res.text() == Some(OK_MARKER) {
            Ok(res)
        } else {
            Err(ClickhouseError::ConnectionError(format!(
                "unexpected ping response: {res:?}"
            )))
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

//! Async client for the ClickHouse HTTP interface.
//!
//! Requests are tagged with a session id drawn from a bounded pool, bodies
//! are encoded per target format, and inserts can be diverted to a fallback
//! while the server is unreachable.
//!
//! ```rust,no_run
//! use clickhouse_http_middleware::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), ClickhouseError> {
//! let client = Client::new(ClientConfig::new("localhost"))?;
//! client.open().await?;
//! client
//!     .insert_batch(BatchInsert::new("events", vec![json!({"id": 1})]))
//!     .await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod formats;
pub mod ids;
pub mod insert;
pub mod path;
pub mod prelude;
pub mod response;
pub mod session;
pub mod sql;
pub mod stream;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, PoolOptions, Protocol};
pub use error::{ClickhouseError, RequestError, Result};
pub use response::QueryResponse;

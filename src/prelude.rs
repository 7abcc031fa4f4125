//! Convenient imports for common functionality.

pub use crate::client::Client;
pub use crate::config::{ClientConfig, ClientConfigBuilder, PoolOptions, Protocol};
pub use crate::connection::{ConnectivityEvent, FnSink, ResponseSink};
pub use crate::encoder::{InsertValues, RowStream};
pub use crate::error::{ClickhouseError, RequestError};
pub use crate::formats::{Format, FormatKind};
pub use crate::insert::{
    BatchInsert, FailedInsert, InsertFallback, InsertOutcome, InsertReceipt, StreamInsert,
};
pub use crate::response::QueryResponse;
pub use crate::sql::{QuestionMarkFormatter, SqlFormatter};
pub use crate::stream::QueryStream;
pub use crate::transport::{Connector, Transport};

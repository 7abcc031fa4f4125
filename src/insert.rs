//! Insert requests, their outcomes and the fallback hook.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::encoder::InsertValues;
use crate::error::{ClickhouseError, Result};
use crate::formats::Format;
use crate::response::QueryResponse;

/// A finite batch of rows sent as `JSONEachRow`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchInsert {
    pub table: String,
    pub items: Vec<JsonValue>,
}

impl BatchInsert {
    #[must_use]
    pub fn new(table: impl Into<String>, items: Vec<JsonValue>) -> Self {
        Self {
            table: table.into(),
            items,
        }
    }

    /// Serialize typed rows up front.
    ///
    /// # Errors
    /// `Json` if a row cannot be represented as JSON.
    pub fn from_rows<T: Serialize>(table: impl Into<String>, rows: &[T]) -> Result<Self> {
        let items = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(table, items))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(ClickhouseError::MissingTable);
        }
        if self.items.is_empty() {
            return Err(ClickhouseError::MissingItems);
        }
        Ok(())
    }
}

/// A streamed insert. Every part is required; missing parts are reported
/// before any request is made.
#[derive(Debug, Default)]
pub struct StreamInsert {
    pub table: Option<String>,
    pub items: Option<InsertValues>,
    pub format: Option<String>,
}

impl StreamInsert {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn items(mut self, items: impl Into<InsertValues>) -> Self {
        self.items = Some(items.into());
        self
    }

    /// Format name as written after `FORMAT`, e.g. `CSV` or `JSONEachRow`.
    #[must_use]
    pub fn format(mut self, format: impl ToString) -> Self {
        self.format = Some(format.to_string());
        self
    }

    /// Check presence, then resolve the format name.
    pub(crate) fn into_parts(self) -> Result<(String, InsertValues, Format)> {
        let table = self
            .table
            .filter(|t| !t.trim().is_empty())
            .ok_or(ClickhouseError::MissingTable)?;
        let items = self.items.ok_or(ClickhouseError::MissingItems)?;
        let format = self
            .format
            .filter(|f| !f.trim().is_empty())
            .ok_or(ClickhouseError::MissingFormat)?;
        let format = format.trim().parse::<Format>()?;
        Ok((table, items, format))
    }
}

/// What a fallback receives about the insert that could not be delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum FailedInsert {
    Batch {
        table: String,
        items: Vec<JsonValue>,
    },
    /// Streamed values are consumed by the attempt and cannot be replayed.
    Stream {
        table: String,
        format: Format,
        query_id: String,
    },
}

impl FailedInsert {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            FailedInsert::Batch { table, .. } | FailedInsert::Stream { table, .. } => table,
        }
    }
}

/// Takes over an insert that failed at the network or server, e.g. by
/// spooling rows to disk for a later retry.
#[async_trait]
pub trait InsertFallback: Send + Sync {
    /// Returning `Ok` marks the insert as diverted; an error propagates to
    /// the caller in place of the original one.
    async fn on_failure(&self, request: FailedInsert, error: ClickhouseError) -> Result<()>;
}

/// Result of an insert that may have been diverted to a fallback.
#[derive(Debug)]
pub enum InsertOutcome<T> {
    Inserted(T),
    Diverted,
}

impl<T> InsertOutcome<T> {
    #[must_use]
    pub fn is_diverted(&self) -> bool {
        matches!(self, InsertOutcome::Diverted)
    }

    #[must_use]
    pub fn inserted(self) -> Option<T> {
        match self {
            InsertOutcome::Inserted(value) => Some(value),
            InsertOutcome::Diverted => None,
        }
    }
}

/// Acknowledgement of a streamed insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertReceipt {
    pub query_id: String,
    pub response: QueryResponse,
}

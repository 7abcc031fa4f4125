//! Turns application values into request bodies for a target format.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use futures_util::Stream;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::error::{ClickhouseError, Result};
use crate::formats::{Format, encode_json, ensure_json};

/// Pull-based, single-pass stream of wire bytes.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Stream of structured rows, one JSON value per item.
pub type RowStream = BoxStream<'static, Result<JsonValue>>;

/// The shapes of input an insert accepts.
pub enum InsertValues {
    /// Bytes already in wire format (CSV, TSV, pre-encoded JSON lines ...).
    Bytes(ByteStream),
    /// Item-structured stream; each item becomes one JSON line.
    Rows(RowStream),
    /// A finite, ordered batch of items.
    Batch(Vec<JsonValue>),
    /// One structured value (object or array) sent as a single document.
    Single(JsonValue),
}

impl InsertValues {
    /// Wrap a stream of already-encoded chunks.
    pub fn bytes<S, B>(stream: S) -> Self
    where
        S: Stream<Item = Result<B>> + Send + 'static,
        B: Into<Bytes> + 'static,
    {
        InsertValues::Bytes(stream.map_ok(Into::<Bytes>::into).boxed())
    }

    /// Read wire bytes from any async reader, e.g. a CSV file.
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        InsertValues::Bytes(ReaderStream::new(reader).map_err(ClickhouseError::from).boxed())
    }

    /// Wrap a stream of rows; each is serialized lazily as it is pulled.
    pub fn rows<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Serialize,
    {
        InsertValues::Rows(
            stream
                .map(|row| serde_json::to_value(row).map_err(ClickhouseError::from))
                .boxed(),
        )
    }

    /// Wrap a fallible row stream, e.g. the decoded rows of a query stream.
    pub fn try_rows<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<JsonValue>> + Send + 'static,
    {
        InsertValues::Rows(stream.boxed())
    }

    /// Serialize each item of a batch up front.
    ///
    /// # Errors
    /// Returns `ClickhouseError::Json` if an item cannot be represented as JSON.
    pub fn batch<T: Serialize>(items: &[T]) -> Result<Self> {
        let items = items
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(InsertValues::Batch(items))
    }

    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            InsertValues::Bytes(_) => "byte stream",
            InsertValues::Rows(_) => "row stream",
            InsertValues::Batch(_) => "batch",
            InsertValues::Single(value) => json_type_name(value),
        }
    }
}

impl fmt::Debug for InsertValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertValues::Bytes(_) => f.debug_tuple("Bytes").field(&"<stream>").finish(),
            InsertValues::Rows(_) => f.debug_tuple("Rows").field(&"<stream>").finish(),
            InsertValues::Batch(items) => f.debug_tuple("Batch").field(&items.len()).finish(),
            InsertValues::Single(value) => f.debug_tuple("Single").field(value).finish(),
        }
    }
}

impl From<Vec<JsonValue>> for InsertValues {
    fn from(items: Vec<JsonValue>) -> Self {
        InsertValues::Batch(items)
    }
}

impl From<JsonValue> for InsertValues {
    fn from(value: JsonValue) -> Self {
        InsertValues::Single(value)
    }
}

/// Encoded request body.
pub enum Encoded {
    Stream(ByteStream),
    Text(String),
}

impl Encoded {
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        match self {
            Encoded::Stream(stream) => stream,
            Encoded::Text(text) => {
                futures_util::stream::once(async move { Ok(Bytes::from(text)) }).boxed()
            }
        }
    }
}

impl fmt::Debug for Encoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoded::Stream(_) => f.debug_tuple("Stream").field(&"<stream>").finish(),
            Encoded::Text(text) => f.debug_tuple("Text").field(text).finish(),
        }
    }
}

/// Encode `values` for `format`.
///
/// Byte streams pass through unchanged. Row streams are mapped lazily, one
/// JSON line per row in arrival order. Batches are joined eagerly. A single
/// object or array becomes one JSON document.
///
/// # Errors
/// `UnsupportedFormat` when structured values meet a non-JSON format (checked
/// before the first row is pulled), `UnsupportedValueType` for a scalar
/// single value.
pub fn encode(values: InsertValues, format: Format) -> Result<Encoded> {
    match values {
        InsertValues::Bytes(stream) => Ok(Encoded::Stream(stream)),
        InsertValues::Rows(rows) => {
            ensure_json(format)?;
            let encoded = rows.map(move |row| {
                row.and_then(|value| encode_json(&value, format))
                    .map(Bytes::from)
            });
            Ok(Encoded::Stream(encoded.boxed()))
        }
        InsertValues::Batch(items) => Ok(Encoded::Text(encode_batch(&items, format)?)),
        InsertValues::Single(value) => match value {
            JsonValue::Object(_) | JsonValue::Array(_) => {
                Ok(Encoded::Text(encode_json(&value, format)?))
            }
            other => Err(ClickhouseError::UnsupportedValueType {
                value_type: json_type_name(&other).to_string(),
                format: format.name().to_string(),
            }),
        },
    }
}

/// Newline-joined JSON for a batch, in original order.
///
/// # Errors
/// `UnsupportedFormat` for non-JSON formats.
pub fn encode_batch<T: Serialize>(items: &[T], format: Format) -> Result<String> {
    ensure_json(format)?;
    let mut out = String::new();
    for item in items {
        out.push_str(&encode_json(item, format)?);
    }
    Ok(out)
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

//! Streaming query results.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;

use crate::encoder::{ByteStream, RowStream};
use crate::error::{ClickhouseError, Result};
use crate::session::SessionLease;

/// Response body of a query, read incrementally.
///
/// Holds the session lease for as long as it lives; dropping the stream
/// (finished or not) returns the session id to the pool.
pub struct QueryStream {
    query_id: String,
    body: ByteStream,
    _lease: SessionLease,
}

impl QueryStream {
    pub(crate) fn new(query_id: String, body: ByteStream, lease: SessionLease) -> Self {
        Self {
            query_id,
            body,
            _lease: lease,
        }
    }

    #[must_use]
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Buffer the remaining body as text (lossy UTF-8).
    ///
    /// # Errors
    /// Propagates the first chunk error.
    pub async fn collect_text(self) -> Result<String> {
        let chunks: Vec<Bytes> = self.try_collect().await?;
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }

    /// Decode line-delimited JSON (`JSONEachRow` and friends) as rows
    /// arrive. Blank lines are skipped; a final line without a trailing
    /// newline is still decoded.
    #[must_use]
    pub fn json_rows(self) -> RowStream {
        let lines = LineBuffer {
            source: self,
            buffer: Vec::new(),
            scanned: 0,
            finished: false,
        };
        stream::try_unfold(lines, |mut lines| async move {
            Ok::<_, ClickhouseError>(lines.next_row().await?.map(|row| (row, lines)))
        })
        .boxed()
    }
}

impl Stream for QueryStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().body.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("query_id", &self.query_id)
            .finish_non_exhaustive()
    }
}

struct LineBuffer {
    source: QueryStream,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    finished: bool,
}

impl LineBuffer {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        match self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                Some(self.buffer.drain(..=end).collect())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    async fn next_row(&mut self) -> Result<Option<JsonValue>> {
        loop {
            if let Some(line) = self.take_line() {
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(serde_json::from_slice(line)?));
            }
            if self.finished {
                let rest = std::mem::take(&mut self.buffer);
                self.scanned = 0;
                let rest = rest.trim_ascii();
                if rest.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(serde_json::from_slice(rest)?));
            }
            match self.source.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.finished = true,
            }
        }
    }
}

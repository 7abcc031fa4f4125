//! Interpretation of completed HTTP responses.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::error::{ClickhouseError, RequestError, Result};

/// Body the server sends for health checks and some acknowledgements.
pub const OK_MARKER: &str = "Ok.";

static ERROR_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Code: ([0-9]+)[,.] .*?Exception: ([^\r\n]*)").expect("error banner regex")
});

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    /// Body parsed as a JSON object.
    Json(Map<String, JsonValue>),
    /// Body kept verbatim (DDL acknowledgements, `Ok.`, TSV output ...).
    Plain(String),
}

impl QueryResponse {
    /// Always `"ok"`; failures are errors, not responses.
    #[must_use]
    pub fn status(&self) -> &'static str {
        "ok"
    }

    /// `"json"` or `"plain"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            QueryResponse::Json(_) => "json",
            QueryResponse::Plain(_) => "plain",
        }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, QueryResponse::Json(_))
    }

    /// Raw text of a plain response.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            QueryResponse::Plain(text) => Some(text),
            QueryResponse::Json(_) => None,
        }
    }

    /// Top-level field of a JSON response.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        match self {
            QueryResponse::Json(map) => map.get(name),
            QueryResponse::Plain(_) => None,
        }
    }

    /// `data` array of a `FORMAT JSON` response.
    #[must_use]
    pub fn data(&self) -> Option<&Vec<JsonValue>> {
        self.field("data").and_then(JsonValue::as_array)
    }

    /// `meta` array (column names and types) of a `FORMAT JSON` response.
    #[must_use]
    pub fn meta(&self) -> Option<&Vec<JsonValue>> {
        self.field("meta").and_then(JsonValue::as_array)
    }

    /// `rows` count of a `FORMAT JSON` response.
    #[must_use]
    pub fn rows(&self) -> Option<u64> {
        self.field("rows").and_then(JsonValue::as_u64)
    }

    /// Flatten into the tagged object shape:
    /// `{..fields, "status": "ok", "type": "json"}` or
    /// `{"status": "ok", "type": "plain", "txt": ...}`.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        let kind = self.kind();
        let mut map = match self {
            QueryResponse::Json(map) => map,
            QueryResponse::Plain(text) => {
                let mut map = Map::new();
                map.insert("txt".into(), JsonValue::String(text));
                map
            }
        };
        map.insert("status".into(), JsonValue::String("ok".into()));
        map.insert("type".into(), JsonValue::String(kind.into()));
        JsonValue::Object(map)
    }
}

/// Decode a 200 body in two explicit stages: literal markers first, then a
/// JSON attempt that falls back to plain text on failure.
#[must_use]
pub fn decode_body(text: String) -> QueryResponse {
    if text.is_empty() {
        return QueryResponse::Plain(String::new());
    }
    if text.trim() == OK_MARKER {
        return QueryResponse::Plain(OK_MARKER.to_string());
    }
    match serde_json::from_str::<JsonValue>(&text) {
        Ok(JsonValue::Object(map)) => QueryResponse::Json(map),
        _ => QueryResponse::Plain(text),
    }
}

/// Build the error for a non-200 response.
#[must_use]
pub fn request_error(status_code: u16, body: String) -> RequestError {
    let (code, message) = match ERROR_BANNER.captures(&body) {
        Some(caps) => (
            caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()),
            caps.get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|m| !m.is_empty()),
        ),
        None => (None, None),
    };
    RequestError {
        status_code,
        code,
        message,
        body,
    }
}

/// Classify a completed response.
///
/// # Errors
/// `ClickhouseError::Request` for any status other than 200.
pub fn classify_response(status_code: u16, body: String) -> Result<QueryResponse> {
    if status_code != 200 {
        return Err(ClickhouseError::Request(request_error(status_code, body)));
    }
    Ok(decode_body(body))
}

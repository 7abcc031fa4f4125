use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ClickhouseError>;

#[derive(Debug, Error)]
pub enum ClickhouseError {
    #[error("Connection has not been opened")]
    NotOpen,

    #[error("Connection pool is in fallback mode; request rejected without being sent")]
    FallbackMode,

    #[error("query is required")]
    MissingQuery,

    #[error("`table` is required for insert")]
    MissingTable,

    #[error("`items` are required for insert")]
    MissingItems,

    #[error("`format` is required for stream insert")]
    MissingFormat,

    #[error("The client does not support JSON encoding in [{format}] format")]
    UnsupportedFormat { format: String },

    #[error("Cannot encode values of type {value_type} with {format} format")]
    UnsupportedValueType { value_type: String, format: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ClickhouseError {
    /// Borrow the server-side error when this is a non-200 response.
    #[must_use]
    pub fn as_request_error(&self) -> Option<&RequestError> {
        match self {
            ClickhouseError::Request(err) => Some(err),
            _ => None,
        }
    }

    /// HTTP status of the failed response, if the failure came from the server.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.as_request_error().map(|err| err.status_code)
    }

    /// True for failures raised before any network I/O was attempted.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ClickhouseError::MissingQuery
                | ClickhouseError::MissingTable
                | ClickhouseError::MissingItems
                | ClickhouseError::MissingFormat
                | ClickhouseError::UnsupportedFormat { .. }
                | ClickhouseError::UnsupportedValueType { .. }
        )
    }
}

/// A non-200 answer from the server.
///
/// `code` and `message` are filled in when the body carries the standard
/// `Code: NN, ... Exception: <message>` banner; otherwise only the status and
/// raw body are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub status_code: u16,
    pub code: Option<u32>,
    pub message: Option<String>,
    pub body: String,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(
                f,
                "Clickhouse error {code} (HTTP {}): {message}",
                self.status_code
            ),
            (None, Some(message)) => {
                write!(f, "Clickhouse error (HTTP {}): {message}", self.status_code)
            }
            _ => write!(f, "Clickhouse error (HTTP {}): {}", self.status_code, self.body.trim()),
        }
    }
}

impl std::error::Error for RequestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_display_prefers_parsed_message() {
        let err = RequestError {
            status_code: 404,
            code: Some(60),
            message: Some("Table default.x doesn't exist".into()),
            body: "Code: 60, DB::Exception: Table default.x doesn't exist".into(),
        };
        assert_eq!(
            err.to_string(),
            "Clickhouse error 60 (HTTP 404): Table default.x doesn't exist"
        );

        let wrapped = ClickhouseError::from(err);
        assert_eq!(wrapped.status_code(), Some(404));
        assert!(!wrapped.is_validation());
    }

    #[test]
    fn request_error_display_falls_back_to_body() {
        let err = RequestError {
            status_code: 500,
            code: None,
            message: None,
            body: "boom\n".into(),
        };
        assert_eq!(err.to_string(), "Clickhouse error (HTTP 500): boom");
    }

    #[test]
    fn validation_errors_are_flagged() {
        assert!(ClickhouseError::MissingTable.is_validation());
        assert!(
            ClickhouseError::UnsupportedFormat {
                format: "CSV".into()
            }
            .is_validation()
        );
        assert!(!ClickhouseError::NotOpen.is_validation());
    }
}

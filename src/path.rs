//! Request paths carrying session and query identifiers plus the fixed
//! server settings every request sends.

use url::form_urlencoded;

pub const JSON_SUFFIX: &str = "FORMAT JSON";
pub const JSON_EACH_ROW_SUFFIX: &str = "FORMAT JSONEachRow";

/// Settings appended to every request path.
pub const DEFAULT_SETTINGS: [(&str, &str); 3] = [
    ("session_timeout", "60"),
    ("output_format_json_quote_64bit_integers", "0"),
    ("enable_http_compression", "1"),
];

/// Builds `/?session_id=..&query_id=..[&query=..]&<settings>`.
#[derive(Debug, Clone)]
pub struct RequestPath<'a> {
    session_id: &'a str,
    query_id: &'a str,
    query: Option<&'a str>,
}

impl<'a> RequestPath<'a> {
    #[must_use]
    pub fn new(session_id: &'a str, query_id: &'a str) -> Self {
        Self {
            session_id,
            query_id,
            query: None,
        }
    }

    /// Carry the statement in the URL; used when the body holds data.
    #[must_use]
    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn build(&self) -> String {
        let mut params = form_urlencoded::Serializer::new(String::new());
        params.append_pair("session_id", self.session_id);
        params.append_pair("query_id", self.query_id);
        if let Some(query) = self.query {
            params.append_pair("query", query);
        }
        for (key, value) in DEFAULT_SETTINGS {
            params.append_pair(key, value);
        }
        format!("/?{}", params.finish())
    }
}

/// `INSERT INTO <table> FORMAT <format>`.
#[must_use]
pub fn insert_statement(table: &str, format: &str) -> String {
    format!("INSERT INTO {table} FORMAT {format}")
}

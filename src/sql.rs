//! Client-side parameter substitution.

use std::borrow::Cow;
use std::fmt::Write as _;

use serde_json::Value as JsonValue;

use crate::error::Result;

/// Turns a query template plus positional parameters into final SQL text.
pub trait SqlFormatter: Send + Sync {
    /// # Errors
    /// Implementations may reject parameters they cannot render.
    fn format(&self, sql: &str, params: &[JsonValue]) -> Result<String>;
}

/// Replaces each `?` outside string literals, quoted identifiers and
/// comments with the next parameter, escaped as a ClickHouse literal.
///
/// Rendering:
/// - `null` as `NULL`, booleans and numbers verbatim
/// - strings single-quoted with backslash escapes
/// - a top-level array as a comma-separated list (for `IN (?)`), nested
///   arrays as `[..]` array literals
/// - objects as a quoted JSON string
///
/// Placeholders beyond the last parameter are left as-is; surplus
/// parameters are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionMarkFormatter;

impl SqlFormatter for QuestionMarkFormatter {
    fn format(&self, sql: &str, params: &[JsonValue]) -> Result<String> {
        Ok(substitute(sql, params).into_owned())
    }
}

#[derive(Clone, Copy)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
    LineComment,
    BlockComment,
}

fn substitute<'a>(sql: &'a str, params: &[JsonValue]) -> Cow<'a, str> {
    if params.is_empty() {
        return Cow::Borrowed(sql);
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut copied = 0;
    let mut next_param = params.iter();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'`' => state = State::Backticked,
                b'-' if bytes.get(idx + 1) == Some(&b'-') => state = State::LineComment,
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment;
                    idx += 1;
                }
                b'?' => {
                    if let Some(param) = next_param.next() {
                        out.push_str(&sql[copied..idx]);
                        write_literal(&mut out, param, true);
                        copied = idx + 1;
                    }
                }
                _ => {}
            },
            State::SingleQuoted | State::DoubleQuoted | State::Backticked => {
                let close = match state {
                    State::SingleQuoted => b'\'',
                    State::DoubleQuoted => b'"',
                    _ => b'`',
                };
                if b == b'\\' {
                    idx += 1; // escaped character
                } else if b == close {
                    if bytes.get(idx + 1) == Some(&close) {
                        idx += 1; // doubled quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    if copied == 0 {
        return Cow::Borrowed(sql);
    }
    out.push_str(&sql[copied..]);
    Cow::Owned(out)
}

fn write_literal(out: &mut String, value: &JsonValue, top_level: bool) {
    match value {
        JsonValue::Null => out.push_str("NULL"),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => {
            let _ = write!(out, "{n}");
        }
        JsonValue::String(s) => write_string(out, s),
        JsonValue::Array(items) => {
            if !top_level {
                out.push('[');
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(out, item, false);
            }
            if !top_level {
                out.push(']');
            }
        }
        JsonValue::Object(_) => write_string(out, &value.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\u{8}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
}

/// Drop trailing semicolons (and surrounding whitespace) so a format
/// clause can be appended.
#[must_use]
pub fn strip_trailing_semicolons(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fmt(sql: &str, params: &[JsonValue]) -> String {
        QuestionMarkFormatter.format(sql, params).unwrap()
    }

    #[test]
    fn substitutes_in_order() {
        assert_eq!(
            fmt("SELECT * FROM t WHERE a = ? AND b = ?", &[json!(1), json!("x")]),
            "SELECT * FROM t WHERE a = 1 AND b = 'x'"
        );
    }

    #[test]
    fn escapes_strings() {
        assert_eq!(
            fmt("SELECT ?", &[json!("it's a \\ test\n")]),
            r"SELECT 'it\'s a \\ test\n'"
        );
    }

    #[test]
    fn renders_scalars_and_arrays() {
        assert_eq!(
            fmt(
                "SELECT ?, ?, ? WHERE id IN (?)",
                &[json!(null), json!(true), json!(1.5), json!([1, 2, [3, "a"]])]
            ),
            "SELECT NULL, true, 1.5 WHERE id IN (1, 2, [3, 'a'])"
        );
        assert_eq!(fmt("SELECT ?", &[json!({"k": 1})]), r#"SELECT '{"k":1}'"#);
    }

    #[test]
    fn skips_literals_identifiers_and_comments() {
        let sql = "SELECT '?', \"?\", `?`, 'it\\'s ?' -- ?\n/* ? */ , ?";
        assert_eq!(
            fmt(sql, &[json!(7)]),
            "SELECT '?', \"?\", `?`, 'it\\'s ?' -- ?\n/* ? */ , 7"
        );
    }

    #[test]
    fn leftover_placeholders_are_kept() {
        assert_eq!(fmt("SELECT ?, ?", &[json!("a")]), "SELECT 'a', ?");
        assert_eq!(fmt("SELECT 1", &[json!("unused")]), "SELECT 1");
    }

    #[test]
    fn no_params_borrows() {
        assert!(matches!(substitute("SELECT ?", &[]), Cow::Borrowed(_)));
    }

    #[test]
    fn multibyte_text_survives() {
        assert_eq!(fmt("SELECT 'ü', ?", &[json!("ß")]), "SELECT 'ü', 'ß'");
    }

    #[test]
    fn trailing_semicolons_are_stripped() {
        assert_eq!(strip_trailing_semicolons("SELECT 1;;  \n"), "SELECT 1");
        assert_eq!(strip_trailing_semicolons("SELECT ';'"), "SELECT ';'");
    }
}

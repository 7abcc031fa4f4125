//! Output/input serialization formats understood by the client.
//!
//! Formats fall into three fixed families:
//! - single-document JSON: the whole response is one JSON document
//! - streamable JSON: one JSON value per line
//! - raw tabular: CSV/TSV/CustomSeparated bytes passed through untouched

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ClickhouseError, Result};

/// Family a format name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    SingleDocumentJson,
    StreamableJson,
    RawTabular,
    Unsupported,
}

macro_rules! formats {
    ($($variant:ident => $name:literal, $kind:ident;)+) => {
        /// A format known to the registry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Format {
            $($variant,)+
        }

        impl Format {
            /// Every registered format.
            pub const ALL: &'static [Format] = &[$(Format::$variant,)+];

            /// Name as written after `FORMAT` in SQL.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Format::$variant => $name,)+
                }
            }

            #[must_use]
            pub fn kind(self) -> FormatKind {
                match self {
                    $(Format::$variant => FormatKind::$kind,)+
                }
            }

            /// Exact, case-sensitive lookup.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Format> {
                match name {
                    $($name => Some(Format::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

formats! {
    Json => "JSON", SingleDocumentJson;
    JsonStrings => "JSONStrings", SingleDocumentJson;
    JsonCompact => "JSONCompact", SingleDocumentJson;
    JsonCompactStrings => "JSONCompactStrings", SingleDocumentJson;
    JsonColumnsWithMetadata => "JSONColumnsWithMetadata", SingleDocumentJson;
    JsonObjectEachRow => "JSONObjectEachRow", SingleDocumentJson;
    JsonEachRow => "JSONEachRow", StreamableJson;
    JsonStringsEachRow => "JSONStringsEachRow", StreamableJson;
    JsonCompactEachRow => "JSONCompactEachRow", StreamableJson;
    JsonCompactStringsEachRow => "JSONCompactStringsEachRow", StreamableJson;
    JsonCompactEachRowWithNames => "JSONCompactEachRowWithNames", StreamableJson;
    JsonCompactEachRowWithNamesAndTypes => "JSONCompactEachRowWithNamesAndTypes", StreamableJson;
    JsonCompactStringsEachRowWithNames => "JSONCompactStringsEachRowWithNames", StreamableJson;
    JsonCompactStringsEachRowWithNamesAndTypes =>
        "JSONCompactStringsEachRowWithNamesAndTypes", StreamableJson;
    Csv => "CSV", RawTabular;
    CsvWithNames => "CSVWithNames", RawTabular;
    CsvWithNamesAndTypes => "CSVWithNamesAndTypes", RawTabular;
    TabSeparated => "TabSeparated", RawTabular;
    TabSeparatedRaw => "TabSeparatedRaw", RawTabular;
    TabSeparatedWithNames => "TabSeparatedWithNames", RawTabular;
    TabSeparatedWithNamesAndTypes => "TabSeparatedWithNamesAndTypes", RawTabular;
    CustomSeparated => "CustomSeparated", RawTabular;
    CustomSeparatedWithNames => "CustomSeparatedWithNames", RawTabular;
    CustomSeparatedWithNamesAndTypes => "CustomSeparatedWithNamesAndTypes", RawTabular;
}

impl Format {
    #[must_use]
    pub fn is_json(self) -> bool {
        matches!(
            self.kind(),
            FormatKind::SingleDocumentJson | FormatKind::StreamableJson
        )
    }

    #[must_use]
    pub fn is_streamable_json(self) -> bool {
        self.kind() == FormatKind::StreamableJson
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = ClickhouseError;

    fn from_str(s: &str) -> Result<Self> {
        Format::from_name(s).ok_or_else(|| ClickhouseError::UnsupportedFormat {
            format: s.to_string(),
        })
    }
}

/// Classify an arbitrary format name. Names outside the registry are
/// `Unsupported`.
#[must_use]
pub fn classify(name: &str) -> FormatKind {
    Format::from_name(name).map_or(FormatKind::Unsupported, Format::kind)
}

/// Serialize `value` as one JSON document terminated by `\n`.
///
/// # Errors
/// `UnsupportedFormat` when `format` is not a JSON-family format; a
/// serialization failure is surfaced as `ClickhouseError::Json`.
pub fn encode_json<T: Serialize + ?Sized>(value: &T, format: Format) -> Result<String> {
    ensure_json(format)?;
    let mut out = serde_json::to_string(value)?;
    out.push('\n');
    Ok(out)
}

pub(crate) fn ensure_json(format: Format) -> Result<()> {
    if format.is_json() {
        Ok(())
    } else {
        Err(ClickhouseError::UnsupportedFormat {
            format: format.name().to_string(),
        })
    }
}

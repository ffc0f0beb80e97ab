//! Type coercion from raw CSV text to SQLite values
//!
//! The upstream extracts are plain text with no type information, so every
//! value is coerced by the destination column's declared type. Coercion never
//! fails per row: anything unparseable becomes NULL and the row still loads.
//! Only an unrecognized declared type is an error, raised once per table
//! before any row is read.

use chrono::NaiveDate;
use rusqlite::types::Value;

use crate::error::{IngestError, Result};

/// Date formats tried after the primary format, in order.
const DATE_FALLBACK_FORMATS: [&str; 4] = ["%m-%d-%Y", "%Y/%m/%d", "%Y-%m-%d", "%Y%m%d"];

/// Default primary date format used by the upstream extracts.
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";

/// Parse an integer the way the loader does: trim, then parse, else None.
pub fn parse_integer(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Parse a real number: trim, then parse, else None.
pub fn parse_real(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

/// Trim text; empty input becomes None so it loads as NULL.
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Date parser that remembers the last format that worked.
///
/// Source files are internally consistent, so after the first successful
/// parse the remembered format almost always succeeds on the first try.
#[derive(Debug, Clone)]
pub struct DateParser {
    formats: Vec<String>,
    last: usize,
}

impl DateParser {
    /// Create a parser with the default primary format.
    pub fn new() -> Self {
        Self::with_primary(DEFAULT_DATE_FORMAT)
    }

    /// Create a parser that tries `primary` before the fallback formats.
    pub fn with_primary(primary: &str) -> Self {
        let mut formats = vec![primary.to_string()];
        for fmt in DATE_FALLBACK_FORMATS {
            if fmt != primary {
                formats.push(fmt.to_string());
            }
        }
        Self { formats, last: 0 }
    }

    /// Parse a date, trying the remembered format first.
    pub fn parse(&mut self, raw: &str) -> Option<NaiveDate> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, &self.formats[self.last]) {
            return Some(date);
        }

        for (i, fmt) in self.formats.iter().enumerate() {
            if i == self.last {
                continue;
            }
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
                self.last = i;
                return Some(date);
            }
        }

        None
    }
}

impl Default for DateParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-column converter bound to a destination column's declared type.
///
/// Dates carry their own parser instance so the format memory is per column,
/// matching how each source column sticks to one format.
#[derive(Debug, Clone)]
pub enum Coercer {
    Integer,
    Real,
    Text,
    Date(DateParser),
}

impl Coercer {
    /// Build a coercer from a declared column type as reported by
    /// `PRAGMA TABLE_INFO`.
    ///
    /// Recognized declared types (length suffixes like `CHAR(10)` are
    /// ignored): `INTEGER`/`INT`, `REAL`, `TEXT`/`CHAR`, `DATE`. Anything
    /// else is a configuration error naming the table and column.
    pub fn for_column(table: &str, column: &str, declared: &str) -> Result<Self> {
        let base = declared
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_uppercase();

        match base.as_str() {
            "INTEGER" | "INT" => Ok(Coercer::Integer),
            "REAL" => Ok(Coercer::Real),
            "TEXT" | "CHAR" => Ok(Coercer::Text),
            "DATE" => Ok(Coercer::Date(DateParser::new())),
            _ => Err(IngestError::unsupported_column_type(table, column, declared)),
        }
    }

    /// Coerce one raw value. Unparseable input yields `Value::Null`.
    ///
    /// Dates are stored in ISO form (`YYYY-MM-DD`) regardless of the source
    /// format.
    pub fn coerce(&mut self, raw: &str) -> Value {
        match self {
            Coercer::Integer => parse_integer(raw).map(Value::Integer).unwrap_or(Value::Null),
            Coercer::Real => parse_real(raw).map(Value::Real).unwrap_or(Value::Null),
            Coercer::Text => clean_text(raw).map(Value::Text).unwrap_or(Value::Null),
            Coercer::Date(parser) => parser
                .parse(raw)
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("123456789"), Some(123456789));
        assert_eq!(parse_integer("  42  "), Some(42));
        assert_eq!(parse_integer("0000123456"), Some(123456));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("12.0"), None);
        assert_eq!(parse_integer("abc"), None);
        assert_eq!(parse_integer(""), None);
    }

    #[test]
    fn test_parse_real() {
        assert_eq!(parse_real("481234.5"), Some(481234.5));
        assert_eq!(parse_real(" 3 "), Some(3.0));
        assert_eq!(parse_real("n/a"), None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Smith Well  "), Some("Smith Well".to_string()));
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn test_date_parser_default_format() {
        let mut parser = DateParser::new();
        assert_eq!(
            parser.parse("01/15/2020"),
            NaiveDate::from_ymd_opt(2020, 1, 15)
        );
    }

    #[test]
    fn test_date_parser_remembers_format() {
        let mut parser = DateParser::new();
        // First parse falls through to the ISO fallback.
        assert_eq!(
            parser.parse("2020-03-04"),
            NaiveDate::from_ymd_opt(2020, 3, 4)
        );
        // The remembered format now parses compatible input directly.
        assert_eq!(
            parser.parse("2021-12-31"),
            NaiveDate::from_ymd_opt(2021, 12, 31)
        );
        // Switching back to the primary format still works.
        assert_eq!(
            parser.parse("06/01/1999"),
            NaiveDate::from_ymd_opt(1999, 6, 1)
        );
    }

    #[test]
    fn test_date_parser_compact_format() {
        let mut parser = DateParser::new();
        assert_eq!(
            parser.parse("19991231"),
            NaiveDate::from_ymd_opt(1999, 12, 31)
        );
    }

    #[test]
    fn test_coercion_never_raises() {
        let mut coercers = vec![
            Coercer::Integer,
            Coercer::Real,
            Coercer::Date(DateParser::new()),
        ];
        for coercer in &mut coercers {
            assert_eq!(coercer.coerce("not a value ##"), Value::Null);
            assert_eq!(coercer.coerce(""), Value::Null);
        }

        // Text keeps anything non-empty and nulls only blank input.
        let mut text = Coercer::Text;
        assert_eq!(
            text.coerce("not a value ##"),
            Value::Text("not a value ##".to_string())
        );
        assert_eq!(text.coerce("   "), Value::Null);
    }

    #[test]
    fn test_coercer_for_column() {
        assert!(matches!(
            Coercer::for_column("c4ix", "wellid", "INTEGER"),
            Ok(Coercer::Integer)
        ));
        assert!(matches!(
            Coercer::for_column("c4ix", "RELATEID", "CHAR(10)"),
            Ok(Coercer::Text)
        ));
        assert!(matches!(
            Coercer::for_column("c4locs", "GEOC_DATE", "DATE"),
            Ok(Coercer::Date(_))
        ));
        assert!(matches!(
            Coercer::for_column("c4wl", "DEPTH", "BLOB"),
            Err(IngestError::UnsupportedColumnType { .. })
        ));
    }

    #[test]
    fn test_date_coerces_to_iso_text() {
        let mut coercer = Coercer::Date(DateParser::new());
        assert_eq!(
            coercer.coerce("07/04/2019"),
            Value::Text("2019-07-04".to_string())
        );
    }
}

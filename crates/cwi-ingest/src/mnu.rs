//! Canonical well-identifier normalization (MNU format)
//!
//! Well identifiers arrive in several surface spellings: bare digits with or
//! without leading zeros, and letter-prefixed series such as `H123456`. The
//! canonical form is 10 characters: bare digits zero-padded to 10, or an
//! uppercased letter followed by the digits zero-padded to 9. Everything in
//! the pipeline compares identifiers in canonical form only.
//!
//! The normalizer is pure so it can also run inside SQL: it is registered on
//! every connection as the scalar function `MNU_FORMAT(value, default)`,
//! which the bulk UPDATE statements and the identifier views call per row.

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;

/// Normalize an identifier into canonical MNU form.
///
/// Returns `None` when the input is not recognizable as an identifier; the
/// caller (or the SQL function's second argument) supplies the fallback.
///
/// ```
/// use cwi_ingest::mnu::format_identifier;
///
/// assert_eq!(format_identifier("123456").as_deref(), Some("0000123456"));
/// assert_eq!(format_identifier("h123456").as_deref(), Some("H000123456"));
/// assert_eq!(format_identifier("not-a-well"), None);
/// ```
pub fn format_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Some(format!("{trimmed:0>10}"));
    }

    let mut chars = trimmed.chars();
    let prefix = chars.next()?;
    let digits = chars.as_str();
    if prefix.is_ascii_alphabetic()
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Some(format!("{}{digits:0>9}", prefix.to_ascii_uppercase()));
    }

    None
}

/// Register `MNU_FORMAT(value, default)` on a connection.
///
/// The function is deterministic and total: a NULL or unrecognizable first
/// argument yields the second argument unchanged. Numeric arguments are
/// formatted as text first, since the raw columns are not always declared
/// TEXT in older source dumps.
pub fn register_mnu_format(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "MNU_FORMAT",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx: &Context| {
            let fallback = match text_arg(ctx, 1) {
                Some(text) => Value::Text(text),
                None => Value::Null,
            };
            Ok(match text_arg(ctx, 0).as_deref().and_then(format_identifier) {
                Some(canonical) => Value::Text(canonical),
                None => fallback,
            })
        },
    )
}

/// Read one SQL argument as text, tolerating numeric storage classes.
fn text_arg(ctx: &Context, idx: usize) -> Option<String> {
    match ctx.get_raw(idx) {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => None,
    }
}

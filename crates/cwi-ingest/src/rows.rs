//! Row sources feeding the table loader
//!
//! Each source yields value tuples ordered exactly as the loader's column
//! list, one pass, never restarted. Three shapes exist: plain CSV rows,
//! CSV rows with a derived leading wellid, and location attribute rows that
//! carry a located/unlocated flag in place of the source's first field.
//!
//! The structured-file reader behind the location extracts is a trait seam;
//! the shipped implementation reads the attribute-table CSV exports. A dbf
//! reader can be dropped in behind `AttributeSource` without touching the
//! loader.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ReaderBuilder, StringRecordsIntoIter};
use rusqlite::types::Value;
use tracing::warn;

use crate::coerce::{parse_integer, Coercer};
use crate::error::{IngestError, Result};

/// Column the leading wellid is derived from when the header lacks one.
pub const WELLID_SOURCE_COLUMN: &str = "RELATEID";

/// Strip non-ASCII bytes from a file in place.
///
/// The upstream extracts occasionally carry stray 8-bit characters that
/// break naive consumers, so files are cleaned before the header is read.
/// Returns whether any bytes were dropped.
pub fn force_to_ascii(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path)?;
    if bytes.is_ascii() {
        return Ok(false);
    }

    let cleaned: Vec<u8> = bytes.iter().copied().filter(u8::is_ascii).collect();
    let dropped = bytes.len() - cleaned.len();
    std::fs::write(path, &cleaned)?;
    warn!(
        path = %path.display(),
        dropped,
        "Dropped non-ASCII bytes from extract"
    );
    Ok(true)
}

/// Read the column names from an extract's header line.
///
/// Quotes and commas are treated as whitespace, matching how the upstream
/// writes headers (no embedded spaces in column names).
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;

    let names: Vec<String> = line
        .replace(['"', ','], " ")
        .split_whitespace()
        .map(str::to_string)
        .collect();
    Ok(names)
}

/// Streaming rows from a table extract.
///
/// Yields one coerced tuple per CSV record, optionally prefixed with a
/// wellid parsed from the relate-ID column. A relate-ID that fails to parse
/// produces a NULL wellid; the row is still yielded.
pub struct CsvRows {
    records: StringRecordsIntoIter<File>,
    indices: Vec<usize>,
    coercers: Vec<Coercer>,
    wellid_from: Option<usize>,
}

// Manual impl: `StringRecordsIntoIter` has no `Debug`.
impl std::fmt::Debug for CsvRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvRows")
            .field("indices", &self.indices)
            .field("coercers", &self.coercers)
            .field("wellid_from", &self.wellid_from)
            .finish_non_exhaustive()
    }
}

impl CsvRows {
    /// Open an extract and bind the selected columns.
    ///
    /// `columns` must appear in the extract's header (matched
    /// case-insensitively); `coercers` aligns with `columns`.
    pub fn open(path: &Path, columns: &[String], coercers: Vec<Coercer>) -> Result<Self> {
        Self::build(path, columns, coercers, None)
    }

    /// Like [`CsvRows::open`], but each row gains a leading wellid parsed
    /// from `id_column`.
    pub fn open_with_wellid(
        path: &Path,
        columns: &[String],
        coercers: Vec<Coercer>,
        id_column: &str,
    ) -> Result<Self> {
        Self::build(path, columns, coercers, Some(id_column))
    }

    fn build(
        path: &Path,
        columns: &[String],
        coercers: Vec<Coercer>,
        id_column: Option<&str>,
    ) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut indices = Vec::with_capacity(columns.len());
        for column in columns {
            let idx = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(column))
                .ok_or_else(|| {
                    IngestError::config(format!(
                        "column '{}' not present in '{}'",
                        column,
                        path.display()
                    ))
                })?;
            indices.push(idx);
        }

        let wellid_from = match id_column {
            Some(name) => Some(
                headers
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(name))
                    .ok_or_else(|| {
                        IngestError::config(format!(
                            "wellid source column '{}' not present in '{}'",
                            name,
                            path.display()
                        ))
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            records: reader.into_records(),
            indices,
            coercers,
            wellid_from,
        })
    }

    /// Number of values each yielded row carries.
    pub fn width(&self) -> usize {
        self.indices.len() + usize::from(self.wellid_from.is_some())
    }
}

impl Iterator for CsvRows {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };

        let mut row = Vec::with_capacity(self.width());
        if let Some(idx) = self.wellid_from {
            let raw = record.get(idx).unwrap_or_default();
            row.push(parse_integer(raw).map(Value::Integer).unwrap_or(Value::Null));
        }
        for (pos, &idx) in self.indices.iter().enumerate() {
            let raw = record.get(idx).unwrap_or_default();
            row.push(self.coercers[pos].coerce(raw));
        }
        Some(Ok(row))
    }
}

/// Column-oriented records from a structured location extract.
///
/// Implementations surface the declared field order; the first field is the
/// reader's bookkeeping column and never carries data.
pub trait AttributeSource {
    /// Field names as declared by the source, in order.
    fn field_names(&self) -> &[String];

    /// The next record's raw values, aligned with [`field_names`].
    ///
    /// [`field_names`]: AttributeSource::field_names
    fn next_record(&mut self) -> Option<Result<Vec<String>>>;
}

/// CSV-backed attribute source, covering the attribute-table exports that
/// ship next to the shapefiles.
pub struct CsvAttributeSource {
    field_names: Vec<String>,
    records: StringRecordsIntoIter<File>,
}

impl CsvAttributeSource {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
        let field_names = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            field_names,
            records: reader.into_records(),
        })
    }
}

impl AttributeSource for CsvAttributeSource {
    fn field_names(&self) -> &[String] {
        &self.field_names
    }

    fn next_record(&mut self) -> Option<Result<Vec<String>>> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        Some(Ok(record.iter().map(str::to_string).collect()))
    }
}

/// Location category flag derived from an extract's file name.
pub fn location_flag(file_name: &str) -> &'static str {
    if file_name.to_lowercase().contains("unloc") {
        "unloc"
    } else {
        "loc"
    }
}

/// Rows for the locations table, adapted from an [`AttributeSource`].
///
/// Each yielded tuple starts with the located/unlocated flag, then the
/// selected attribute fields coerced by destination type. The source's
/// first field is never consulted.
pub struct LocsRows<S: AttributeSource> {
    source: S,
    flag: String,
    bindings: Vec<(usize, Coercer)>,
}

// Manual impl: sources (e.g. `CsvAttributeSource`) need not be `Debug`.
impl<S: AttributeSource> std::fmt::Debug for LocsRows<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocsRows")
            .field("flag", &self.flag)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl<S: AttributeSource> LocsRows<S> {
    /// Bind destination columns to source fields.
    ///
    /// `columns` are matched case-insensitively against the source's fields
    /// after the first; `file_name` decides the flag value.
    pub fn new(
        source: S,
        file_name: &str,
        columns: &[String],
        coercers: Vec<Coercer>,
    ) -> Result<Self> {
        let fields = source.field_names();
        let mut bindings = Vec::with_capacity(columns.len());
        for (column, coercer) in columns.iter().zip(coercers) {
            let idx = fields
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, f)| f.eq_ignore_ascii_case(column))
                .map(|(i, _)| i)
                .ok_or_else(|| {
                    IngestError::config(format!(
                        "location field '{column}' not present in '{file_name}'"
                    ))
                })?;
            bindings.push((idx, coercer));
        }

        Ok(Self {
            source,
            flag: location_flag(file_name).to_string(),
            bindings,
        })
    }
}

impl<S: AttributeSource> Iterator for LocsRows<S> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.source.next_record()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };

        let mut row = Vec::with_capacity(self.bindings.len() + 1);
        row.push(Value::Text(self.flag.clone()));
        for (idx, coercer) in &mut self.bindings {
            let raw = record.get(*idx).map(String::as_str).unwrap_or_default();
            row.push(coercer.coerce(raw));
        }
        Some(Ok(row))
    }
}

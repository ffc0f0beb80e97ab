//! Incremental table loading from extracts
//!
//! Each destination table loads at most once: a populated table is skipped,
//! so a re-run never duplicates rows (and never repairs a partial load; use
//! refresh for that). Loading streams every adapted row through one
//! prepared insert inside the session transaction. The loader never deletes
//! on its own; `delete_table_data` is the explicit refresh path.

use std::path::Path;

use indicatif::ProgressBar;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::{debug, info, warn};

use crate::coerce::Coercer;
use crate::config::{data_tables, CwiConfig, LOCS_FLAG_COLUMN, LOCS_TABLE};
use crate::db::{placeholders, WellDb};
use crate::error::{IngestError, Result};
use crate::rows::{
    force_to_ascii, location_flag, read_header, AttributeSource, CsvAttributeSource, CsvRows,
    WELLID_SOURCE_COLUMN,
};

/// Outcome of loading one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The table already held rows; nothing was loaded.
    Skipped { existing: i64 },
    /// Rows were streamed in.
    Loaded { inserted: usize },
}

/// Outcome of loading the locations table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocsOutcome {
    /// c4locs already held rows; nothing was loaded.
    Skipped { existing: i64 },
    /// The single-file c4locs extract was loaded.
    LoadedCsv { inserted: usize },
    /// The located/unlocated attribute pair was loaded.
    LoadedAttributes { inserted: usize, files: Vec<String> },
    /// No location extract was found; the table is left empty.
    NoSource,
}

/// Load one data table from its extract.
///
/// The extract's header is intersected case-insensitively with the table's
/// columns; extract columns with no destination are ignored. When
/// `schema_has_constraints` is set and the header carries no WELLID column,
/// each row gains a leading wellid parsed from the relate-ID so
/// foreign-key ordering holds from the first insert.
///
/// # Errors
///
/// Fatal when the table does not exist (the schema step must run first),
/// when the extract is missing, or when a destination column declares an
/// unsupported type.
pub fn load_table(
    db: &WellDb,
    table: &str,
    csv_path: &Path,
    schema_has_constraints: bool,
) -> Result<LoadOutcome> {
    if !db.table_exists(table)? {
        return Err(IngestError::table_missing(table));
    }

    let existing = db.row_count(table)?;
    if existing > 0 {
        info!(table, existing, "Table already loaded, skipping");
        return Ok(LoadOutcome::Skipped { existing });
    }

    if !csv_path.exists() {
        return Err(IngestError::config(format!(
            "extract '{}' not found; run 'cwi-ingest download' first",
            csv_path.display()
        )));
    }

    force_to_ascii(csv_path)?;
    let header = read_header(csv_path)?;
    let table_columns = db.column_info(table)?;

    // Intersection keeps the extract's column order and spelling; declared
    // types come from the table side.
    let mut columns: Vec<String> = Vec::new();
    let mut coercers: Vec<Coercer> = Vec::new();
    for name in &header {
        if let Some(column) = table_columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
        {
            columns.push(name.clone());
            coercers.push(Coercer::for_column(table, &column.name, &column.declared)?);
        }
    }
    if columns.is_empty() {
        return Err(IngestError::config(format!(
            "no columns of '{}' match table '{table}'",
            csv_path.display()
        )));
    }

    let prepend_wellid =
        schema_has_constraints && !header.iter().any(|h| h.eq_ignore_ascii_case("WELLID"));

    let mut insert_columns: Vec<String> = Vec::new();
    if prepend_wellid {
        insert_columns.push("wellid".to_string());
    }
    insert_columns.extend(columns.iter().cloned());

    let rows = if prepend_wellid {
        CsvRows::open_with_wellid(csv_path, &columns, coercers, WELLID_SOURCE_COLUMN)?
    } else {
        CsvRows::open(csv_path, &columns, coercers)?
    };

    let inserted = stream_insert(db, table, &insert_columns, rows)?;
    info!(table, inserted, "Table loaded");
    Ok(LoadOutcome::Loaded { inserted })
}

/// Load the locations table.
///
/// The single-file `c4locs.csv` extract takes precedence; otherwise the
/// located/unlocated attribute pair is loaded with the category flag
/// derived from each file's name. With no source present the table stays
/// empty and `NoSource` is returned.
pub fn load_locs(db: &WellDb, config: &CwiConfig) -> Result<LocsOutcome> {
    if !db.table_exists(LOCS_TABLE)? {
        return Err(IngestError::table_missing(LOCS_TABLE));
    }

    let existing = db.row_count(LOCS_TABLE)?;
    if existing > 0 {
        info!(table = LOCS_TABLE, existing, "Locations already loaded, skipping");
        return Ok(LocsOutcome::Skipped { existing });
    }

    let csv = config.locs_csv_path();
    if csv.exists() {
        return match load_table(
            db,
            LOCS_TABLE,
            &csv,
            config.capabilities().has_foreign_key_constraints,
        )? {
            LoadOutcome::Loaded { inserted } => Ok(LocsOutcome::LoadedCsv { inserted }),
            LoadOutcome::Skipped { existing } => Ok(LocsOutcome::Skipped { existing }),
        };
    }

    let mut files: Vec<String> = Vec::new();
    let mut inserted = 0usize;
    for path in [config.located_attrs_path(), config.unlocated_attrs_path()] {
        let name = file_name(&path);
        if !path.exists() {
            warn!(path = %path.display(), "Location extract missing");
            continue;
        }
        force_to_ascii(&path)?;
        let source = CsvAttributeSource::open(&path)?;
        inserted += append_locs(db, source, &name)?;
        files.push(name);
    }

    if files.is_empty() {
        warn!("No location extracts found, c4locs left empty");
        return Ok(LocsOutcome::NoSource);
    }
    info!(inserted, ?files, "Locations loaded");
    Ok(LocsOutcome::LoadedAttributes { inserted, files })
}

/// Append rows from one attribute source into the locations table.
///
/// Public so a different structured-file reader can feed c4locs through the
/// same path; `file_name` decides the located/unlocated flag.
pub fn append_locs<S: AttributeSource>(db: &WellDb, source: S, file_name: &str) -> Result<usize> {
    let table_columns = db.column_info(LOCS_TABLE)?;

    let mut columns: Vec<String> = Vec::new();
    let mut coercers: Vec<Coercer> = Vec::new();
    for field in source.field_names().iter().skip(1) {
        if field.eq_ignore_ascii_case(LOCS_FLAG_COLUMN) {
            continue;
        }
        if let Some(column) = table_columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(field))
        {
            columns.push(field.clone());
            coercers.push(Coercer::for_column(
                LOCS_TABLE,
                &column.name,
                &column.declared,
            )?);
        }
    }
    if columns.is_empty() {
        return Err(IngestError::config(format!(
            "no fields of '{file_name}' match table '{LOCS_TABLE}'"
        )));
    }

    let rows = crate::rows::LocsRows::new(source, file_name, &columns, coercers)?;

    let mut insert_columns = vec![LOCS_FLAG_COLUMN.to_string()];
    insert_columns.extend(columns);

    let inserted = stream_insert(db, LOCS_TABLE, &insert_columns, rows)?;
    debug!(file_name, inserted, "Appended location rows");
    Ok(inserted)
}

/// Stream rows through one prepared insert inside the session transaction.
pub(crate) fn stream_insert(
    db: &WellDb,
    table: &str,
    columns: &[String],
    rows: impl Iterator<Item = Result<Vec<Value>>>,
) -> Result<usize> {
    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    let sql = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        quoted.join(","),
        placeholders(columns.len())
    );

    db.begin()?;
    let mut stmt = db.conn().prepare(&sql)?;

    let progress = ProgressBar::new_spinner();
    progress.set_message(format!("loading {table}"));

    let mut inserted = 0usize;
    for row in rows {
        stmt.execute(params_from_iter(row?))?;
        inserted += 1;
        progress.inc(1);
    }
    progress.finish_and_clear();
    Ok(inserted)
}

/// Clear tables whose extract is present, then compact.
///
/// Data tables with a missing extract are left as is (with a warning), so a
/// refresh can never empty a table it cannot refill. Location rows are
/// deleted per category flag when only one of the attribute pair is
/// present.
pub fn delete_table_data(db: &WellDb, config: &CwiConfig) -> Result<()> {
    db.begin()?;

    for table in data_tables() {
        let csv = config.data_csv_path(&table);
        if csv.exists() {
            let deleted = db.execute(&format!("DELETE FROM \"{table}\""), [])?;
            info!(table = %table, deleted, "Cleared table for refresh");
        } else {
            warn!(
                table = %table,
                path = %csv.display(),
                "Extract missing, table left as is"
            );
        }
    }

    if config.capabilities().has_locations && db.table_exists(LOCS_TABLE)? {
        if config.locs_csv_path().exists() {
            let deleted = db.execute(&format!("DELETE FROM \"{LOCS_TABLE}\""), [])?;
            info!(table = LOCS_TABLE, deleted, "Cleared locations for refresh");
        } else {
            for path in [config.located_attrs_path(), config.unlocated_attrs_path()] {
                if path.exists() {
                    let flag = location_flag(&file_name(&path));
                    let deleted = db.execute(
                        &format!("DELETE FROM \"{LOCS_TABLE}\" WHERE {LOCS_FLAG_COLUMN} = ?1"),
                        [flag],
                    )?;
                    info!(flag, deleted, "Cleared location category for refresh");
                }
            }
        }
    }

    db.commit()?;
    db.vacuum()?;
    Ok(())
}

/// Backfill wellid from the relate-ID and ensure the per-table index.
pub fn populate_wellid_and_index(db: &WellDb, tables: &[String]) -> Result<()> {
    db.begin()?;
    for table in tables {
        let updated = db.execute(
            &format!(
                "UPDATE \"{table}\" SET wellid = CAST(RELATEID AS INTEGER) \
                 WHERE wellid IS NULL"
            ),
            [],
        )?;
        db.conn().execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_wellid ON \"{table}\" (wellid)"
        ))?;
        debug!(table = %table, updated, "Backfilled wellid and ensured index");
    }
    Ok(())
}

/// Rewrite UNIQUE_NO as the textual wellid, dropping leading zeros.
pub fn update_unique_no_from_wellid(db: &WellDb, table: &str) -> Result<usize> {
    db.begin()?;
    let updated = db.execute(
        &format!("UPDATE \"{table}\" SET UNIQUE_NO = CAST(wellid AS TEXT)"),
        [],
    )?;
    info!(table, updated, "Reformatted UNIQUE_NO from wellid");
    Ok(updated)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

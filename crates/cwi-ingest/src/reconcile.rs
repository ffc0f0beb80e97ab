//! Sealed-well reconciliation
//!
//! Sealed-well records arrive from the well-management geodatabase with
//! identifiers that may or may not already exist in the index. Each record
//! moves through ordered passes keyed by `(wellid, mmid)`: identifier
//! normalization, matching against the primary and secondary identifier
//! indexes, duplicate suppression, and synthetic identifier assignment for
//! records no index knows. Resolved records are then appended into the main
//! tables. Every pass selects only rows still in an earlier state, so the
//! whole sequence can be re-run without changing settled rows.

use std::path::Path;

use rusqlite::params;
use tracing::{debug, info, warn};

use crate::coerce::Coercer;
use crate::db::WellDb;
use crate::error::{IngestError, Result};
use crate::loader::{stream_insert, LoadOutcome};
use crate::rows::{force_to_ascii, read_header, CsvRows};

/// Staging table for sealed-well records.
pub const SEALED_TABLE: &str = "wmsealed";

/// Base of the numeric band reserved for synthetic offset identifiers.
/// No real well ever receives a wellid at or above this value.
pub const SYNTHETIC_OFFSET_BASE: i64 = 8_000_000_000;

/// Terminal match states of a sealed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// Canonical identifier matched the primary identifier view.
    MatchedPrimary,
    /// Canonical identifier matched the full identifier cross reference.
    MatchedSecondary,
    /// A matched record sharing its wellid with a lexicographically
    /// smaller identifier; excluded from all appends.
    DuplicateSuppressed,
    /// All-digit identifier with no match; wellid is the identifier value.
    SyntheticDirect,
    /// Letter-prefixed identifier with no match; wellid is offset into the
    /// synthetic band.
    SyntheticOffset,
}

impl MatchStatus {
    /// The mmid code stored on the record.
    pub fn code(self) -> i64 {
        match self {
            MatchStatus::MatchedPrimary => 50,
            MatchStatus::MatchedSecondary => 51,
            MatchStatus::DuplicateSuppressed => 52,
            MatchStatus::SyntheticDirect => 56,
            MatchStatus::SyntheticOffset => 58,
        }
    }

    /// Decode a stored mmid.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            50 => Some(MatchStatus::MatchedPrimary),
            51 => Some(MatchStatus::MatchedSecondary),
            52 => Some(MatchStatus::DuplicateSuppressed),
            56 => Some(MatchStatus::SyntheticDirect),
            58 => Some(MatchStatus::SyntheticOffset),
            _ => None,
        }
    }

    /// Whether records in this state participate in appends.
    pub fn appendable(self) -> bool {
        !matches!(self, MatchStatus::DuplicateSuppressed)
    }
}

/// Per-pass counts for one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Rows newly loaded into the staging table, when the load ran.
    pub loaded: Option<usize>,
    /// Records matched through the primary identifier view (mmid 50).
    pub matched_primary: usize,
    /// Records matched through the cross reference (mmid 51).
    pub matched_secondary: usize,
    /// Records suppressed as duplicates (mmid 52).
    pub duplicates_suppressed: usize,
    /// Records given their identifier value as wellid (mmid 56).
    pub synthetic_direct: usize,
    /// Records given an offset-band wellid (mmid 58).
    pub synthetic_offset: usize,
    /// New wells appended into the index table.
    pub appended_wells: usize,
    /// Remark rows merged for already-known wells.
    pub merged_remarks: usize,
    /// Records left with no wellid and no mmid after every pass.
    pub unresolved: i64,
}

impl ReconcileReport {
    /// True when every staged record reached a terminal state.
    pub fn is_success(&self) -> bool {
        self.unresolved == 0
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "matched {} primary / {} secondary, {} duplicates suppressed, \
             {} synthetic direct, {} synthetic offset, {} wells appended, \
             {} remarks merged, {} unresolved",
            self.matched_primary,
            self.matched_secondary,
            self.duplicates_suppressed,
            self.synthetic_direct,
            self.synthetic_offset,
            self.appended_wells,
            self.merged_remarks,
            self.unresolved
        )
    }
}

/// Create the staging table when missing.
pub fn ensure_sealed_table(db: &WellDb) -> Result<()> {
    db.begin()?;
    db.conn().execute_batch(
        "CREATE TABLE IF NOT EXISTS wmsealed (
            irow INT,
            wellid INT,
            MNUNIQ TEXT,
            WMWSR TEXT,
            mmid INTEGER,
            mplan TEXT,
            UNIQUE_NO TEXT,
            RELATEID TEXT,
            UTMN REAL,
            UTME REAL,
            WELL_SNUM INT,
            REP_STAT TEXT,
            SEALED_D DATE,
            ENTRY_D DATE,
            SEAL_DEP INT,
            SEAL_CAS INT,
            OTHER_WELL TEXT,
            NOTES TEXT,
            SEAL_ID TEXT,
            WELL_LABEL TEXT,
            LOC_ID INT,
            ONAME TEXT,
            ADDR TEXT,
            CITY TEXT,
            STATE_ABB TEXT,
            ZIP5_CODE TEXT,
            LOC_DESC TEXT,
            COUNTY_C INT,
            TOWNSHIP INT,
            TOWN_DIR TEXT,
            RNG INT,
            RANGE_DIR TEXT,
            SECT INT,
            SUBSECT TEXT,
            PIN TEXT,
            STATUS_C TEXT,
            LCM_CODE TEXT,
            DBNAME_ABB TEXT,
            ACCURACY INT,
            GEOC_DATE DATE,
            COMMENTS TEXT
        )",
    )?;
    Ok(())
}

/// Columns of the geodatabase export whose names collide with SQL keywords
/// in the staging table.
fn sealed_destination(name: &str) -> &str {
    if name.eq_ignore_ascii_case("UNIQUE") {
        "UNIQUE_NO"
    } else if name.eq_ignore_ascii_case("RANGE") {
        "RNG"
    } else if name.eq_ignore_ascii_case("NAME") {
        "ONAME"
    } else {
        name
    }
}

/// Load the sealed-well extract into the staging table.
///
/// Loaded verbatim once: a populated staging table is skipped so the
/// reconciliation passes, not the load, own all mutation.
pub fn load_sealed(db: &WellDb, csv_path: &Path) -> Result<LoadOutcome> {
    if !db.table_exists(SEALED_TABLE)? {
        return Err(IngestError::table_missing(SEALED_TABLE));
    }

    let existing = db.row_count(SEALED_TABLE)?;
    if existing > 0 {
        info!(
            table = SEALED_TABLE,
            existing, "Sealed records already staged, skipping load"
        );
        return Ok(LoadOutcome::Skipped { existing });
    }

    if !csv_path.exists() {
        return Err(IngestError::config(format!(
            "sealed-well extract '{}' not found",
            csv_path.display()
        )));
    }

    force_to_ascii(csv_path)?;
    let header = read_header(csv_path)?;
    let table_columns = db.column_info(SEALED_TABLE)?;

    let mut src_columns: Vec<String> = Vec::new();
    let mut dest_columns: Vec<String> = Vec::new();
    let mut coercers: Vec<Coercer> = Vec::new();
    for name in &header {
        let dest = sealed_destination(name);
        if let Some(column) = table_columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(dest))
        {
            src_columns.push(name.clone());
            dest_columns.push(column.name.clone());
            coercers.push(Coercer::for_column(
                SEALED_TABLE,
                &column.name,
                &column.declared,
            )?);
        }
    }
    if src_columns.is_empty() {
        return Err(IngestError::config(format!(
            "no columns of '{}' match table '{SEALED_TABLE}'",
            csv_path.display()
        )));
    }

    let rows = CsvRows::open(csv_path, &src_columns, coercers)?;
    let inserted = stream_insert(db, SEALED_TABLE, &dest_columns, rows)?;
    info!(table = SEALED_TABLE, inserted, "Sealed records staged");
    Ok(LoadOutcome::Loaded { inserted })
}

/// Run every reconciliation pass, then the appends, in order.
pub fn reconcile(db: &WellDb) -> Result<ReconcileReport> {
    db.begin()?;

    normalize(db)?;
    let mut report = ReconcileReport {
        matched_primary: match_primary(db)?,
        matched_secondary: match_secondary(db)?,
        duplicates_suppressed: flag_duplicates(db)?,
        synthetic_direct: assign_synthetic_direct(db)?,
        synthetic_offset: assign_synthetic_offset(db)?,
        ..ReconcileReport::default()
    };
    derive_relateid(db)?;
    clean_dates(db)?;

    report.appended_wells = append_new_wells(db)?;
    report.merged_remarks = merge_remarks(db)?;
    report.unresolved = report_unresolved(db)?;

    info!(summary = %report.summary(), "Reconciliation finished");
    Ok(report)
}

/// Rewrite identifiers into canonical form and copy the W-series value.
///
/// Unrecognizable identifiers become the sentinel 'ERROR', which no later
/// pass matches, so those rows surface in the unresolved diagnostic.
fn normalize(db: &WellDb) -> Result<()> {
    db.execute(
        "UPDATE wmsealed SET MNUNIQ = MNU_FORMAT(UNIQUE_NO, 'ERROR')",
        [],
    )?;
    let wmwsr = db.execute(
        "UPDATE wmsealed SET WMWSR = MNUNIQ WHERE MNUNIQ LIKE 'H%'",
        [],
    )?;
    debug!(wmwsr, "Normalized sealed identifiers");
    Ok(())
}

fn match_pairs(db: &WellDb, sql: &str) -> Result<Vec<(i64, i64)>> {
    let mut stmt = db.conn().prepare(sql)?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pairs)
}

fn apply_matches(db: &WellDb, pairs: &[(i64, i64)], status: MatchStatus) -> Result<usize> {
    let mut stmt = db
        .conn()
        .prepare("UPDATE wmsealed SET wellid = ?1, mmid = ?2 WHERE rowid = ?3")?;
    for (wellid, rowid) in pairs {
        stmt.execute(params![wellid, status.code(), rowid])?;
    }
    Ok(pairs.len())
}

/// Match canonical identifiers against the primary identifier view.
fn match_primary(db: &WellDb) -> Result<usize> {
    let pairs = match_pairs(
        db,
        "SELECT I.wellid, S.rowid
         FROM wmsealed S
         LEFT JOIN v1idu I ON S.MNUNIQ = I.IDENTIFIER
         WHERE I.IDENTIFIER IS NOT NULL
           AND S.wellid IS NULL AND S.mmid IS NULL
         ORDER BY S.rowid, I.wellid",
    )?;
    let matched = apply_matches(db, &pairs, MatchStatus::MatchedPrimary)?;
    debug!(matched, "Matched against primary identifiers");
    Ok(matched)
}

/// Match remaining records against the full identifier cross reference.
fn match_secondary(db: &WellDb) -> Result<usize> {
    let pairs = match_pairs(
        db,
        "SELECT I.wellid, S.rowid
         FROM wmsealed S
         LEFT JOIN o1id I ON S.MNUNIQ = I.IDENTIFIER
         WHERE I.wellid IS NOT NULL
           AND S.wellid IS NULL AND S.mmid IS NULL
         ORDER BY S.rowid, I.wellid",
    )?;
    let matched = apply_matches(db, &pairs, MatchStatus::MatchedSecondary)?;
    debug!(matched, "Matched against the identifier cross reference");
    Ok(matched)
}

/// Suppress the larger identifier of any matched pair resolving to one
/// well.
///
/// Comparison is on the canonical identifier, so the outcome is the same
/// whatever order the records arrived in. Suppressed records keep their
/// wellid but are excluded from every append.
fn flag_duplicates(db: &WellDb) -> Result<usize> {
    let suppressed = db.execute(
        &format!(
            "UPDATE wmsealed SET mmid = {dup}, mplan = 'ignore record'
             WHERE rowid IN (
                 SELECT A.rowid
                 FROM wmsealed A
                 JOIN wmsealed B ON A.wellid = B.wellid AND A.rowid <> B.rowid
                 WHERE A.MNUNIQ > B.MNUNIQ
                   AND A.mmid IN ({p}, {s})
                   AND B.mmid IN ({p}, {s})
             )",
            dup = MatchStatus::DuplicateSuppressed.code(),
            p = MatchStatus::MatchedPrimary.code(),
            s = MatchStatus::MatchedSecondary.code(),
        ),
        [],
    )?;
    if suppressed > 0 {
        info!(suppressed, "Duplicate sealed records suppressed");
    }
    Ok(suppressed)
}

/// Give unmatched all-digit identifiers their own value as wellid.
fn assign_synthetic_direct(db: &WellDb) -> Result<usize> {
    let assigned = db.execute(
        &format!(
            "UPDATE wmsealed SET wellid = CAST(MNUNIQ AS INTEGER), mmid = {code}
             WHERE wellid IS NULL AND mmid IS NULL
               AND length(MNUNIQ) > 0
               AND MNUNIQ NOT GLOB '*[^0-9]*'",
            code = MatchStatus::SyntheticDirect.code(),
        ),
        [],
    )?;
    debug!(assigned, "Assigned direct synthetic wellids");
    Ok(assigned)
}

/// Give unmatched H-series identifiers a wellid in the reserved offset
/// band.
fn assign_synthetic_offset(db: &WellDb) -> Result<usize> {
    let assigned = db.execute(
        &format!(
            "UPDATE wmsealed
             SET wellid = {base} + CAST(substr(MNUNIQ, 2) AS INTEGER), mmid = {code}
             WHERE wellid IS NULL AND mmid IS NULL
               AND MNUNIQ LIKE 'H%'",
            base = SYNTHETIC_OFFSET_BASE,
            code = MatchStatus::SyntheticOffset.code(),
        ),
        [],
    )?;
    debug!(assigned, "Assigned offset-band synthetic wellids");
    Ok(assigned)
}

/// Fill RELATEID as the 10-character zero-padded text of the wellid.
fn derive_relateid(db: &WellDb) -> Result<()> {
    let derived = db.execute(
        "UPDATE wmsealed
         SET RELATEID = substr('000000000' || CAST(wellid AS TEXT), -10)
         WHERE RELATEID IS NULL AND wellid IS NOT NULL",
        [],
    )?;
    debug!(derived, "Derived relate-IDs");
    Ok(())
}

/// Trim timestamp tails off geocode dates.
fn clean_dates(db: &WellDb) -> Result<()> {
    db.execute(
        "UPDATE wmsealed SET GEOC_DATE = substr(GEOC_DATE, 1, 10)
         WHERE length(GEOC_DATE) > 10",
        [],
    )?;
    Ok(())
}

/// Append synthetic records as new wells.
///
/// Index, location, address, first-remark and identifier rows are written
/// for every record in a synthetic state whose wellid is not already
/// present, which keeps the appends re-runnable. Returns the number of
/// index rows written.
fn append_new_wells(db: &WellDb) -> Result<usize> {
    let synthetic = format!(
        "{}, {}",
        MatchStatus::SyntheticDirect.code(),
        MatchStatus::SyntheticOffset.code()
    );

    let appended = db.execute(
        &format!(
            "INSERT INTO c4ix (wellid, DATA_SRC, UNIQUE_NO, RELATEID, STATUS_C,
                               COUNTY_C, TOWNSHIP, \"RANGE\", RANGE_DIR, SECTION,
                               SUBSECTION, LOC_MC, LOC_SRC)
             SELECT S.wellid, 'wmsealed', S.MNUNIQ, S.RELATEID, S.STATUS_C,
                    S.COUNTY_C, S.TOWNSHIP, S.RNG, S.RANGE_DIR, S.SECT,
                    S.SUBSECT, S.LOC_DESC, 'WM_gdb'
             FROM wmsealed S
             WHERE S.mmid IN ({synthetic})
               AND NOT EXISTS (SELECT 1 FROM c4ix I WHERE I.wellid = S.wellid)"
        ),
        [],
    )?;

    db.execute(
        &format!(
            "INSERT INTO c4locs (wellid, CWI_loc, UNIQUE_NO, RELATEID, STATUS_C,
                                 COUNTY_C, TOWNSHIP, \"RANGE\", RANGE_DIR, SECTION,
                                 SUBSECTION, LOC_MC, LOC_SRC, UTME, UTMN,
                                 GEOC_DATE, WELL_LABEL)
             SELECT S.wellid, 'wmsealed', S.MNUNIQ, S.RELATEID, S.STATUS_C,
                    S.COUNTY_C, S.TOWNSHIP, S.RNG, S.RANGE_DIR, S.SECT,
                    S.SUBSECT, S.LOC_DESC, 'WM_gdb', S.UTME, S.UTMN,
                    S.GEOC_DATE, S.MNUNIQ
             FROM wmsealed S
             WHERE S.mmid IN ({synthetic})
               AND NOT EXISTS (SELECT 1 FROM c4locs L WHERE L.wellid = S.wellid)"
        ),
        [],
    )?;

    db.execute(
        &format!(
            "INSERT INTO c4ad (wellid, RELATEID, NAME, OTHER)
             SELECT S.wellid, S.RELATEID, S.ONAME,
                    COALESCE(S.ADDR, '') || '|' || COALESCE(S.CITY, '') || '|' ||
                    COALESCE(S.STATE_ABB, '') || '|' || COALESCE(S.PIN, '')
             FROM wmsealed S
             WHERE S.mmid IN ({synthetic})
               AND NOT EXISTS (SELECT 1 FROM c4ad A WHERE A.wellid = S.wellid)"
        ),
        [],
    )?;

    db.execute(
        &format!(
            "INSERT INTO c4rm (wellid, RELATEID, SEQ_NO, REMARKS)
             SELECT S.wellid, S.RELATEID, 1, S.COMMENTS
             FROM wmsealed S
             WHERE S.mmid IN ({synthetic}) AND S.COMMENTS > ' '
               AND NOT EXISTS (SELECT 1 FROM c4rm R WHERE R.wellid = S.wellid)"
        ),
        [],
    )?;

    for (status, id_prog) in [
        (MatchStatus::SyntheticDirect, "MNUNIQ"),
        (MatchStatus::SyntheticOffset, "WMWSR"),
    ] {
        db.execute(
            &format!(
                "INSERT INTO o1id (wellid, RELATEID, IDENTIFIER, MNU, sMNU,
                                   ID_TYPE, ID_PROG, mremark)
                 SELECT S.wellid, S.RELATEID, S.MNUNIQ, 1, 1,
                        'WM_gdb', '{id_prog}', 'wmsealed'
                 FROM wmsealed S
                 WHERE S.mmid = {code}
                   AND NOT EXISTS (
                       SELECT 1 FROM o1id I
                       WHERE I.wellid = S.wellid AND I.IDENTIFIER = S.MNUNIQ
                   )",
                code = status.code(),
            ),
            [],
        )?;
    }

    if appended > 0 {
        info!(appended, "Appended synthetic wells into the index");
    }
    Ok(appended)
}

/// Merge sealed comments into the remarks of already-known wells.
///
/// Matched records (and only matched ones; suppressed duplicates are
/// excluded) append a remark after the well's current highest sequence
/// number, or at sequence 1 for wells with no remarks yet.
fn merge_remarks(db: &WellDb) -> Result<usize> {
    let matched = format!(
        "{}, {}",
        MatchStatus::MatchedPrimary.code(),
        MatchStatus::MatchedSecondary.code()
    );

    let mut merged = db.execute(
        &format!(
            "INSERT INTO c4rm (wellid, RELATEID, SEQ_NO, REMARKS)
             SELECT S.wellid, S.RELATEID, B.next_seq, S.COMMENTS
             FROM wmsealed S
             LEFT JOIN (
                 SELECT wellid, COALESCE(MAX(SEQ_NO), 0) + 1 AS next_seq
                 FROM c4rm GROUP BY wellid
             ) B ON S.wellid = B.wellid
             WHERE S.mmid IN ({matched}) AND S.COMMENTS > ' '
               AND B.next_seq IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM c4rm R
                   WHERE R.wellid = S.wellid AND R.REMARKS = S.COMMENTS
               )"
        ),
        [],
    )?;

    merged += db.execute(
        &format!(
            "INSERT INTO c4rm (wellid, RELATEID, SEQ_NO, REMARKS)
             SELECT S.wellid, S.RELATEID, 1, S.COMMENTS
             FROM wmsealed S
             LEFT JOIN c4rm R ON S.wellid = R.wellid
             WHERE S.mmid IN ({matched}) AND S.COMMENTS > ' '
               AND R.wellid IS NULL"
        ),
        [],
    )?;

    debug!(merged, "Merged sealed comments into remarks");
    Ok(merged)
}

/// Count records no pass could place, and warn when any remain.
fn report_unresolved(db: &WellDb) -> Result<i64> {
    let unresolved: i64 = db.conn().query_row(
        "SELECT count(*) FROM wmsealed WHERE wellid IS NULL AND mmid IS NULL",
        [],
        |row| row.get(0),
    )?;
    if unresolved > 0 {
        warn!(
            unresolved,
            "Sealed records unresolved after all passes; rows left in place"
        );
    }
    Ok(unresolved)
}

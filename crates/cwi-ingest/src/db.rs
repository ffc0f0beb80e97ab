//! SQLite session for the well database
//!
//! One `WellDb` is opened per run. It owns the single connection, registers
//! the `MNU_FORMAT` scalar function, and gates commits behind an explicit
//! mode so a dry run can exercise the whole pipeline and then roll every
//! write back. Foreign-key enforcement toggles are refused while a
//! transaction is open, because SQLite silently ignores the pragma there.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, Params};
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::mnu::register_mnu_format;

/// Whether a session may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Writes commit normally.
    Commit,
    /// Commits are refused and logged; everything rolls back on drop.
    DryRun,
}

/// Describes one column of a destination table.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name as declared in the schema.
    pub name: String,
    /// Declared type text, e.g. `INTEGER` or `CHAR(10)`.
    pub declared: String,
}

/// Session over the well database.
pub struct WellDb {
    conn: Connection,
    mode: CommitMode,
    path: PathBuf,
}

impl WellDb {
    /// Open (or create) a database file and register `MNU_FORMAT`.
    pub fn open(path: &Path, mode: CommitMode) -> Result<Self> {
        let conn = Connection::open(path)?;
        register_mnu_format(&conn)?;
        debug!(path = %path.display(), ?mode, "Opened well database");
        Ok(Self {
            conn,
            mode,
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory database, used by tests and scratch work.
    pub fn open_in_memory(mode: CommitMode) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        register_mnu_format(&conn)?;
        Ok(Self {
            conn,
            mode,
            path: PathBuf::from(":memory:"),
        })
    }

    /// The underlying connection, for prepared statements and queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Database file path (`:memory:` for in-memory sessions).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when no transaction is open.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// True when this session may commit.
    pub fn commit_allowed(&self) -> bool {
        self.mode == CommitMode::Commit
    }

    /// Begin a transaction if one is not already open.
    ///
    /// Calling this inside an open transaction is a no-op.
    pub fn begin(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Commit the open transaction.
    ///
    /// Returns `true` when a commit was issued. In dry-run mode nothing is
    /// committed and `false` is returned; the refusal is logged once per
    /// call so the run output shows where commits would have happened.
    pub fn commit(&self) -> Result<bool> {
        if self.mode == CommitMode::DryRun {
            info!("Commit refused: session opened in dry-run mode");
            return Ok(false);
        }
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(true)
    }

    /// Roll back the open transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    /// Toggle foreign-key enforcement.
    ///
    /// SQLite ignores this pragma inside a transaction, so calling it there
    /// is an error rather than a silent no-op.
    pub fn set_foreign_keys(&self, enabled: bool) -> Result<()> {
        if !self.conn.is_autocommit() {
            return Err(IngestError::PragmaInTransaction("foreign_keys".to_string()));
        }
        let flag = if enabled { "ON" } else { "OFF" };
        self.conn
            .execute_batch(&format!("PRAGMA foreign_keys = {flag}"))?;
        debug!(enabled, "Set foreign-key enforcement");
        Ok(())
    }

    /// Current foreign-key enforcement state.
    pub fn foreign_keys(&self) -> Result<bool> {
        let on: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(on != 0)
    }

    /// Compact the database file.
    ///
    /// SQLite cannot VACUUM mid-transaction, so this is skipped with a
    /// warning while one is open (which is always the case in a dry run).
    pub fn vacuum(&self) -> Result<bool> {
        if !self.conn.is_autocommit() {
            warn!("VACUUM skipped: a transaction is open");
            return Ok(false);
        }
        self.conn.execute_batch("VACUUM")?;
        Ok(true)
    }

    /// Execute one statement, returning the affected row count.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.master_names("table")
    }

    /// Names of all views, sorted.
    pub fn view_names(&self) -> Result<Vec<String>> {
        self.master_names("view")
    }

    fn master_names(&self, kind: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")?;
        let names = stmt
            .query_map([kind], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Whether a table with this exact name exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Row count of a table.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT count(*) FROM \"{table}\""), [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }

    /// Column names and declared types, in schema order.
    pub fn column_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA TABLE_INFO(\"{table}\")"))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    declared: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
}

impl Drop for WellDb {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            debug!("Session dropped with an open transaction, rolling back");
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Build a `?,?,...,?` placeholder list for a positional insert.
pub fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

//! Statement-batch execution from schema and migration files
//!
//! Schema and identifier-index files are plain text: an optional leading
//! `/* ... */` header block, then statements terminated by `;`. Statements
//! run strictly in file order since later ones depend on earlier side
//! effects. A failing statement is reported and skipped so one bad legacy
//! statement cannot abort an otherwise good batch; the caller gets the
//! failure count.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::db::WellDb;
use crate::error::{IngestError, Result};

/// Outcome of one statement batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Statements that executed successfully.
    pub executed: usize,
    /// Statements that failed and were skipped.
    pub failed: usize,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Split file text into terminated SQL statements.
///
/// Everything up to and including the first `*/` is discarded, which strips
/// the customary header comment. The text after the final `;` is dropped;
/// every statement comes back trimmed and re-terminated.
pub fn parse_statements(text: &str) -> Vec<String> {
    let body = match text.split_once("*/") {
        Some((_, rest)) => rest,
        None => text,
    };

    let mut parts: Vec<&str> = body.split(';').collect();
    // The final fragment is whatever trails the last terminator.
    parts.pop();

    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| format!("{part};"))
        .collect()
}

/// Read a statement file, failing when it yields no statements.
pub fn read_statements(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    let statements = parse_statements(&text);
    if statements.is_empty() {
        return Err(IngestError::EmptySqlFile(path.display().to_string()));
    }
    Ok(statements)
}

/// Execute every statement in a file, in order, inside the session
/// transaction.
pub fn execute_file(db: &WellDb, path: &Path) -> Result<BatchReport> {
    execute_file_from(db, path, 0)
}

/// Execute a statement file, skipping the first `skip` statements.
///
/// A long batch interrupted at statement N can resume from N on the next
/// run instead of replaying the whole file.
pub fn execute_file_from(db: &WellDb, path: &Path, skip: usize) -> Result<BatchReport> {
    let statements = read_statements(path)?;
    debug!(
        path = %path.display(),
        count = statements.len(),
        "Executing statement batch"
    );
    if skip > 0 {
        info!(
            path = %path.display(),
            skip,
            "Resuming statement batch"
        );
    }

    db.begin()?;
    let mut report = BatchReport::default();
    for statement in statements.iter().skip(skip) {
        match db.conn().execute_batch(statement) {
            Ok(()) => report.executed += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    error = %e,
                    statement = %preview(statement),
                    "Statement failed, continuing with the rest of the batch"
                );
            },
        }
    }

    if report.failed > 0 {
        warn!(
            path = %path.display(),
            failed = report.failed,
            executed = report.executed,
            "Statement batch finished with failures"
        );
    }
    Ok(report)
}

/// First line of a statement, shortened for log output.
fn preview(statement: &str) -> String {
    let line = statement.lines().next().unwrap_or_default();
    let truncated: String = line.chars().take(120).collect();
    if truncated.len() < line.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}

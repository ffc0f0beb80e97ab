//! Build and reconciliation pipelines
//!
//! Orchestrates the full rebuild from downloaded extracts to a finished
//! database, and the sealed-well reconciliation that runs against it. Each
//! pipeline opens one session, walks its phases in order, and either
//! commits at phase boundaries or, in a dry run, rolls the whole session
//! back at the end.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{data_tables, CwiConfig, IdentifierModel, SchemaVersion, LOCS_TABLE};
use crate::db::{CommitMode, WellDb};
use crate::error::IngestError;
use crate::loader::{self, LoadOutcome, LocsOutcome};
use crate::reconcile::{self, ReconcileReport};
use crate::sqlfile;

/// Options for one build run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Clear already-loaded rows first so fresh extracts land.
    pub refresh: bool,
    /// Run every phase, then roll back instead of committing.
    pub dry_run: bool,
    /// Skip this many statements of the identifier batch when resuming an
    /// interrupted run.
    pub resume_mnu: usize,
}

/// What one build run did.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Schema version the database was built at.
    pub version: SchemaVersion,
    /// Data tables freshly loaded.
    pub tables_loaded: usize,
    /// Data tables skipped because they already held rows.
    pub tables_skipped: usize,
    /// Data tables whose load failed and was passed over.
    pub tables_failed: usize,
    /// Rows inserted across all freshly loaded tables.
    pub rows_inserted: usize,
    /// Outcome of the locations load, when the schema has locations.
    pub locations: Option<LocsOutcome>,
    /// Identifier-index statements executed.
    pub identifier_statements: usize,
    /// Identifier-index statements that failed and were skipped.
    pub identifier_failures: usize,
    /// Whether the run committed (false for dry runs).
    pub committed: bool,
}

impl BuildReport {
    /// Check that no table load or identifier statement failed.
    pub fn is_success(&self) -> bool {
        self.tables_failed == 0 && self.identifier_failures == 0
    }

    /// Get a summary message.
    pub fn summary(&self) -> String {
        let disposition = if self.committed {
            "committed"
        } else {
            "rolled back (dry run)"
        };
        format!(
            "schema {}: {} tables loaded ({} rows), {} already loaded, {} failed; \
             {} identifier statements ({} failed); {}",
            self.version,
            self.tables_loaded,
            self.rows_inserted,
            self.tables_skipped,
            self.tables_failed,
            self.identifier_statements,
            self.identifier_failures,
            disposition
        )
    }
}

/// Full rebuild pipeline.
pub struct BuildPipeline {
    config: CwiConfig,
    options: BuildOptions,
}

impl BuildPipeline {
    /// Create a pipeline with default options.
    pub fn new(config: CwiConfig) -> Self {
        Self {
            config,
            options: BuildOptions::default(),
        }
    }

    /// Create a pipeline with explicit options.
    pub fn with_options(config: CwiConfig, options: BuildOptions) -> Self {
        Self { config, options }
    }

    /// Run the full build.
    ///
    /// Phases:
    /// 1. Ensure the schema exists
    /// 2. Refresh (clear loaded rows) when requested
    /// 3. Load the data tables
    /// 4. Load the locations table
    /// 5. Backfill the wellid column and its indexes
    /// 6. Reformat UNIQUE_NO from wellid
    /// 7. Build the identifier index
    /// 8. Finalize (commit or roll back, re-enable foreign keys)
    pub fn run(&self) -> Result<BuildReport> {
        let mode = if self.options.dry_run {
            CommitMode::DryRun
        } else {
            CommitMode::Commit
        };

        info!(
            version = %self.config.version,
            db = %self.config.db_path.display(),
            dry_run = self.options.dry_run,
            "Starting build pipeline"
        );

        if let Some(parent) = self.config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = WellDb::open(&self.config.db_path, mode)
            .context("Failed to open the well database")?;
        self.run_with(&db)
    }

    /// Run every phase against an already-open session.
    ///
    /// The session's commit mode decides the outcome: a dry-run session
    /// refuses the final commit and everything is rolled back instead.
    pub fn run_with(&self, db: &WellDb) -> Result<BuildReport> {
        let caps = self.config.capabilities();

        // Enforcement toggles are refused mid-transaction, and a dry run
        // holds its transaction open across every phase, so this must come
        // before the first phase.
        if caps.has_foreign_key_constraints {
            db.set_foreign_keys(false)
                .context("Failed to suspend foreign-key enforcement")?;
        }

        let mut report = BuildReport {
            version: self.config.version,
            ..BuildReport::default()
        };

        info!("Phase 1: Ensuring schema");
        self.ensure_schema(db)
            .context("Failed to apply the schema batch")?;

        if self.options.refresh {
            info!("Phase 2: Clearing loaded data for refresh");
            loader::delete_table_data(db, &self.config)
                .context("Failed to clear loaded data")?;
        } else {
            info!("Phase 2: Refresh not requested, keeping loaded data");
        }

        info!("Phase 3: Loading data tables");
        for table in data_tables() {
            let csv = self.config.data_csv_path(&table);
            match loader::load_table(db, &table, &csv, caps.has_foreign_key_constraints) {
                Ok(LoadOutcome::Loaded { inserted }) => {
                    report.tables_loaded += 1;
                    report.rows_inserted += inserted;
                }
                Ok(LoadOutcome::Skipped { .. }) => report.tables_skipped += 1,
                Err(e @ IngestError::TableMissing(_)) => {
                    return Err(e).context("The schema batch left a data table missing");
                }
                Err(e) => {
                    report.tables_failed += 1;
                    error!(table = %table, error = %e, "Table load failed, continuing");
                }
            }
        }
        db.commit()?;

        if caps.has_locations {
            info!("Phase 4: Loading locations");
            let outcome = loader::load_locs(db, &self.config)
                .context("Failed to load the locations table")?;
            if outcome == LocsOutcome::NoSource {
                warn!("No location source present, locations left empty");
            }
            report.locations = Some(outcome);
            db.commit()?;
        } else {
            info!("Phase 4: Schema predates locations, skipping");
        }

        if caps.has_identifier_column {
            info!("Phase 5: Backfilling wellid");
            let mut tables = data_tables();
            if caps.has_locations && db.table_exists(LOCS_TABLE)? {
                tables.push(LOCS_TABLE.to_string());
            }
            loader::populate_wellid_and_index(db, &tables)
                .context("Failed to backfill wellid")?;
            db.commit()?;
        } else {
            info!("Phase 5: Schema has no wellid column, skipping");
        }

        if caps.reformat_unique_no {
            info!("Phase 6: Reformatting unique numbers");
            loader::update_unique_no_from_wellid(db, "c4ix")
                .context("Failed to reformat unique numbers")?;
            if db.table_exists(LOCS_TABLE)? {
                loader::update_unique_no_from_wellid(db, LOCS_TABLE)
                    .context("Failed to reformat location unique numbers")?;
            }
            db.commit()?;
        } else {
            info!("Phase 6: Schema keeps original unique numbers, skipping");
        }

        if caps.identifier_model == IdentifierModel::Mnu {
            info!("Phase 7: Building the identifier index");
            let mut skip = self.options.resume_mnu;
            for path in self.config.mnu_paths() {
                if !path.exists() {
                    anyhow::bail!(
                        "identifier batch '{}' not found; expected under '{}'",
                        path.display(),
                        self.config.sql_dir.display()
                    );
                }
                let batch = sqlfile::execute_file_from(db, &path, skip)
                    .with_context(|| {
                        format!("Failed to run identifier batch '{}'", path.display())
                    })?;
                report.identifier_statements += batch.executed;
                report.identifier_failures += batch.failed;
                skip = 0;
            }
            db.commit()?;
        } else {
            info!("Phase 7: Schema predates the identifier index, skipping");
        }

        info!("Phase 8: Finalizing");
        report.committed = db.commit()?;
        if !report.committed {
            db.rollback()?;
            info!("Dry run complete, all writes rolled back");
        }
        if caps.has_foreign_key_constraints {
            db.set_foreign_keys(true)
                .context("Failed to restore foreign-key enforcement")?;
        }

        info!(summary = %report.summary(), "Build pipeline finished");
        Ok(report)
    }

    /// Apply the schema batch when the database lacks the index table.
    fn ensure_schema(&self, db: &WellDb) -> Result<()> {
        if db.table_exists("c4ix")? {
            info!("Schema already present");
            return Ok(());
        }
        let path = self.config.schema_path();
        if !path.exists() {
            anyhow::bail!(
                "schema batch '{}' not found; expected under '{}'",
                path.display(),
                self.config.sql_dir.display()
            );
        }
        let batch = sqlfile::execute_file(db, &path)?;
        info!(
            executed = batch.executed,
            failed = batch.failed,
            "Schema applied"
        );
        Ok(())
    }
}

/// Sealed-well reconciliation pipeline.
pub struct SealedPipeline {
    config: CwiConfig,
    csv_path: PathBuf,
    dry_run: bool,
}

impl SealedPipeline {
    /// Create a pipeline reading sealed records from `csv_path`.
    pub fn new(config: CwiConfig, csv_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            csv_path: csv_path.into(),
            dry_run: false,
        }
    }

    /// Run every pass but roll back instead of committing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Stage the sealed extract and reconcile it against the index.
    pub fn run(&self) -> Result<ReconcileReport> {
        let caps = self.config.capabilities();
        if caps.identifier_model != IdentifierModel::Mnu {
            anyhow::bail!(
                "sealed-well reconciliation requires schema c4.4.0 or later, \
                 configured version is {}",
                self.config.version
            );
        }
        if !self.config.db_path.exists() {
            anyhow::bail!(
                "database '{}' does not exist; run 'cwi-ingest build' first",
                self.config.db_path.display()
            );
        }

        let mode = if self.dry_run {
            CommitMode::DryRun
        } else {
            CommitMode::Commit
        };
        info!(
            csv = %self.csv_path.display(),
            dry_run = self.dry_run,
            "Starting sealed-well reconciliation"
        );
        let db = WellDb::open(&self.config.db_path, mode)
            .context("Failed to open the well database")?;
        if !db.table_exists("c4ix")? {
            anyhow::bail!(
                "database '{}' has no schema; run 'cwi-ingest build' first",
                self.config.db_path.display()
            );
        }

        info!("Phase 1: Staging sealed records");
        reconcile::ensure_sealed_table(&db)?;
        let loaded = match reconcile::load_sealed(&db, &self.csv_path)? {
            LoadOutcome::Loaded { inserted } => Some(inserted),
            LoadOutcome::Skipped { .. } => None,
        };

        info!("Phase 2: Matching and appending");
        let mut report = reconcile::reconcile(&db).context("Reconciliation failed")?;
        report.loaded = loaded;

        info!("Phase 3: Finalizing");
        if self.dry_run {
            db.rollback()?;
            info!("Dry run complete, all writes rolled back");
        } else {
            db.commit()?;
        }

        if !report.is_success() {
            warn!(
                unresolved = report.unresolved,
                "Some sealed records could not be reconciled"
            );
        }
        info!(summary = %report.summary(), "Sealed-well reconciliation finished");
        Ok(report)
    }
}

/// Snapshot of a built database.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Database file path.
    pub db_path: String,
    /// Configured schema version.
    pub version: String,
    /// Row counts per table, sorted by name.
    pub tables: BTreeMap<String, i64>,
    /// View names.
    pub views: Vec<String>,
}

impl StatusReport {
    /// Multi-line human summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("database: {}", self.db_path),
            format!("schema version: {}", self.version),
        ];
        for (table, rows) in &self.tables {
            lines.push(format!("  {table}: {rows} rows"));
        }
        if !self.views.is_empty() {
            lines.push(format!("views: {}", self.views.join(", ")));
        }
        lines.join("\n")
    }
}

/// Inspect a built database without writing to it.
pub fn status(config: &CwiConfig) -> Result<StatusReport> {
    if !config.db_path.exists() {
        anyhow::bail!(
            "database '{}' does not exist; run 'cwi-ingest build' first",
            config.db_path.display()
        );
    }

    let db = WellDb::open(&config.db_path, CommitMode::DryRun)
        .context("Failed to open the well database")?;

    let mut tables = BTreeMap::new();
    for name in db.table_names()? {
        tables.insert(name.clone(), db.row_count(&name)?);
    }

    Ok(StatusReport {
        db_path: config.db_path.display().to_string(),
        version: config.version.to_string(),
        tables,
        views: db.view_names()?,
    })
}

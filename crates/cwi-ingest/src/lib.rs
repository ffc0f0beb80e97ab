//! CWI Ingest Library
//!
//! Builds and maintains a local SQLite mirror of the county well index:
//! downloads the published extracts over anonymous FTP, loads them into a
//! versioned schema, normalizes well identifiers, and reconciles
//! sealed-well records against the identifier index.
//!
//! # Pipeline
//!
//! - **Download**: mirror the published zip archives and unpack them
//! - **Build**: apply the schema, bulk-load the extracts, backfill the
//!   wellid column, and build the identifier index
//! - **Sealed**: stage a sealed-well extract and match it against the
//!   index, appending wells no index knows
//!
//! # Example
//!
//! ```no_run
//! use cwi_ingest::config::CwiConfig;
//! use cwi_ingest::pipeline::BuildPipeline;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = CwiConfig::from_env()?;
//!     let report = BuildPipeline::new(config).run()?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod db;
pub mod error;
pub mod ftp;
pub mod loader;
pub mod mnu;
pub mod pipeline;
pub mod reconcile;
pub mod rows;
pub mod sqlfile;

// Re-export commonly used types
pub use config::{CwiConfig, SchemaVersion};
pub use db::{CommitMode, WellDb};
pub use error::{IngestError, Result};
pub use pipeline::{BuildOptions, BuildPipeline, SealedPipeline};

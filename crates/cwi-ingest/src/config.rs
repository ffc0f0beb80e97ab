//! Run configuration and the schema-version catalog
//!
//! Everything that was tunable about a run lives here: which schema version
//! the destination database follows (and what that version is capable of),
//! where the extracts and statement files live, and how to reach the FTP
//! site. One `CwiConfig` is built at startup and passed around immutably.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use cwi_common::CwiError;

use crate::error::Result;

/// Suffixes of the per-table extracts, in load order.
pub const DATA_TABLE_SUFFIXES: [&str; 10] =
    ["ix", "id", "ad", "an", "c1", "c2", "pl", "rm", "st", "wl"];

/// The locations table, present from schema c4.1.0 on.
pub const LOCS_TABLE: &str = "c4locs";

/// Column of c4locs holding the located/unlocated category flag.
pub const LOCS_FLAG_COLUMN: &str = "CWI_loc";

/// Names of the data tables, in load order.
pub fn data_tables() -> Vec<String> {
    DATA_TABLE_SUFFIXES
        .iter()
        .map(|suffix| format!("c4{suffix}"))
        .collect()
}

/// How identifiers are modeled by a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierModel {
    /// Identifiers live only on the index table.
    Cwi,
    /// Identifiers are cross-referenced through the o1id table and the
    /// v1idu view, in canonical MNU form.
    Mnu,
}

impl std::fmt::Display for IdentifierModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierModel::Cwi => write!(f, "cwi"),
            IdentifierModel::Mnu => write!(f, "mnu"),
        }
    }
}

/// Published schema versions of the well database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum SchemaVersion {
    #[serde(rename = "c4.0.0")]
    C400,
    #[serde(rename = "c4.1.0")]
    C410,
    #[serde(rename = "c4.2.0")]
    C420,
    #[serde(rename = "c4.3.0")]
    C430,
    #[serde(rename = "c4.4.0")]
    C440,
    #[default]
    #[serde(rename = "c4.4.1")]
    C441,
}

impl SchemaVersion {
    /// Every published version, oldest first.
    pub const ALL: [SchemaVersion; 6] = [
        SchemaVersion::C400,
        SchemaVersion::C410,
        SchemaVersion::C420,
        SchemaVersion::C430,
        SchemaVersion::C440,
        SchemaVersion::C441,
    ];

    fn rank(self) -> u8 {
        match self {
            SchemaVersion::C400 => 0,
            SchemaVersion::C410 => 1,
            SchemaVersion::C420 => 2,
            SchemaVersion::C430 => 3,
            SchemaVersion::C440 => 4,
            SchemaVersion::C441 => 5,
        }
    }

    /// What this schema version supports.
    pub fn capabilities(self) -> SchemaCapabilities {
        let rank = self.rank();
        SchemaCapabilities {
            has_locations: rank >= 1,
            has_identifier_column: rank >= 2,
            reformat_unique_no: rank >= 3,
            has_foreign_key_constraints: rank >= 3,
            has_uniqueness_constraints: self == SchemaVersion::C441,
            identifier_model: if rank >= 4 {
                IdentifierModel::Mnu
            } else {
                IdentifierModel::Cwi
            },
        }
    }

    /// File name of this version's schema statement batch.
    pub fn schema_file(self) -> String {
        format!("cwischema_{self}.sql")
    }

    /// File names of this version's identifier-index batches, in run order.
    /// Empty for versions before the MNU identifier model.
    pub fn mnu_files(self) -> Vec<String> {
        match self.capabilities().identifier_model {
            IdentifierModel::Mnu => vec![format!("mnu_insert_{self}.sql")],
            IdentifierModel::Cwi => Vec::new(),
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemaVersion::C400 => "c4.0.0",
            SchemaVersion::C410 => "c4.1.0",
            SchemaVersion::C420 => "c4.2.0",
            SchemaVersion::C430 => "c4.3.0",
            SchemaVersion::C440 => "c4.4.0",
            SchemaVersion::C441 => "c4.4.1",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for SchemaVersion {
    type Err = CwiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c4.0.0" => Ok(SchemaVersion::C400),
            "c4.1.0" => Ok(SchemaVersion::C410),
            "c4.2.0" => Ok(SchemaVersion::C420),
            "c4.3.0" => Ok(SchemaVersion::C430),
            "c4.4.0" => Ok(SchemaVersion::C440),
            "c4.4.1" => Ok(SchemaVersion::C441),
            other => Err(CwiError::UnknownSchemaVersion(other.to_string())),
        }
    }
}

/// Capability flags derived from a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCapabilities {
    /// The c4locs table exists.
    pub has_locations: bool,
    /// Data tables carry an integer wellid column.
    pub has_identifier_column: bool,
    /// UNIQUE_NO is rewritten from wellid after loading.
    pub reformat_unique_no: bool,
    /// Foreign keys reference c4ix(wellid).
    pub has_foreign_key_constraints: bool,
    /// Uniqueness constraints are declared on identifier columns.
    pub has_uniqueness_constraints: bool,
    /// How identifiers are modeled.
    pub identifier_model: IdentifierModel,
}

/// FTP settings for the upstream mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    /// FTP server host name
    pub host: String,

    /// FTP server port
    pub port: u16,

    /// Login user, anonymous by default
    pub user: String,

    /// Login password
    pub password: String,

    /// Remote directory holding the published archives
    pub remote_dir: String,

    /// Archives to mirror, as published upstream
    pub files: Vec<String>,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "mgsweb2.mngs.umn.edu".to_string(),
            port: 21,
            user: "anonymous".to_string(),
            password: "anonymous".to_string(),
            remote_dir: "/pub/cwi".to_string(),
            files: vec![
                "cwidata_csv.zip".to_string(),
                "cwilocs.zip".to_string(),
                "xcwiunlocs.zip".to_string(),
            ],
        }
    }
}

impl FtpConfig {
    /// `host:port` address string for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CwiConfig {
    /// Schema version of the destination database
    pub version: SchemaVersion,

    /// Directory for downloaded archives and extracted table CSVs
    pub data_dir: PathBuf,

    /// Directory for the location extracts
    pub locs_dir: PathBuf,

    /// Directory holding the schema and identifier-index statement files
    pub sql_dir: PathBuf,

    /// Destination SQLite database file
    pub db_path: PathBuf,

    /// FTP mirror settings
    pub ftp: FtpConfig,
}

impl Default for CwiConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cwi");
        Self {
            version: SchemaVersion::default(),
            data_dir: base.join("data"),
            locs_dir: base.join("locs"),
            sql_dir: PathBuf::from("sql"),
            db_path: base.join("cwi.sqlite"),
            ftp: FtpConfig::default(),
        }
    }
}

impl CwiConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the schema version
    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the locations directory
    pub fn with_locs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.locs_dir = dir.into();
        self
    }

    /// Set the statement-file directory
    pub fn with_sql_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sql_dir = dir.into();
        self
    }

    /// Set the database path
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the FTP configuration
    pub fn with_ftp(mut self, ftp: FtpConfig) -> Self {
        self.ftp = ftp;
        self
    }

    /// Load configuration from environment variables, starting from the
    /// defaults.
    ///
    /// Environment variables:
    /// - `CWI_SCHEMA_VERSION`: schema version, e.g. `c4.4.1`
    /// - `CWI_DATA_DIR`, `CWI_LOCS_DIR`, `CWI_SQL_DIR`: directories
    /// - `CWI_DB_PATH`: destination database file
    /// - `CWI_FTP_HOST`, `CWI_FTP_USER`, `CWI_FTP_PASSWORD`,
    ///   `CWI_FTP_REMOTE_DIR`: FTP settings
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(version) = std::env::var("CWI_SCHEMA_VERSION") {
            config.version = version.parse::<SchemaVersion>()?;
        }
        if let Ok(dir) = std::env::var("CWI_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CWI_LOCS_DIR") {
            config.locs_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CWI_SQL_DIR") {
            config.sql_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("CWI_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(host) = std::env::var("CWI_FTP_HOST") {
            config.ftp.host = host;
        }
        if let Ok(user) = std::env::var("CWI_FTP_USER") {
            config.ftp.user = user;
        }
        if let Ok(password) = std::env::var("CWI_FTP_PASSWORD") {
            config.ftp.password = password;
        }
        if let Ok(dir) = std::env::var("CWI_FTP_REMOTE_DIR") {
            config.ftp.remote_dir = dir;
        }

        Ok(config)
    }

    /// Capability flags for the configured schema version.
    pub fn capabilities(&self) -> SchemaCapabilities {
        self.version.capabilities()
    }

    /// Path of the schema statement file.
    pub fn schema_path(&self) -> PathBuf {
        self.sql_dir.join(self.version.schema_file())
    }

    /// Paths of the identifier-index statement files, in run order.
    pub fn mnu_paths(&self) -> Vec<PathBuf> {
        self.version
            .mnu_files()
            .into_iter()
            .map(|name| self.sql_dir.join(name))
            .collect()
    }

    /// Path of a data table's extract.
    pub fn data_csv_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{table}.csv"))
    }

    /// Path of the single-file locations extract, when the upstream ships
    /// one.
    pub fn locs_csv_path(&self) -> PathBuf {
        self.data_dir.join(format!("{LOCS_TABLE}.csv"))
    }

    /// Path of the located-wells attribute export.
    pub fn located_attrs_path(&self) -> PathBuf {
        self.locs_dir.join("wells.csv")
    }

    /// Path of the unlocated-wells attribute export.
    pub fn unlocated_attrs_path(&self) -> PathBuf {
        self.locs_dir.join("unloc_wells.csv")
    }
}

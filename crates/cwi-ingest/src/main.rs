//! CWI Ingest - county well index build tool

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cwi_common::logging::{init_logging, LogConfig, LogLevel};
use cwi_ingest::config::CwiConfig;
use cwi_ingest::ftp;
use cwi_ingest::pipeline::{self, BuildOptions, BuildPipeline, SealedPipeline};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cwi-ingest")]
#[command(author, version, about = "County well index build tool")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download the published archives and unpack the extracts
    Download,

    /// Build or update the database from downloaded extracts
    Build {
        /// Clear already-loaded rows so fresh extracts land
        #[arg(long)]
        refresh: bool,

        /// Run every phase, then roll back instead of committing
        #[arg(long)]
        dry_run: bool,

        /// Resume the identifier batch at this statement index
        #[arg(long, default_value = "0")]
        resume_mnu: usize,
    },

    /// Reconcile a sealed-well extract against the built database
    Sealed {
        /// Sealed-well CSV extract
        #[arg(short, long)]
        file: PathBuf,

        /// Run every pass, then roll back instead of committing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show table counts for the built database
    Status {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cwi-ingest")
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    let config = CwiConfig::from_env()?;

    match cli.command {
        Commands::Download => {
            info!("Downloading county well index archives");
            let report = ftp::mirror(&config)?;
            println!("{}", report.summary());
        }
        Commands::Build {
            refresh,
            dry_run,
            resume_mnu,
        } => {
            info!("Building the well database");
            let options = BuildOptions {
                refresh,
                dry_run,
                resume_mnu,
            };
            let report = BuildPipeline::with_options(config, options).run()?;
            println!("{}", report.summary());
            if !report.is_success() {
                anyhow::bail!("build finished with failures; see the log for details");
            }
        }
        Commands::Sealed { file, dry_run } => {
            info!("Reconciling sealed-well records");
            let report = SealedPipeline::new(config, file)
                .with_dry_run(dry_run)
                .run()?;
            println!("{}", report.summary());
        }
        Commands::Status { json } => {
            let report = pipeline::status(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
        }
    }

    Ok(())
}

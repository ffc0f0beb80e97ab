//! CWI Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the CWI workspace.
//!
//! # Overview
//!
//! This crate provides the functionality shared by the CWI tools:
//!
//! - **Error Handling**: Base error type and result alias
//! - **Logging**: Configurable tracing setup (console/file, text/JSON)
//!
//! # Example
//!
//! ```no_run
//! use cwi_common::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     info!("starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CwiError, Result};

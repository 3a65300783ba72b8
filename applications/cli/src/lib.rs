//! Building blocks of the `evener` command-line tool
//!
//! - [`config`]: layered settings (defaults, `evener.toml`, `EVENER_*`)
//! - [`scan`]: expanding file and directory arguments into WAVE inputs
//! - [`report`]: plain-text and JSON rendering of results

pub mod config;
pub mod error;
pub mod report;
pub mod scan;

pub use config::{EvenerConfig, OutputTarget};
pub use error::{CliError, Result};

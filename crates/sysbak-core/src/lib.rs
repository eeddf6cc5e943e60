//! # sysbak-core
//!
//! Core library for sysbak providing:
//! - The immutable [`RunConfiguration`] shared by every component
//! - Layered configuration loading (defaults, YAML file, environment, CLI)
//! - Host and user helpers used for archive provenance

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{ConfigLoader, PartialConfig, ResolvedConfig};
pub use error::{Error, Result};
pub use types::{ChecksumAlgorithm, Compression, Encryption, RunConfiguration, TaskOutputMode};
pub use utils::{get_home_dir, hostname, username};

//! Type definitions shared across sysbak crates

pub mod run_config;

pub use run_config::*;

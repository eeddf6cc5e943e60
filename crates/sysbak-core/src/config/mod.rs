//! Configuration loading

pub mod loader;

pub use loader::{ConfigLoader, PartialConfig, ResolvedConfig};

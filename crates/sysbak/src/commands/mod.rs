//! CLI command implementations

pub mod backup;
pub mod restore;

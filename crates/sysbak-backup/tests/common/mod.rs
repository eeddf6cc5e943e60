//! Common test infrastructure for sysbak-backup tests
//!
//! # Usage
//!
//! In your test file, add:
//! ```ignore
//! mod common;
//! use common::*;
//! ```
//!
//! # Modules
//!
//! - `fixtures`: a throwaway file-system root, output dir and config dir
//! - `assertions`: checks on summaries and restored trees

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

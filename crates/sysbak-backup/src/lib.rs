//! sysbak backup engine
//!
//! This crate runs one backup or restore end to end. A backup takes the run
//! lock, compiles the include/exclude spec files, runs the collection tasks,
//! and then builds a single archive. Retention prunes older archives of the
//! same series. Restore reverses the pipeline from the archive's file name.
//!
//! # Features
//!
//! ## Backup
//! - **Path lists**: env-expanded include/exclude specs, command substitution refused
//! - **Collection tasks**: independently failing executables writing into an extras tree
//! - **Single archive**: tar of the includes plus extras under `__extras__/`
//! - **Soft-failing stages**: compress (zstd, xz, gzip), encrypt (gpg), place, checksum, verify
//! - **Idempotent naming**: an existing artifact is never replaced without overwrite
//! - **Retention**: keep the newest N archives of a prefix/tag series
//!
//! ## Restore
//! - **Format detection** from trailing extensions
//! - **Dry-run listing** without touching the target
//! - **Conflict policy**: keep existing files (default) or overwrite
//!
//! Dropping a run or restore future raises its [`CancelFlag`]; the blocking
//! worker stops at its next check and only then releases the lock.
//!
//! # Examples
//!
//! ```no_run
//! use sysbak_backup::{run_backup, BackupOutcome, RunLog};
//! use sysbak_core::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolved = ConfigLoader::new()?.load(None, Default::default())?;
//!     let log = RunLog::open(resolved.config.log_file.as_std_path())?;
//!
//!     if let BackupOutcome::Completed(summary) = run_backup(&resolved.config, &log).await? {
//!         print!("{}", summary);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cancel;
pub mod checksum;
pub mod compression;
pub mod encryption;
pub mod error;
pub mod format;
pub mod lock;
pub mod manifest;
pub mod naming;
pub mod pathspec;
pub mod restore;
pub mod retention;
pub mod run;
pub mod runlog;
pub mod summary;
pub mod tasks;

// Re-export commonly used types
pub use archive::{
    verify_archive, verify_archive_with, ArchiveOutcome, ArchivePipeline, Stage, StageReport,
    StageStatus, EXTRAS_PREFIX,
};
pub use cancel::{CancelFlag, CancelGuard};
pub use checksum::calculate_checksum;
pub use compression::{compress_file, CompressionStats};
pub use encryption::EncryptionPlan;
pub use error::BackupError;
pub use format::{DecodePipeline, DecodeStep, FormatChain};
pub use lock::{LockOutcome, RunLock};
pub use manifest::{Manifest, MANIFEST_FILENAME};
pub use naming::ArchiveName;
pub use pathspec::{CompiledPathList, ExclusionSet, PathSpec};
pub use restore::{RestoreManager, RestoreMode, RestoreResult};
pub use retention::{prune, RetentionReport};
pub use run::{run_backup, run_backup_at, BackupOutcome};
pub use runlog::RunLog;
pub use summary::{RunStatus, RunSummary};
pub use tasks::{Task, TaskRegistry, TaskRunner, TaskSummary};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

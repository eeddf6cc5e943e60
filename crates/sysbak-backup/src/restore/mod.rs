//! Restore system
//!
//! The inverse of the archive pipeline. The decode chain comes from the
//! archive's file name alone; the tar stream is then either listed (dry run)
//! or unpacked into a target directory under the configured conflict policy.

use crate::archive::EXTRAS_PREFIX;
use crate::cancel::{cancelled, CancelFlag, CancellableReader};
use crate::format::DecodePipeline;
use crate::lock::RunLock;
use crate::manifest::{Manifest, MANIFEST_FILENAME};
use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tar::Archive;
use tracing::{debug, info, warn};

pub mod modes;
pub mod validation;

pub use modes::{RestoreAction, RestoreMode, RestoreModeHandler};
pub use validation::{validate_restore_preconditions, validate_target_writable};

#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Non-directory entries written
    pub restored: usize,

    /// Non-directory entries left alone because of the conflict policy
    pub skipped: usize,

    /// Entries that could not be unpacked
    pub failed: usize,

    /// Where task extras landed, when the archive had any
    pub extras_dir: Option<PathBuf>,

    /// Provenance record found among the extras
    pub manifest: Option<Manifest>,

    pub duration: Duration,
}

/// One entry as shown by a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
}

pub struct RestoreManager {
    mode: RestoreMode,
    lock: Option<Arc<RunLock>>,
}

impl RestoreManager {
    pub fn new(mode: RestoreMode) -> Self {
        Self { mode, lock: None }
    }

    /// Keeps `lock` held until every worker this manager starts has stopped.
    pub fn holding(mut self, lock: RunLock) -> Self {
        self.lock = Some(Arc::new(lock));
        self
    }

    pub fn mode(&self) -> RestoreMode {
        self.mode
    }

    /// Lists the archive's contents without writing anything.
    pub async fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let archive = archive.to_path_buf();
        let cancel = CancelFlag::default();
        let _cancel_guard = cancel.guard();
        let held = self.lock.clone();
        tokio::task::spawn_blocking(move || {
            let _held = held;
            list_blocking(&archive, &cancel)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Restore worker failed: {}", e))?
    }

    /// Unpacks the archive into `target`.
    ///
    /// Dropping the returned future stops the worker after its current entry.
    pub async fn extract(&self, archive: &Path, target: &Path) -> Result<RestoreResult> {
        let mode = self.mode;
        let archive = archive.to_path_buf();
        let target = target.to_path_buf();
        let cancel = CancelFlag::default();
        let _cancel_guard = cancel.guard();
        let held = self.lock.clone();
        tokio::task::spawn_blocking(move || {
            let _held = held;
            extract_blocking(mode, &archive, &target, &cancel)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Restore worker failed: {}", e))?
    }
}

/// Finishes the decoders, or kills them if the walk was cancelled.
fn close(
    reader: CancellableReader<DecodePipeline>,
    cancel: &CancelFlag,
    walked: Result<()>,
) -> Result<()> {
    let pipeline = reader.into_inner();
    if cancel.is_cancelled() {
        pipeline.abort();
        return Err(cancelled().into());
    }
    let finished = pipeline.finish();
    walked?;
    finished?;
    Ok(())
}

fn list_blocking(archive: &Path, cancel: &CancelFlag) -> Result<Vec<ArchiveEntry>> {
    validate_restore_preconditions(archive)?;
    let mut reader = CancellableReader::new(DecodePipeline::open(archive)?, cancel.clone());

    let mut listed = Vec::new();
    let walked: Result<()> = (|| {
        let mut tar = Archive::new(&mut reader);
        for entry in tar.entries()? {
            let mut entry = entry?;
            listed.push(ArchiveEntry {
                path: entry.path()?.into_owned(),
                size: entry.header().size().unwrap_or(0),
                is_dir: entry.header().entry_type().is_dir(),
            });
            io::copy(&mut entry, &mut io::sink())?;
        }
        Ok(())
    })();

    close(reader, cancel, walked)?;
    Ok(listed)
}

fn extract_blocking(
    mode: RestoreMode,
    archive: &Path,
    target: &Path,
    cancel: &CancelFlag,
) -> Result<RestoreResult> {
    let start = Instant::now();

    info!(
        "Starting restore: archive={}, target={}, mode={}",
        archive.display(),
        target.display(),
        mode.as_str()
    );

    validate_restore_preconditions(archive)?;
    let uid = validate_target_writable(target)?;
    let preserve_owner = uid == 0;
    if !preserve_owner {
        warn!("Not running as root; file ownership will not be restored");
    }

    let mut reader = CancellableReader::new(DecodePipeline::open(archive)?, cancel.clone());
    let handler = mode.handler();
    let mut restored = 0;
    let mut skipped = 0;
    let mut failed = 0;
    let mut saw_extras = false;

    let walked: Result<()> = (|| {
        let mut tar = Archive::new(&mut reader);
        tar.set_preserve_permissions(true);
        tar.set_preserve_mtime(true);
        tar.set_unpack_xattrs(true);
        tar.set_preserve_ownerships(preserve_owner);
        tar.set_overwrite(true);

        for entry in tar.entries()? {
            cancel.check()?;
            let mut entry = entry?;
            let rel = entry.path()?.into_owned();
            if rel.as_os_str().is_empty() {
                continue;
            }
            if rel.starts_with(EXTRAS_PREFIX) {
                saw_extras = true;
            }

            let is_dir = entry.header().entry_type().is_dir();
            let dest = target.join(&rel);
            let action = match fs::symlink_metadata(&dest) {
                Ok(existing) => handler.handle_existing(&dest, &existing, is_dir)?,
                Err(_) => handler.handle_new(&dest)?,
            };

            if let RestoreAction::Skip { reason } = action {
                debug!("Skipping {}: {}", rel.display(), reason);
                if !is_dir {
                    skipped += 1;
                }
                continue;
            }

            match entry.unpack_in(target) {
                Ok(true) => {
                    if !is_dir {
                        restored += 1;
                    }
                }
                Ok(false) => {
                    warn!("Refusing to unpack {} outside the target", rel.display());
                    failed += 1;
                }
                Err(e) => {
                    warn!("Failed to restore {}: {}", rel.display(), e);
                    failed += 1;
                }
            }
        }
        Ok(())
    })();

    if cancel.is_cancelled() {
        warn!(
            "Restore cancelled after {} entries; the target is partially restored",
            restored
        );
    }
    close(reader, cancel, walked)?;

    let extras_dir = saw_extras.then(|| target.join(EXTRAS_PREFIX));
    let manifest = extras_dir
        .as_ref()
        .and_then(|dir| fs::read_to_string(dir.join(MANIFEST_FILENAME)).ok())
        .map(|text| Manifest::parse(&text));

    let duration = start.elapsed();
    info!(
        "Restore complete: restored={}, skipped={}, failed={}, duration={:?}",
        restored, skipped, failed, duration
    );

    Ok(RestoreResult {
        restored,
        skipped,
        failed,
        extras_dir,
        manifest,
        duration,
    })
}

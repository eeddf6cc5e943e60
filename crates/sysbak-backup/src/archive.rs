//! Archive pipeline: assemble → compress → encrypt → place → checksum → verify.
//!
//! Each stage works on the fully written output of the previous one inside
//! the run's scratch directory. A failing stage is recorded in its
//! [`StageReport`] and the pipeline carries on with the best artifact it has:
//! a failed compression leaves the raw tar, a failed encryption leaves the
//! compressed file. Only a failed assembly or placement ends the pipeline
//! early, because there is nothing left to work on.

use crate::cancel::{CancelFlag, CancellableReader};
use crate::checksum::{remove_sidecars, write_sidecar};
use crate::compression::{available_compression, compress_file};
use crate::encryption::{encrypt_file, EncryptionPlan};
use crate::error::BackupError;
use crate::format::DecodePipeline;
use crate::naming::ArchiveName;
use crate::pathspec::ExclusionSet;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use sysbak_core::{ChecksumAlgorithm, Compression, RunConfiguration};
use tar::Builder as TarBuilder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Path prefix under which the extras directory is stored in every archive
pub const EXTRAS_PREFIX: &str = "__extras__";

/// Name of the cache directory tag file
pub const CACHEDIR_TAG: &str = "CACHEDIR.TAG";

/// Required first bytes of a valid `CACHEDIR.TAG`
pub const CACHEDIR_SIGNATURE: &[u8] = b"Signature: 8a477f597d28d172789f06886806bc55";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Assemble,
    Compress,
    Encrypt,
    Place,
    Checksum,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Assemble => "assemble",
            Stage::Compress => "compress",
            Stage::Encrypt => "encrypt",
            Stage::Place => "place",
            Stage::Checksum => "checksum",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Ok,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
}

impl StageReport {
    fn ok(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Ok,
        }
    }

    fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped(reason.into()),
        }
    }

    fn failed(stage: Stage, reason: impl fmt::Display) -> Self {
        let reason = reason.to_string();
        warn!("Stage {} failed: {}", stage, reason);
        Self {
            stage,
            status: StageStatus::Failed(reason),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StageStatus::Failed(_))
    }
}

/// Raw archive accounting, captured before any transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Non-directory entries in the raw tar, extras included
    pub files: usize,

    /// Size of the uncompressed tar in bytes
    pub raw_size: u64,

    /// Paths that could not be read and were left out
    pub unreadable: usize,
}

/// Everything the pipeline produced
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    /// Name reflecting the transforms that were actually applied
    pub name: ArchiveName,

    /// Placed artifact, if placement happened
    pub path: Option<PathBuf>,

    pub sidecar: Option<PathBuf>,
    pub stats: AssemblyStats,
    pub archive_size: u64,

    /// Placement found an existing artifact and overwrite was off
    pub already_exists: bool,

    pub stages: Vec<StageReport>,
}

impl ArchiveOutcome {
    fn new(name: ArchiveName) -> Self {
        Self {
            name,
            path: None,
            sidecar: None,
            stats: AssemblyStats::default(),
            archive_size: 0,
            already_exists: false,
            stages: Vec::new(),
        }
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.stage)
            .collect()
    }

    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Builds one archive for a run.
pub struct ArchivePipeline {
    config: RunConfiguration,
    scratch_dir: PathBuf,
    encryption: EncryptionPlan,
    /// Codec actually applied, after checking for its tool
    compression: Compression,
    cancel: CancelFlag,
}

impl ArchivePipeline {
    /// Creates a pipeline writing intermediates into `scratch_dir`.
    pub fn new(config: RunConfiguration, scratch_dir: PathBuf) -> Self {
        let encryption = EncryptionPlan::resolve(config.encryption, config.recipient.as_deref());
        let compression = available_compression(config.compression);
        Self {
            config,
            scratch_dir,
            encryption,
            compression,
            cancel: CancelFlag::default(),
        }
    }

    /// Replaces the codec found available on this host.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Replaces the encryption prerequisites found on PATH.
    pub fn with_encryption_plan(mut self, plan: EncryptionPlan) -> Self {
        self.encryption = plan;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn encryption_plan(&self) -> &EncryptionPlan {
        &self.encryption
    }

    /// The codec the compression stage will apply.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// The name this run will produce if every stage succeeds.
    pub fn intended_name(&self, base: &ArchiveName) -> ArchiveName {
        base.clone()
            .with_compression(self.compression)
            .with_encryption(matches!(self.encryption, EncryptionPlan::Ready { .. }))
    }

    /// Runs every stage. Never fails: problems end up in the stage reports.
    pub fn run(
        &self,
        base: &ArchiveName,
        includes: &[PathBuf],
        exclusions: &ExclusionSet,
        extras_dir: &Path,
    ) -> ArchiveOutcome {
        let mut name = base
            .clone()
            .with_compression(Compression::None)
            .with_encryption(false);
        let mut outcome = ArchiveOutcome::new(name.clone());

        // 1-2. Raw assembly and accounting
        let raw_path = self.scratch_dir.join(name.file_name());
        match self.assemble(&raw_path, includes, exclusions, extras_dir) {
            Ok(stats) => {
                info!(
                    "Assembled {} entries ({} bytes, {} unreadable)",
                    stats.files, stats.raw_size, stats.unreadable
                );
                outcome.stats = stats;
                outcome.stages.push(StageReport::ok(Stage::Assemble));
            }
            Err(e) => {
                let _ = fs::remove_file(&raw_path);
                outcome.stages.push(StageReport::failed(Stage::Assemble, e));
                return outcome;
            }
        }
        let mut current = raw_path;

        // 3. Compression
        if self.cancelled(&mut outcome, Stage::Compress) {
            return outcome;
        }
        if self.compression == Compression::None {
            outcome.stages.push(if self.config.compression == Compression::None {
                StageReport::skipped(Stage::Compress, "compression disabled")
            } else {
                StageReport::failed(
                    Stage::Compress,
                    format!("{} is not available", self.config.compression),
                )
            });
        } else {
            let candidate = name.clone().with_compression(self.compression);
            let dest = self.scratch_dir.join(candidate.file_name());
            match compress_file(
                &current,
                &dest,
                self.compression,
                self.config.compression_level,
                &self.cancel,
            ) {
                Ok(stats) => {
                    info!(
                        "Compressed with {}: {} -> {} bytes ({}% saved)",
                        self.compression,
                        stats.original_size,
                        stats.compressed_size,
                        stats.compression_percentage()
                    );
                    let _ = fs::remove_file(&current);
                    current = dest;
                    name = candidate;
                    outcome.stages.push(StageReport::ok(Stage::Compress));
                }
                Err(e) => outcome.stages.push(StageReport::failed(Stage::Compress, e)),
            }
        }

        // 4. Encryption
        if self.cancelled(&mut outcome, Stage::Encrypt) {
            return outcome;
        }
        match &self.encryption {
            EncryptionPlan::Disabled => outcome
                .stages
                .push(StageReport::skipped(Stage::Encrypt, "encryption disabled")),
            EncryptionPlan::Unavailable(reason) => {
                warn!("Encryption requested but {}; archive stays unencrypted", reason);
                outcome
                    .stages
                    .push(StageReport::skipped(Stage::Encrypt, reason.clone()));
            }
            EncryptionPlan::Ready { tool, recipient } => {
                match encrypt_file(tool, recipient, &current, &self.cancel) {
                    Ok(dest) => {
                        let _ = fs::remove_file(&current);
                        current = dest;
                        name = name.clone().with_encryption(true);
                        outcome.stages.push(StageReport::ok(Stage::Encrypt));
                    }
                    Err(e) => outcome.stages.push(StageReport::failed(Stage::Encrypt, e)),
                }
            }
        }
        outcome.name = name.clone();

        // 5. Placement
        if self.cancelled(&mut outcome, Stage::Place) {
            return outcome;
        }
        let dest = self.config.output_dir.as_std_path().join(name.file_name());
        if dest.exists() {
            if !self.config.overwrite {
                info!("{} already exists; skipping", dest.display());
                outcome.already_exists = true;
                outcome
                    .stages
                    .push(StageReport::skipped(Stage::Place, "artifact already exists"));
                return outcome;
            }
            info!("Overwriting {}", dest.display());
            if let Err(e) = fs::remove_file(&dest) {
                outcome.stages.push(StageReport::failed(
                    Stage::Place,
                    format!("cannot remove {}: {}", dest.display(), e),
                ));
                return outcome;
            }
            remove_sidecars(&dest);
        }
        match place(&current, &dest) {
            Ok(()) => {
                outcome.archive_size = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
                outcome.path = Some(dest.clone());
                outcome.stages.push(StageReport::ok(Stage::Place));
            }
            Err(e) => {
                outcome.stages.push(StageReport::failed(Stage::Place, e));
                return outcome;
            }
        }

        // 6. Checksum
        if self.config.checksum == ChecksumAlgorithm::None {
            outcome
                .stages
                .push(StageReport::skipped(Stage::Checksum, "checksum disabled"));
        } else {
            match write_sidecar(&dest, self.config.checksum) {
                Ok(sidecar) => {
                    outcome.sidecar = Some(sidecar);
                    outcome.stages.push(StageReport::ok(Stage::Checksum));
                }
                Err(e) => outcome.stages.push(StageReport::failed(Stage::Checksum, e)),
            }
        }

        // 7. Verification
        if self.cancelled(&mut outcome, Stage::Verify) {
            return outcome;
        }
        if !self.config.verify {
            outcome
                .stages
                .push(StageReport::skipped(Stage::Verify, "verification disabled"));
        } else {
            outcome.stages.push(match verify_archive_with(&dest, &self.cancel) {
                Ok(entries) => {
                    info!("Verified {} ({} entries)", dest.display(), entries);
                    StageReport::ok(Stage::Verify)
                }
                Err(e) => match e.downcast_ref::<BackupError>() {
                    Some(BackupError::DecryptorMissing) | Some(BackupError::DecoderMissing { .. }) => {
                        warn!("Cannot verify {}: {}", dest.display(), e);
                        StageReport::skipped(Stage::Verify, e.to_string())
                    }
                    _ => StageReport::failed(Stage::Verify, e),
                },
            });
        }

        outcome
    }

    /// Records `stage` as failed when the run has been cancelled.
    fn cancelled(&self, outcome: &mut ArchiveOutcome, stage: Stage) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        outcome.stages.push(StageReport::failed(stage, "run was cancelled"));
        true
    }

    /// Writes the raw tar: every include under the configured root, then the
    /// extras tree under [`EXTRAS_PREFIX`].
    fn assemble(
        &self,
        raw_path: &Path,
        includes: &[PathBuf],
        exclusions: &ExclusionSet,
        extras_dir: &Path,
    ) -> anyhow::Result<AssemblyStats> {
        let root = self.config.root.as_std_path();
        let file = File::create(raw_path)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", raw_path.display(), e))?;

        let mut tar = TarBuilder::new(BufWriter::new(file));
        tar.follow_symlinks(false);
        tar.sparse(self.config.sparse);

        let mut unreadable = 0;
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut cache_dirs: HashMap<PathBuf, bool> = HashMap::new();
        let exclude_caches = self.config.exclude_caches;

        for rel in includes {
            let start = root.join(rel);
            if let Err(e) = fs::symlink_metadata(&start) {
                warn!("Cannot stat {}: {}", start.display(), e);
                unreadable += 1;
                continue;
            }

            let walker = WalkDir::new(&start)
                .follow_links(false)
                .same_file_system(self.config.one_file_system)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
                    if exclusions.should_exclude(rel) {
                        debug!("Excluded {}", entry.path().display());
                        return false;
                    }
                    if exclude_caches && entry.depth() > 0 && entry.file_name() != CACHEDIR_TAG {
                        if let Some(parent) = entry.path().parent() {
                            let tagged = *cache_dirs
                                .entry(parent.to_path_buf())
                                .or_insert_with(|| is_cache_dir(parent));
                            if tagged {
                                return false;
                            }
                        }
                    }
                    true
                });

            for entry in walker {
                if self.cancel.is_cancelled() {
                    anyhow::bail!("Run was cancelled");
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default();
                        warn!("Cannot read {}: {}", path, e);
                        unreadable += 1;
                        continue;
                    }
                };

                let rel = match entry.path().strip_prefix(root) {
                    Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                    _ => continue,
                };
                if !seen.insert(rel.clone()) {
                    continue;
                }
                if let Err(e) = tar.append_path_with_name(entry.path(), &rel) {
                    warn!("Cannot archive {}: {}", entry.path().display(), e);
                    unreadable += 1;
                }
            }
        }

        tar.append_dir_all(EXTRAS_PREFIX, extras_dir).map_err(|e| {
            anyhow::anyhow!("Failed to add extras from {}: {}", extras_dir.display(), e)
        })?;

        let mut writer = tar.into_inner()?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush raw archive: {}", e.error()))?;
        file.sync_all()?;

        Ok(AssemblyStats {
            files: count_files(raw_path)?,
            raw_size: fs::metadata(raw_path)?.len(),
            unreadable,
        })
    }
}

/// True when `dir` holds a `CACHEDIR.TAG` with the standard signature.
pub fn is_cache_dir(dir: &Path) -> bool {
    let mut buf = [0u8; 43];
    match File::open(dir.join(CACHEDIR_TAG)) {
        Ok(mut file) => file.read_exact(&mut buf).is_ok() && buf[..] == *CACHEDIR_SIGNATURE,
        Err(_) => false,
    }
}

/// Counts non-directory entries of a plain tar.
fn count_files(raw_path: &Path) -> anyhow::Result<usize> {
    let mut archive = tar::Archive::new(BufReader::new(File::open(raw_path)?));
    let mut files = 0;
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_dir() {
            files += 1;
        }
    }
    Ok(files)
}

/// Moves `artifact` to `dest` with owner-only permissions.
///
/// Falls back to copy + rename through a hidden `.partial` file when the
/// scratch and output directories are on different devices, so `dest` only
/// ever names a complete file.
fn place(artifact: &Path, dest: &Path) -> anyhow::Result<()> {
    set_owner_only(artifact)?;

    if let Err(e) = fs::rename(artifact, dest) {
        debug!("rename into output failed ({}); copying instead", e);
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = dest.with_file_name(format!(".{}.partial", file_name));

        let copied = fs::copy(artifact, &partial)
            .and_then(|_| set_owner_only(&partial))
            .and_then(|_| File::open(&partial)?.sync_all())
            .and_then(|_| fs::rename(&partial, dest));
        if let Err(e) = copied {
            let _ = fs::remove_file(&partial);
            anyhow::bail!("Failed to place {}: {}", dest.display(), e);
        }
        let _ = fs::remove_file(artifact);
    }

    Ok(())
}

fn set_owner_only(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

/// Reads the archive back through its decode chain and walks every entry
/// without extracting anything. Returns the number of entries.
pub fn verify_archive(path: &Path) -> anyhow::Result<usize> {
    verify_archive_with(path, &CancelFlag::default())
}

/// [`verify_archive`] that stops reading, and kills any decoder, once
/// `cancel` is raised.
pub fn verify_archive_with(path: &Path, cancel: &CancelFlag) -> anyhow::Result<usize> {
    let mut reader = CancellableReader::new(DecodePipeline::open(path)?, cancel.clone());

    let mut entries = 0;
    let walked: anyhow::Result<()> = (|| {
        let mut archive = tar::Archive::new(&mut reader);
        for entry in archive.entries()? {
            let mut entry = entry?;
            io::copy(&mut entry, &mut io::sink())?;
            entries += 1;
        }
        Ok(())
    })();

    let pipeline = reader.into_inner();
    if cancel.is_cancelled() {
        pipeline.abort();
        return Err(crate::cancel::cancelled().into());
    }
    let finished = pipeline.finish();
    walked?;
    finished?;

    if entries == 0 {
        anyhow::bail!("Archive {} contains no entries", path.display());
    }
    Ok(entries)
}

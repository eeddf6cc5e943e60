//! Backup command

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args;
use sysbak_backup::{run_backup, BackupOutcome, RunLog, RunStatus};
use sysbak_core::{PartialConfig, RunConfiguration, TaskOutputMode};

use crate::output;

#[derive(Args, Debug, Default)]
pub struct BackupArgs {
    /// Never prompt; collection tasks are told not to prompt either
    #[arg(long)]
    pub non_interactive: bool,

    /// Compression codec (zstd, xz, gzip, none)
    #[arg(long)]
    pub compression: Option<String>,

    /// Codec-specific compression level
    #[arg(long)]
    pub compression_level: Option<i32>,

    /// Encryption mode (gpg, none)
    #[arg(long)]
    pub encryption: Option<String>,

    /// Encryption recipient (key id or e-mail)
    #[arg(long)]
    pub recipient: Option<String>,

    /// Read the archive back after writing it
    #[arg(long, overrides_with = "no_verify")]
    pub verify: bool,

    /// Skip read-back verification
    #[arg(long, overrides_with = "verify")]
    pub no_verify: bool,

    /// Checksum sidecar algorithm (sha256, sha512, none)
    #[arg(long)]
    pub checksum: Option<String>,

    /// Number of archives to keep (0 disables pruning)
    #[arg(long)]
    pub keep: Option<usize>,

    /// Stay on the file system of each include
    #[arg(long, overrides_with = "cross_file_systems")]
    pub one_file_system: bool,

    /// Descend into other mounted file systems
    #[arg(long, overrides_with = "one_file_system")]
    pub cross_file_systems: bool,

    /// Skip directories tagged with CACHEDIR.TAG
    #[arg(long, overrides_with = "no_exclude_caches")]
    pub exclude_caches: bool,

    /// Archive tagged cache directories too
    #[arg(long, overrides_with = "exclude_caches")]
    pub no_exclude_caches: bool,

    /// Store sparse files efficiently
    #[arg(long, overrides_with = "no_sparse")]
    pub sparse: bool,

    /// Store sparse files fully
    #[arg(long, overrides_with = "sparse")]
    pub no_sparse: bool,

    /// Tag appended to the archive name
    #[arg(long)]
    pub tag: Option<String>,

    /// Replace an existing archive with the same name
    #[arg(long)]
    pub overwrite: bool,

    /// Directory receiving the archive
    #[arg(short, long)]
    pub output_dir: Option<Utf8PathBuf>,

    /// Show collection task output live instead of only logging it
    #[arg(long)]
    pub stream_tasks: bool,
}

/// `Some(true)` for the positive switch, `Some(false)` for the negative one.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl BackupArgs {
    /// The CLI layer of the configuration.
    pub fn to_overrides(&self) -> PartialConfig {
        PartialConfig {
            output_dir: self.output_dir.clone(),
            compression: self.compression.clone(),
            compression_level: self.compression_level,
            encryption: self.encryption.clone(),
            recipient: self.recipient.clone(),
            checksum: self.checksum.clone(),
            keep: self.keep,
            verify: switch(self.verify, self.no_verify),
            overwrite: self.overwrite.then_some(true),
            one_file_system: switch(self.one_file_system, self.cross_file_systems),
            exclude_caches: switch(self.exclude_caches, self.no_exclude_caches),
            sparse: switch(self.sparse, self.no_sparse),
            tag: self.tag.clone(),
            non_interactive: self.non_interactive.then_some(true),
            task_output: self.stream_tasks.then(|| "streamed".to_string()),
            ..Default::default()
        }
    }
}

pub async fn run(config: &RunConfiguration, log: &RunLog) -> Result<()> {
    output::header("System Backup");
    output::kv("Prefix", &config.prefix);
    output::kv("Output", config.output_dir.as_str());
    output::kv("Compression", config.compression.as_str());
    output::kv("Encryption", config.encryption.as_str());
    if let Some(tag) = &config.tag {
        output::kv("Tag", tag);
    }
    println!();

    // Live task output and a spinner would fight over the terminal
    let spinner = (config.task_output == TaskOutputMode::Buffered)
        .then(|| output::spinner("Running backup..."));
    let outcome = run_backup(config, log).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match outcome? {
        BackupOutcome::LockBusy => {
            output::info(&format!(
                "Another backup is already running (lock {}); nothing to do",
                config.lock_file
            ));
        }
        BackupOutcome::Skipped(summary) => {
            output::info("An archive with this name already exists; use --overwrite to replace it");
            output::summary(&summary);
        }
        BackupOutcome::Completed(summary) => {
            match summary.status {
                RunStatus::Completed => output::success("Backup completed"),
                _ => output::warning("Backup completed with errors; see the summary and log"),
            }
            output::summary(&summary);
        }
    }

    Ok(())
}

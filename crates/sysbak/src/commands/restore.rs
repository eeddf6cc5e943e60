//! Restore command
//!
//! Connects the CLI restore UI to the sysbak-backup restore pipeline.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use sysbak_backup::restore::validate_restore_preconditions;
use sysbak_backup::{LockOutcome, RestoreManager, RestoreMode, RunLock, EXTRAS_PREFIX};
use sysbak_core::{PartialConfig, RunConfiguration};
use tracing::warn;

use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Archive to restore
    pub archive: PathBuf,

    /// Target directory (defaults to the configured root)
    #[arg(short, long)]
    pub target: Option<PathBuf>,

    /// List the archive's contents without restoring anything
    #[arg(long)]
    pub dry_run: bool,

    /// Leave existing files untouched (default)
    #[arg(long, conflicts_with = "overwrite")]
    pub keep_old_files: bool,

    /// Replace existing files with the archived version
    #[arg(long)]
    pub overwrite: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long, visible_alias = "yes")]
    pub non_interactive: bool,
}

impl RestoreArgs {
    pub fn to_overrides(&self) -> PartialConfig {
        PartialConfig {
            non_interactive: self.non_interactive.then_some(true),
            ..Default::default()
        }
    }

    pub fn mode(&self) -> RestoreMode {
        RestoreMode::from_flags(self.overwrite)
    }
}

pub async fn run(args: RestoreArgs, config: &RunConfiguration) -> Result<()> {
    output::header("System Restore");

    let target = args
        .target
        .clone()
        .unwrap_or_else(|| config.root.clone().into_std_path_buf());
    let mode = args.mode();

    output::kv("Archive", &args.archive.display().to_string());
    output::kv("Target", &target.display().to_string());
    output::kv("Mode", mode.as_str());
    if mode == RestoreMode::Overwrite {
        output::warning("OVERWRITE MODE - existing files will be replaced");
    }
    if args.dry_run {
        output::warning("DRY RUN MODE - no files will be restored");
    }
    println!();

    let chain = validate_restore_preconditions(&args.archive)?;
    if chain.is_encrypted() {
        output::info("Archive is encrypted; decrypting with gpg");
    }

    if args.dry_run {
        return list(&args.archive).await;
    }

    let lock = match RunLock::acquire(config.lock_file.as_std_path()) {
        Ok(LockOutcome::Acquired(lock)) => Some(lock),
        Ok(LockOutcome::Busy) => {
            output::info(&format!(
                "Another run holds {}; not restoring",
                config.lock_file
            ));
            return Ok(());
        }
        Ok(LockOutcome::Unsupported) => None,
        Err(e) => {
            warn!("{:#}; restoring without mutual exclusion", e);
            None
        }
    };

    if !config.non_interactive {
        use dialoguer::Confirm;
        let prompt = format!("Restore into {}?", target.display());
        if !Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?
        {
            output::info("Restore cancelled");
            return Ok(());
        }
    }

    let spinner = output::spinner("Restoring files...");
    let mut manager = RestoreManager::new(mode);
    if let Some(lock) = lock {
        manager = manager.holding(lock);
    }
    let result = manager
        .extract(&args.archive, &target)
        .await
        .context("Restore operation failed");
    spinner.finish_and_clear();
    let result = result?;

    println!();
    if result.failed == 0 {
        output::success("Restore completed");
    } else {
        output::warning("Restore completed with errors; see the log");
    }
    output::kv("Files restored", &result.restored.to_string());
    output::kv("Files skipped", &result.skipped.to_string());
    if result.failed > 0 {
        output::kv("Files failed", &result.failed.to_string());
    }
    output::kv(
        "Duration",
        &format!("{:.1}s", result.duration.as_secs_f64()),
    );

    if let Some(extras) = &result.extras_dir {
        println!();
        output::info(&format!(
            "Collected extras and the manifest are in {}",
            extras.display()
        ));
    }
    if let Some(manifest) = &result.manifest {
        output::kv("Created", &manifest.date);
        output::kv("Host", &manifest.host);
        output::kv(
            "Tasks",
            &format!(
                "{}/{}/{}",
                manifest.tasks_total, manifest.tasks_ok, manifest.tasks_fail
            ),
        );
    }

    Ok(())
}

async fn list(archive: &Path) -> Result<()> {
    let spinner = output::spinner("Reading archive...");
    let entries = RestoreManager::new(RestoreMode::default())
        .list(archive)
        .await;
    spinner.finish_and_clear();
    let entries = entries.context("Failed to read archive")?;

    let mut files = 0;
    for entry in &entries {
        if entry.is_dir {
            println!("  {}/", entry.path.display());
        } else {
            files += 1;
            println!("  {}", entry.path.display());
        }
    }
    println!();
    output::kv("Files", &files.to_string());
    output::kv("Extras", &format!("{}/", EXTRAS_PREFIX));
    output::success("Dry run complete");
    output::info("Remove --dry-run to perform the restore");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(overwrite: bool) -> RestoreArgs {
        RestoreArgs {
            archive: PathBuf::from("a.tar"),
            target: None,
            dry_run: false,
            keep_old_files: !overwrite,
            overwrite,
            non_interactive: false,
        }
    }

    #[test]
    fn test_mode_defaults_to_keep_existing() {
        assert_eq!(args(false).mode(), RestoreMode::KeepExisting);
        assert_eq!(args(true).mode(), RestoreMode::Overwrite);
    }

    #[test]
    fn test_overrides_only_carry_non_interactive() {
        assert_eq!(args(false).to_overrides().non_interactive, None);
        let mut yes = args(false);
        yes.non_interactive = true;
        assert_eq!(yes.to_overrides().non_interactive, Some(true));
    }
}

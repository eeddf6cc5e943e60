//! Backup run driver
//!
//! Composes the components in their fixed order: lock, scratch space, path
//! lists, collection tasks, manifest, archive pipeline, retention, summary.
//! Only an unusable output or scratch directory aborts a run; everything
//! else degrades and shows up in the summary.

use crate::archive::ArchivePipeline;
use crate::cancel::CancelFlag;
use crate::error::BackupError;
use crate::lock::{LockOutcome, RunLock};
use crate::manifest::Manifest;
use crate::naming::ArchiveName;
use crate::pathspec::{CompiledPathList, ExclusionSet};
use crate::retention::{self, RetentionReport};
use crate::runlog::RunLog;
use crate::summary::RunSummary;
use crate::tasks::{TaskContext, TaskRegistry, TaskRunner};
use anyhow::Context;
use chrono::{Local, NaiveDateTime, SecondsFormat};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use sysbak_core::{hostname, username, RunConfiguration};
use tracing::{info, warn};

/// NUL-delimited include list handed from the compiler to the assembler
const INCLUDE_LIST_NAME: &str = "include.list0";

/// Result of one backup invocation
#[derive(Debug, Clone)]
pub enum BackupOutcome {
    /// The pipeline ran; the summary says whether every stage succeeded
    Completed(RunSummary),
    /// The intended artifact already existed and overwrite was off
    Skipped(RunSummary),
    /// Another run holds the lock
    LockBusy,
}

impl BackupOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            BackupOutcome::Completed(summary) | BackupOutcome::Skipped(summary) => Some(summary),
            BackupOutcome::LockBusy => None,
        }
    }
}

/// Runs one backup stamped with the current local time.
pub async fn run_backup(config: &RunConfiguration, log: &RunLog) -> anyhow::Result<BackupOutcome> {
    run_backup_at(config, log, Local::now().naive_local()).await
}

/// Runs one backup whose artifact name carries `timestamp`.
pub async fn run_backup_at(
    config: &RunConfiguration,
    log: &RunLog,
    timestamp: NaiveDateTime,
) -> anyhow::Result<BackupOutcome> {
    let start = Instant::now();
    let cancel = CancelFlag::default();

    let lock = match RunLock::acquire(config.lock_file.as_std_path()) {
        Ok(LockOutcome::Acquired(lock)) => Some(lock),
        Ok(LockOutcome::Busy) => {
            info!(
                "Another backup run holds {}; nothing to do",
                config.lock_file
            );
            return Ok(BackupOutcome::LockBusy);
        }
        Ok(LockOutcome::Unsupported) => None,
        Err(e) => {
            warn!("{:#}; running without mutual exclusion", e);
            None
        }
    };
    let lock = Arc::new(lock);

    let output_dir = config.output_dir.as_std_path();
    fs::create_dir_all(output_dir).map_err(|e| BackupError::OutputUnavailable {
        path: output_dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let work_dir = config.work_dir.as_std_path();
    let scratch = fs::create_dir_all(work_dir)
        .and_then(|_| tempfile::Builder::new().prefix("sysbak-").tempdir_in(work_dir))
        .map_err(|e| BackupError::OutputUnavailable {
            path: work_dir.to_path_buf(),
            reason: format!("cannot create scratch directory: {}", e),
        })?;
    let scratch = Arc::new(scratch);

    // Declared after the lock and scratch so it drops first: a dropped run
    // stops its worker, and the worker releases both when it returns.
    let _cancel_guard = cancel.guard();

    let base = ArchiveName::new(&config.prefix, timestamp, config.tag.clone());
    let pipeline = ArchivePipeline::new(config.clone(), scratch.path().to_path_buf())
        .with_cancel(cancel.clone());
    let intended = pipeline.intended_name(&base);
    let intended_path = output_dir.join(intended.file_name());
    if intended_path.exists() && !config.overwrite {
        info!(
            "{} already exists and overwrite is off; skipping run",
            intended_path.display()
        );
        let summary = RunSummary::skipped(config, intended_path, start.elapsed(), log.path());
        record_summary(log, &summary);
        return Ok(BackupOutcome::Skipped(summary));
    }
    info!("Starting backup {}", intended.file_name());

    let compiled = CompiledPathList::from_files(
        config.include_file.as_std_path(),
        config.exclude_file.as_std_path(),
    )
    .unwrap_or_else(|e| {
        warn!("{:#}; continuing with empty path lists", e);
        CompiledPathList::default()
    });
    let list_path = scratch.path().join(INCLUDE_LIST_NAME);
    compiled.write_include_list(&list_path)?;
    let includes = CompiledPathList::read_include_list(&list_path)?;
    info!(
        "Compiled {} include paths, {} exclude patterns",
        includes.len(),
        compiled.excludes.len()
    );

    let implicit = implicit_exclusions(
        config.root.as_std_path(),
        &[
            output_dir,
            scratch.path(),
            config.lock_file.as_std_path(),
            log.path(),
        ],
    );
    let exclusions = ExclusionSet::new(&compiled.excludes, implicit)?;

    let extras_dir = scratch.path().join("extras");
    fs::create_dir_all(&extras_dir)
        .with_context(|| format!("Failed to create extras directory {}", extras_dir.display()))?;

    let registry = TaskRegistry::discover(config.tasks_dir.as_std_path()).unwrap_or_else(|e| {
        warn!("{:#}; running no tasks", e);
        TaskRegistry::default()
    });
    let ctx = TaskContext {
        extras_dir: extras_dir.clone(),
        non_interactive: config.non_interactive,
        log: log.clone(),
        output: config.task_output,
    };
    let tasks = TaskRunner::new(ctx).run_all(&registry).await;
    info!(
        "Tasks finished: total={} ok={} fail={}",
        tasks.total, tasks.succeeded, tasks.failed
    );

    let manifest = Manifest {
        name: intended.file_name(),
        date: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        host: hostname(),
        user: username(),
        compress: pipeline.compression().as_str().to_string(),
        encryption: if intended.encrypted { "gpg" } else { "none" }.to_string(),
        tasks_total: tasks.total,
        tasks_ok: tasks.succeeded,
        tasks_fail: tasks.failed,
    };
    if let Err(e) = manifest.write_to(&extras_dir) {
        warn!("Failed to write manifest: {:#}", e);
    }

    let worker_extras = extras_dir.clone();
    let worker_lock = Arc::clone(&lock);
    let worker_scratch = Arc::clone(&scratch);
    let outcome = tokio::task::spawn_blocking(move || {
        let _held = (worker_scratch, worker_lock);
        pipeline.run(&base, &includes, &exclusions, &worker_extras)
    })
    .await
    .context("Archive pipeline worker failed")?;

    let retention = if outcome.path.is_some() {
        retention::prune(
            output_dir,
            &config.prefix,
            config.tag.as_deref(),
            config.keep,
        )
        .unwrap_or_else(|e| {
            warn!("Retention failed: {:#}", e);
            RetentionReport::default()
        })
    } else {
        RetentionReport::default()
    };

    let summary = RunSummary::from_run(
        config,
        &outcome,
        &tasks,
        &retention,
        start.elapsed(),
        log.path(),
    );
    record_summary(log, &summary);

    if outcome.already_exists {
        Ok(BackupOutcome::Skipped(summary))
    } else {
        Ok(BackupOutcome::Completed(summary))
    }
}

/// Paths the run writes to itself, rebased on the archive root.
fn implicit_exclusions(root: &Path, paths: &[&Path]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter_map(|path| {
            let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
            absolute
                .strip_prefix(&root)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
        .collect()
}

fn record_summary(log: &RunLog, summary: &RunSummary) {
    for (key, value) in summary.lines() {
        if let Err(e) = log.append_line(&format!("{}: {}", key, value)) {
            warn!("Failed to write summary to run log: {}", e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_implicit_exclusions_are_root_relative() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("var/backups");
        fs::create_dir_all(&out).unwrap();
        let outside = TempDir::new().unwrap();

        let rel = implicit_exclusions(root.path(), &[out.as_path(), outside.path()]);
        assert_eq!(rel, vec![PathBuf::from("var/backups")]);
    }

    #[test]
    fn test_root_itself_is_never_excluded() {
        let root = TempDir::new().unwrap();
        assert!(implicit_exclusions(root.path(), &[root.path()]).is_empty());
    }
}

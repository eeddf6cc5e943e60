//! End-of-run summary block
//!
//! Every backup run, successful, degraded or skipped, ends with the same
//! fixed set of `Key: value` lines so unattended runs can be checked by
//! grepping the log instead of parsing it.

use crate::archive::ArchiveOutcome;
use crate::retention::RetentionReport;
use crate::tasks::TaskSummary;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysbak_core::RunConfiguration;

/// Overall result of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every stage and task succeeded
    Completed,
    /// An artifact may exist, but some stage or task failed
    Degraded,
    /// The intended artifact already existed and overwrite was not requested
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Degraded => "completed with errors",
            RunStatus::Skipped => "skipped (archive exists)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,

    /// Placed artifact, or the existing one when the run was skipped
    pub output: Option<PathBuf>,

    /// Codec actually applied to the artifact
    pub compression: String,

    /// Encryption actually applied to the artifact
    pub encryption: String,

    pub checksum: String,
    pub files_in_tar: usize,
    pub raw_size: u64,
    pub archive_size: u64,
    pub tasks_total: usize,
    pub tasks_ok: usize,
    pub tasks_fail: usize,
    pub failed_stages: Vec<String>,
    pub pruned: usize,
    pub elapsed: Duration,
    pub log: PathBuf,
}

impl RunSummary {
    /// Summary for a run that went through the archive pipeline.
    pub fn from_run(
        config: &RunConfiguration,
        outcome: &ArchiveOutcome,
        tasks: &TaskSummary,
        retention: &RetentionReport,
        elapsed: Duration,
        log: &Path,
    ) -> Self {
        let failed_stages: Vec<String> = outcome
            .failed_stages()
            .iter()
            .map(|stage| stage.as_str().to_string())
            .collect();

        let status = if outcome.already_exists {
            RunStatus::Skipped
        } else if failed_stages.is_empty() && tasks.failed == 0 && outcome.path.is_some() {
            RunStatus::Completed
        } else {
            RunStatus::Degraded
        };

        let output = if outcome.already_exists {
            Some(config.output_dir.as_std_path().join(outcome.name.file_name()))
        } else {
            outcome.path.clone()
        };

        Self {
            status,
            output,
            compression: outcome.name.compression.as_str().to_string(),
            encryption: if outcome.name.encrypted { "gpg" } else { "none" }.to_string(),
            checksum: match &outcome.sidecar {
                Some(_) => config.checksum.as_str().to_string(),
                None => "none".to_string(),
            },
            files_in_tar: outcome.stats.files,
            raw_size: outcome.stats.raw_size,
            archive_size: outcome.archive_size,
            tasks_total: tasks.total,
            tasks_ok: tasks.succeeded,
            tasks_fail: tasks.failed,
            failed_stages,
            pruned: retention.removed.len(),
            elapsed,
            log: log.to_path_buf(),
        }
    }

    /// Summary for a run skipped before any work because its artifact exists.
    pub fn skipped(config: &RunConfiguration, existing: PathBuf, elapsed: Duration, log: &Path) -> Self {
        Self {
            status: RunStatus::Skipped,
            output: Some(existing),
            compression: config.compression.as_str().to_string(),
            encryption: config.encryption.as_str().to_string(),
            checksum: config.checksum.as_str().to_string(),
            files_in_tar: 0,
            raw_size: 0,
            archive_size: 0,
            tasks_total: 0,
            tasks_ok: 0,
            tasks_fail: 0,
            failed_stages: Vec::new(),
            pruned: 0,
            elapsed,
            log: log.to_path_buf(),
        }
    }

    /// The fixed block as ordered key/value pairs.
    pub fn lines(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Status", self.status.as_str().to_string()),
            (
                "Output",
                self.output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string()),
            ),
            ("Compression", self.compression.clone()),
            ("Encryption", self.encryption.clone()),
            ("Checksum", self.checksum.clone()),
            ("Files in TAR", self.files_in_tar.to_string()),
            ("Raw size", format_bytes(self.raw_size)),
            ("Archive size", format_bytes(self.archive_size)),
            (
                "Tasks",
                format!("{}/{}/{}", self.tasks_total, self.tasks_ok, self.tasks_fail),
            ),
            (
                "Failed stages",
                if self.failed_stages.is_empty() {
                    "none".to_string()
                } else {
                    self.failed_stages.join(", ")
                },
            ),
            ("Pruned", self.pruned.to_string()),
            ("Elapsed", format!("{:.1}s", self.elapsed.as_secs_f64())),
            ("Log", self.log.display().to_string()),
        ]
    }

    /// Looks up one rendered value by key.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lines()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.lines() {
            writeln!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunSummary {
        RunSummary {
            status: RunStatus::Degraded,
            output: Some(PathBuf::from("/backups/system-backup-20260101-000000.tar.zst")),
            compression: "zstd".to_string(),
            encryption: "none".to_string(),
            checksum: "sha256".to_string(),
            files_in_tar: 2,
            raw_size: 10_240,
            archive_size: 512,
            tasks_total: 3,
            tasks_ok: 2,
            tasks_fail: 1,
            failed_stages: vec!["verify".to_string()],
            pruned: 1,
            elapsed: Duration::from_millis(1500),
            log: PathBuf::from("/backups/system-backup.log"),
        }
    }

    #[test]
    fn test_block_has_fixed_keys_in_order() {
        let keys: Vec<_> = sample().lines().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "Status",
                "Output",
                "Compression",
                "Encryption",
                "Checksum",
                "Files in TAR",
                "Raw size",
                "Archive size",
                "Tasks",
                "Failed stages",
                "Pruned",
                "Elapsed",
                "Log"
            ]
        );
    }

    #[test]
    fn test_rendering() {
        let text = sample().to_string();
        assert!(text.contains("Files in TAR: 2\n"));
        assert!(text.contains("Tasks: 3/2/1\n"));
        assert!(text.contains("Failed stages: verify\n"));
        assert!(text.contains("Raw size: 10.00 KB\n"));
        assert!(text.contains("Elapsed: 1.5s\n"));
        assert_eq!(sample().value("Archive size").as_deref(), Some("512 B"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}

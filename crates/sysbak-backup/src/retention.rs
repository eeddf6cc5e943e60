//! Retention: keep the newest N archives of one series.
//!
//! A series is every archive whose name parses with the same prefix and
//! tag. Archives from other series, sidecars and unrelated files in the
//! output directory are never touched.

use crate::checksum::remove_sidecars;
use crate::naming::ArchiveName;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Archives still present, newest first
    pub kept: Vec<PathBuf>,

    /// Archives deleted by this pass
    pub removed: Vec<PathBuf>,

    /// Archives that should have been deleted but could not be
    pub failed: Vec<PathBuf>,
}

/// Lists the archives of a series, newest first.
pub fn list_series(output_dir: &Path, prefix: &str, tag: Option<&str>) -> anyhow::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read output directory {}: {}",
                output_dir.display(),
                e
            ))
        }
    };

    let mut series: Vec<(ArchiveName, SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(ArchiveName::parse) else {
            continue;
        };
        if !name.same_series(prefix, tag) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        series.push((name, mtime, entry.path()));
    }

    series.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp).then(b.1.cmp(&a.1)));
    Ok(series.into_iter().map(|(_, _, path)| path).collect())
}

/// Deletes every archive of the series beyond the newest `keep`, together
/// with its checksum sidecars. `keep == 0` disables pruning.
pub fn prune(
    output_dir: &Path,
    prefix: &str,
    tag: Option<&str>,
    keep: usize,
) -> anyhow::Result<RetentionReport> {
    let archives = list_series(output_dir, prefix, tag)?;
    let mut report = RetentionReport::default();

    if keep == 0 {
        debug!("Retention disabled");
        report.kept = archives;
        return Ok(report);
    }

    for (idx, path) in archives.into_iter().enumerate() {
        if idx < keep {
            report.kept.push(path);
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                remove_sidecars(&path);
                info!("Pruned {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                warn!("Failed to prune {}: {}", path.display(), e);
                report.failed.push(path);
            }
        }
    }

    Ok(report)
}

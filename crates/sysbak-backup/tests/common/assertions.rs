//! Assertion helpers for backup runs

use std::fs;
use std::path::Path;
use sysbak_backup::{BackupOutcome, RunSummary};

/// Unwraps a completed run, failing with the outcome otherwise.
pub fn expect_completed(outcome: BackupOutcome) -> RunSummary {
    match outcome {
        BackupOutcome::Completed(summary) => summary,
        other => panic!("Expected a completed run but got {:?}", other),
    }
}

/// Unwraps a skipped run, failing with the outcome otherwise.
pub fn expect_skipped(outcome: BackupOutcome) -> RunSummary {
    match outcome {
        BackupOutcome::Skipped(summary) => summary,
        other => panic!("Expected a skipped run but got {:?}", other),
    }
}

pub fn assert_summary_value(summary: &RunSummary, key: &str, expected: &str) {
    assert_eq!(
        summary.value(key).as_deref(),
        Some(expected),
        "Unexpected '{}' in summary:\n{}",
        key,
        summary
    );
}

pub fn assert_no_failed_stages(summary: &RunSummary) {
    assert!(
        summary.failed_stages.is_empty(),
        "Expected no failed stages:\n{}",
        summary
    );
}

pub fn assert_file_content(path: &Path, expected: &str) {
    let actual = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert_eq!(actual, expected, "Unexpected content in {}", path.display());
}

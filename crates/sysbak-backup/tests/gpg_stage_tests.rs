//! Backup runs against a scripted `gpg`
//!
//! Tests cover:
//! - A verify failure that still places, prunes and summarises the run
//! - An interrupted encryption that releases the lock and scratch space
//!
//! Each test puts its own fake `gpg` first on PATH, so they run serially.

mod common;

use common::*;
use serial_test::serial;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use sysbak_backup::{run_backup_at, LockOutcome, RunLock, RunStatus};
use sysbak_core::PartialConfig;

/// Writes `--output` on encrypt; decrypts to bytes tar cannot read.
const GARBLING_GPG: &str = r#"case " $* " in
  *" --decrypt "*)
    cat >/dev/null
    printf 'this is not a tar stream'
    exit 0
    ;;
esac
out=""; prev=""
for a in "$@"; do [ "$prev" = "--output" ] && out="$a"; prev="$a"; done
printf 'scrambled' > "$out""#;

/// Never finishes encrypting.
const HANGING_GPG: &str = "exec sleep 30";

/// Restores PATH when dropped.
struct FakeGpg {
    saved: Option<OsString>,
}

impl FakeGpg {
    fn install(bin: &Path, body: &str) -> Self {
        fs::create_dir_all(bin).unwrap();
        let gpg = bin.join("gpg");
        fs::write(&gpg, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&gpg, fs::Permissions::from_mode(0o755)).unwrap();

        let saved = std::env::var_os("PATH");
        let mut dirs = vec![bin.to_path_buf()];
        if let Some(path) = &saved {
            dirs.extend(std::env::split_paths(path));
        }
        std::env::set_var("PATH", std::env::join_paths(dirs).unwrap());
        Self { saved }
    }
}

impl Drop for FakeGpg {
    fn drop(&mut self) {
        match &self.saved {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
    }
}

fn encrypted_layer(keep: usize) -> PartialConfig {
    PartialConfig {
        encryption: Some("gpg".to_string()),
        recipient: Some("ops@example.com".to_string()),
        keep: Some(keep),
        ..layer()
    }
}

#[tokio::test]
#[serial]
async fn test_verify_failure_still_places_and_prunes() {
    let world = BackupWorld::new();
    let _gpg = FakeGpg::install(&world.dir.path().join("bin"), GARBLING_GPG);
    let config = world.config(encrypted_layer(1));
    let log = world.log(&config);

    let older = world.output.join("system-backup-20260101-120000.tar.zst.gpg");
    fs::create_dir_all(&world.output).unwrap();
    fs::write(&older, b"previous run").unwrap();

    let summary = expect_completed(run_backup_at(&config, &log, timestamp(9)).await.unwrap());

    assert_eq!(summary.status, RunStatus::Degraded);
    assert_eq!(summary.failed_stages, vec!["verify".to_string()]);
    assert_summary_value(&summary, "Failed stages", "verify");
    assert_summary_value(&summary, "Encryption", "gpg");
    assert_summary_value(&summary, "Pruned", "1");

    let placed = world
        .output
        .join("system-backup-20260109-120000.tar.zst.gpg");
    assert_eq!(world.archives(), vec![placed.clone()]);
    assert_file_content(&placed, "scrambled");
    assert!(!older.exists());

    let rendered = summary.to_string();
    assert!(rendered.starts_with("Status: completed with errors\n"));
    assert!(rendered.contains("Failed stages: verify\n"));
    let logged = fs::read_to_string(config.log_file.as_std_path()).unwrap();
    assert!(logged.contains("Failed stages: verify"));
    assert!(logged.contains("Pruned: 1"));
}

#[tokio::test]
#[serial]
async fn test_interrupted_encryption_releases_lock_and_scratch() {
    let world = BackupWorld::new();
    let _gpg = FakeGpg::install(&world.dir.path().join("bin"), HANGING_GPG);
    let config = world.config(encrypted_layer(5));
    let log = world.log(&config);

    let run = run_backup_at(&config, &log, timestamp(10));
    assert!(tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .is_err());

    // The worker notices the dropped run on its next poll of the child.
    let mut reacquired = None;
    for _ in 0..200 {
        if let LockOutcome::Acquired(lock) = RunLock::acquire(config.lock_file.as_std_path()).unwrap()
        {
            reacquired = Some(lock);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(reacquired.is_some(), "lock was never released");

    let leftovers: Vec<_> = fs::read_dir(config.work_dir.as_std_path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "scratch left behind: {:?}", leftovers);
    assert!(world.archives().is_empty());
}

//! Backup → restore round trips for every codec and encryption setting
//!
//! Codecs that need an external tool (xz, gpg) are exercised only when the
//! tool is on PATH.

mod common;

use common::*;
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use sysbak_backup::{run_backup_at, FormatChain, RestoreManager, RestoreMode, RunSummary};
use sysbak_core::PartialConfig;
use tempfile::TempDir;

async fn round_trip(world: &BackupWorld, layer: PartialConfig, day: u32) -> (RunSummary, TempDir) {
    world.write_root_file("home/alice/notes.txt", "remember the milk\n");
    let script = world.write_root_file("usr/local/bin/tool.sh", "#!/bin/sh\necho tool\n");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
    world.set_includes(&["/etc/hostname", "/home/alice", "/usr/local/bin"]);
    world.add_task("10-note", "echo collected > \"$SYSBAK_EXTRAS_DIR/note.txt\"");

    let config = world.config(layer);
    let log = world.log(&config);
    let summary = expect_completed(run_backup_at(&config, &log, timestamp(day)).await.unwrap());
    assert_no_failed_stages(&summary);

    let target = TempDir::new().unwrap();
    let archive = summary.output.clone().unwrap();
    let result = RestoreManager::new(RestoreMode::default())
        .extract(&archive, target.path())
        .await
        .unwrap();
    assert_eq!(result.failed, 0);

    assert_file_content(&target.path().join("etc/hostname"), HOSTNAME_CONTENT);
    assert_file_content(
        &target.path().join("home/alice/notes.txt"),
        "remember the milk\n",
    );
    let mode = fs::metadata(target.path().join("usr/local/bin/tool.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o750);

    let extras = result.extras_dir.unwrap();
    assert_file_content(&extras.join("note.txt"), "collected\n");
    let manifest = result.manifest.unwrap();
    assert_eq!(manifest.name, archive.file_name().unwrap().to_string_lossy());
    assert_eq!(manifest.tasks_ok, 1);

    (summary, target)
}

fn codec(name: &str) -> PartialConfig {
    PartialConfig {
        compression: Some(name.to_string()),
        ..layer()
    }
}

#[tokio::test]
async fn test_round_trip_uncompressed() {
    let world = BackupWorld::new();
    let (summary, _target) = round_trip(&world, codec("none"), 1).await;
    assert!(summary.output.unwrap().to_string_lossy().ends_with(".tar"));
}

#[tokio::test]
async fn test_round_trip_gzip() {
    let world = BackupWorld::new();
    let (summary, _target) = round_trip(&world, codec("gzip"), 2).await;
    assert_summary_value(&summary, "Compression", "gzip");
    assert!(summary.output.unwrap().to_string_lossy().ends_with(".tar.gz"));
}

#[tokio::test]
async fn test_round_trip_zstd() {
    let world = BackupWorld::new();
    let (summary, _target) = round_trip(&world, codec("zstd"), 3).await;
    assert_summary_value(&summary, "Compression", "zstd");
    assert!(summary.archive_size > 0);
}

#[tokio::test]
async fn test_round_trip_xz() {
    if !has_tool("xz") {
        eprintln!("xz not installed; skipping");
        return;
    }
    let world = BackupWorld::new();
    let (summary, _target) = round_trip(&world, codec("xz"), 4).await;
    assert!(summary.output.unwrap().to_string_lossy().ends_with(".tar.xz"));
}

#[tokio::test]
async fn test_unknown_codec_falls_back_to_uncompressed() {
    let world = BackupWorld::new();
    let (summary, _target) = round_trip(&world, codec("brotli"), 5).await;
    assert_summary_value(&summary, "Compression", "none");
}

#[tokio::test]
async fn test_encryption_without_recipient_degrades() {
    let world = BackupWorld::new();
    let (summary, _target) = round_trip(
        &world,
        PartialConfig {
            encryption: Some("gpg".to_string()),
            ..codec("zstd")
        },
        6,
    )
    .await;
    assert_summary_value(&summary, "Encryption", "none");
    assert!(summary.output.unwrap().to_string_lossy().ends_with(".tar.zst"));
}

/// Creates a passphrase-less key in `home`; false when gpg cannot.
fn generate_key(gpg: &Path, home: &Path, uid: &str) -> bool {
    Command::new(gpg)
        .env("GNUPGHOME", home)
        .args([
            "--batch",
            "--pinentry-mode",
            "loopback",
            "--passphrase",
            "",
            "--quick-gen-key",
            uid,
            "default",
            "default",
            "never",
        ])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
#[serial]
async fn test_round_trip_gpg_for_every_codec() {
    let Some(gpg) = ["gpg", "gpg2"].iter().find_map(|t| which::which(t).ok()) else {
        eprintln!("gpg not installed; skipping");
        return;
    };
    let home = tempfile::Builder::new().prefix("gpg").tempdir_in("/tmp").unwrap();
    fs::set_permissions(home.path(), fs::Permissions::from_mode(0o700)).unwrap();
    let uid = "sysbak test <sysbak@example.invalid>";
    if !generate_key(&gpg, home.path(), uid) {
        eprintln!("gpg key generation unavailable; skipping");
        return;
    }
    std::env::set_var("GNUPGHOME", home.path());

    let mut codecs = vec!["none", "gzip", "zstd"];
    if has_tool("xz") {
        codecs.push("xz");
    }
    for (idx, name) in codecs.into_iter().enumerate() {
        let world = BackupWorld::new();
        let (summary, _target) = round_trip(
            &world,
            PartialConfig {
                encryption: Some("gpg".to_string()),
                recipient: Some("sysbak@example.invalid".to_string()),
                ..codec(name)
            },
            10 + idx as u32,
        )
        .await;

        assert_summary_value(&summary, "Encryption", "gpg");
        let output = summary.output.unwrap();
        assert!(output.to_string_lossy().ends_with(".gpg"));
        assert!(FormatChain::for_path(&output).unwrap().is_encrypted());
    }

    std::env::remove_var("GNUPGHOME");
}

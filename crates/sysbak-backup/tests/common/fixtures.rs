//! Backup world fixtures
//!
//! Every fixture lives in its own `TempDir`: a fake file-system root, an
//! output directory, a config directory with the spec files and `tasks.d`,
//! plus private lock and scratch locations so tests can run in parallel.

use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use sysbak_backup::{ArchiveName, RunLog};
use sysbak_core::{ConfigLoader, PartialConfig, RunConfiguration};
use tempfile::TempDir;

pub const PREFIX: &str = "system-backup";
pub const HOSTNAME_CONTENT: &str = "testhost\n";

pub struct BackupWorld {
    pub dir: TempDir,
    pub root: PathBuf,
    pub output: PathBuf,
    pub config_dir: PathBuf,
}

impl BackupWorld {
    /// Root holding `/etc/hostname`, include list naming only that file.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let output = dir.path().join("out");
        let config_dir = dir.path().join("config");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(root.join("etc/hostname"), HOSTNAME_CONTENT).unwrap();

        let world = Self {
            dir,
            root,
            output,
            config_dir,
        };
        world.set_includes(&["/etc/hostname"]);
        world
    }

    pub fn write_root_file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn set_includes(&self, lines: &[&str]) {
        fs::write(self.config_dir.join("include.list"), lines.join("\n") + "\n").unwrap();
    }

    pub fn set_excludes(&self, lines: &[&str]) {
        fs::write(self.config_dir.join("exclude.list"), lines.join("\n") + "\n").unwrap();
    }

    /// Installs an executable shell script as a collection task.
    pub fn add_task(&self, name: &str, body: &str) -> PathBuf {
        let tasks = self.config_dir.join("tasks.d");
        fs::create_dir_all(&tasks).unwrap();
        let path = tasks.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Configuration with this world's paths under `layer`.
    pub fn config(&self, layer: PartialConfig) -> RunConfiguration {
        let base = PartialConfig {
            root: Some(utf8(&self.root)),
            output_dir: Some(utf8(&self.output)),
            lock_file: Some(utf8(&self.dir.path().join("run/sysbak.lock"))),
            work_dir: Some(utf8(&self.dir.path().join("work"))),
            ..Default::default()
        };
        ConfigLoader::with_dir(utf8(&self.config_dir))
            .resolve_layer(base.merge(layer))
            .config
    }

    pub fn log(&self, config: &RunConfiguration) -> RunLog {
        RunLog::open(config.log_file.as_std_path()).unwrap()
    }

    /// Archives in the output directory, sorted by name.
    pub fn archives(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = match fs::read_dir(&self.output) {
            Ok(entries) => entries
                .map(|e| e.unwrap().path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(ArchiveName::parse)
                        .is_some()
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        found.sort();
        found
    }

    /// Every file in the output directory, sorted by name.
    pub fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.output)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// A fresh, empty restore target inside the world.
    pub fn restore_target(&self, name: &str) -> PathBuf {
        let target = self.dir.path().join(name);
        fs::create_dir_all(&target).unwrap();
        target
    }
}

pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

/// Noon on the given day of January 2026.
pub fn timestamp(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, day)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn has_tool(name: &str) -> bool {
    which::which(name).is_ok()
}

pub fn layer() -> PartialConfig {
    PartialConfig::default()
}

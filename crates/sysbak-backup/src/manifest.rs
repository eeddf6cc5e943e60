//! Archive provenance record.
//!
//! The manifest is written into the extras directory before assembly, so it
//! ends up at `__extras__/manifest.txt` inside every archive. It is plain
//! `key=value` text so it can be read without this tool.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the manifest file inside the extras namespace
pub const MANIFEST_FILENAME: &str = "manifest.txt";

/// Provenance record stored in every archive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    /// Archive file name
    pub name: String,

    /// Run timestamp (RFC 3339)
    pub date: String,

    pub host: String,
    pub user: String,

    /// Compression requested for the run
    pub compress: String,

    /// Encryption requested for the run
    pub encryption: String,

    pub tasks_total: usize,
    pub tasks_ok: usize,
    pub tasks_fail: usize,
}

impl Manifest {
    /// Renders the manifest as `key=value` lines in a fixed order.
    pub fn to_kv_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.pairs() {
            let _ = writeln!(out, "{}={}", key, value);
        }
        out
    }

    fn pairs(&self) -> [(&'static str, String); 9] {
        [
            ("name", self.name.clone()),
            ("date", self.date.clone()),
            ("host", self.host.clone()),
            ("user", self.user.clone()),
            ("compress", self.compress.clone()),
            ("encryption", self.encryption.clone()),
            ("tasks_total", self.tasks_total.to_string()),
            ("tasks_ok", self.tasks_ok.to_string()),
            ("tasks_fail", self.tasks_fail.to_string()),
        ]
    }

    /// Parses `key=value` text. Unknown keys and malformed lines are ignored.
    pub fn parse(text: &str) -> Self {
        let mut manifest = Manifest::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "name" => manifest.name = value,
                "date" => manifest.date = value,
                "host" => manifest.host = value,
                "user" => manifest.user = value,
                "compress" => manifest.compress = value,
                "encryption" => manifest.encryption = value,
                "tasks_total" => manifest.tasks_total = value.parse().unwrap_or(0),
                "tasks_ok" => manifest.tasks_ok = value.parse().unwrap_or(0),
                "tasks_fail" => manifest.tasks_fail = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        manifest
    }

    /// Writes the manifest into `extras_dir`, returning its path.
    pub fn write_to(&self, extras_dir: &Path) -> anyhow::Result<PathBuf> {
        let path = extras_dir.join(MANIFEST_FILENAME);
        fs::write(&path, self.to_kv_string())
            .map_err(|e| anyhow::anyhow!("Failed to write manifest {}: {}", path.display(), e))?;
        Ok(path)
    }
}

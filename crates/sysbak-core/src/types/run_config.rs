//! Run configuration types
//!
//! A `RunConfiguration` is resolved exactly once per run by the
//! [`ConfigLoader`](crate::config::ConfigLoader) and then handed by reference
//! to every component. Nothing mutates it after task execution begins.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compression codec applied to the raw archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    /// Modern high-ratio streaming codec
    #[default]
    Zstd,
    /// High-ratio general codec
    Xz,
    /// Ubiquitous but weaker codec
    Gzip,
    /// Leave the archive uncompressed
    None,
}

impl Compression {
    /// File name suffix appended after `.tar`
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Zstd => ".zst",
            Compression::Xz => ".xz",
            Compression::Gzip => ".gz",
            Compression::None => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Xz => "xz",
            Compression::Gzip => "gzip",
            Compression::None => "none",
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" | "zst" => Ok(Compression::Zstd),
            "xz" | "lzma" => Ok(Compression::Xz),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "none" | "off" | "" => Ok(Compression::None),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption applied after compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encryption {
    /// Public-key encryption to a configured recipient
    Gpg,
    #[default]
    None,
}

impl Encryption {
    pub fn extension(&self) -> &'static str {
        match self {
            Encryption::Gpg => ".gpg",
            Encryption::None => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encryption::Gpg => "gpg",
            Encryption::None => "none",
        }
    }
}

impl FromStr for Encryption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpg" | "gpg2" | "pgp" => Ok(Encryption::Gpg),
            "none" | "off" | "" => Ok(Encryption::None),
            other => Err(format!("unknown encryption '{}'", other)),
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest written to the sidecar file next to the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
    None,
}

impl ChecksumAlgorithm {
    /// Every sidecar extension any algorithm may produce
    pub const ALL_EXTENSIONS: &'static [&'static str] = &["sha256", "sha512"];

    /// Sidecar extension without the leading dot, `None` when disabled
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ChecksumAlgorithm::Sha256 => Some("sha256"),
            ChecksumAlgorithm::Sha512 => Some("sha512"),
            ChecksumAlgorithm::None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::None => "none",
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            "none" | "off" | "" => Ok(ChecksumAlgorithm::None),
            other => Err(format!("unknown checksum algorithm '{}'", other)),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where collection task output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskOutputMode {
    /// Line-prefixed and multiplexed live to console and run log
    Streamed,
    /// Run log only
    #[default]
    Buffered,
}

impl FromStr for TaskOutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streamed" | "stream" => Ok(TaskOutputMode::Streamed),
            "buffered" | "buffer" => Ok(TaskOutputMode::Buffered),
            other => Err(format!("unknown task output mode '{}'", other)),
        }
    }
}

/// Immutable options for one backup or restore run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfiguration {
    /// Archive name prefix
    pub prefix: String,

    /// Directory receiving finished archives
    pub output_dir: Utf8PathBuf,

    /// File-system root the include list is rebased on
    pub root: Utf8PathBuf,

    /// Include specification file
    pub include_file: Utf8PathBuf,

    /// Exclude specification file
    pub exclude_file: Utf8PathBuf,

    /// Directory scanned for collection tasks
    pub tasks_dir: Utf8PathBuf,

    /// Single-instance lock file
    pub lock_file: Utf8PathBuf,

    /// Append-only run log
    pub log_file: Utf8PathBuf,

    /// Parent directory for the per-run scratch directory
    pub work_dir: Utf8PathBuf,

    pub compression: Compression,

    /// Codec-specific level, codec default when unset
    pub compression_level: Option<i32>,

    pub encryption: Encryption,

    /// Encryption recipient (key id or e-mail)
    pub recipient: Option<String>,

    pub checksum: ChecksumAlgorithm,

    /// Number of archives to keep, 0 disables pruning
    pub keep: usize,

    /// Read the artifact back after writing it
    pub verify: bool,

    /// Replace an existing archive with the same name
    pub overwrite: bool,

    /// Do not cross device boundaries while walking includes
    pub one_file_system: bool,

    /// Skip the contents of directories tagged with CACHEDIR.TAG
    pub exclude_caches: bool,

    /// Store holes in sparse files efficiently
    pub sparse: bool,

    /// Optional tag appended to the archive name
    pub tag: Option<String>,

    /// Never prompt, and tell tasks not to prompt either
    pub non_interactive: bool,

    pub task_output: TaskOutputMode,
}

impl RunConfiguration {
    /// Tag with characters that would break the filename grammar replaced
    pub fn sanitize_tag(tag: &str) -> Option<String> {
        sanitize_name_component(tag)
    }

    /// Prefix reduced to a single file name component
    pub fn sanitize_prefix(prefix: &str) -> Option<String> {
        sanitize_name_component(prefix)
    }

    /// Whether encryption can actually be attempted
    pub fn wants_encryption(&self) -> bool {
        self.encryption == Encryption::Gpg
    }
}

/// Maps everything outside `[A-Za-z0-9._-]` to `-`, so no separator survives.
fn sanitize_name_component(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_parse_aliases() {
        assert_eq!("zst".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("GZ".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("off".parse::<Compression>().unwrap(), Compression::None);
        assert!("brotli".parse::<Compression>().is_err());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(Compression::Zstd.extension(), ".zst");
        assert_eq!(Compression::None.extension(), "");
        assert_eq!(Encryption::Gpg.extension(), ".gpg");
        assert_eq!(ChecksumAlgorithm::Sha512.extension(), Some("sha512"));
        assert_eq!(ChecksumAlgorithm::None.extension(), None);
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(
            RunConfiguration::sanitize_tag("pre upgrade/1"),
            Some("pre-upgrade-1".to_string())
        );
        assert_eq!(
            RunConfiguration::sanitize_tag("weekly_v2.1"),
            Some("weekly_v2.1".to_string())
        );
        assert_eq!(RunConfiguration::sanitize_tag("  "), None);
        assert_eq!(RunConfiguration::sanitize_tag("///"), None);
    }

    #[test]
    fn test_sanitize_prefix_keeps_one_component() {
        assert_eq!(
            RunConfiguration::sanitize_prefix("a/b").as_deref(),
            Some("a-b")
        );
        assert_eq!(
            RunConfiguration::sanitize_prefix("../x").as_deref(),
            Some("..-x")
        );
        assert_eq!(
            RunConfiguration::sanitize_prefix("laptop").as_deref(),
            Some("laptop")
        );
        assert_eq!(RunConfiguration::sanitize_prefix("/"), None);
    }

    #[test]
    fn test_task_output_mode_parse() {
        assert_eq!(
            "stream".parse::<TaskOutputMode>().unwrap(),
            TaskOutputMode::Streamed
        );
        assert!("loud".parse::<TaskOutputMode>().is_err());
    }
}

//! Archive filename grammar.
//!
//! `<prefix>-<YYYYMMDD-HHMMSS>[--<tag>].tar[.zst|.xz|.gz][.gpg]`

use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use sysbak_core::Compression;

/// Timestamp layout embedded in archive names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Suffix appended by the encryption stage
pub const ENCRYPTED_EXTENSION: &str = ".gpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub prefix: String,
    pub timestamp: NaiveDateTime,
    pub tag: Option<String>,
    pub compression: Compression,
    pub encrypted: bool,
}

impl ArchiveName {
    /// A plain `.tar` name; transforms are added with the `with_*` builders.
    pub fn new(prefix: impl Into<String>, timestamp: NaiveDateTime, tag: Option<String>) -> Self {
        Self {
            prefix: prefix.into(),
            timestamp,
            tag,
            compression: Compression::None,
            encrypted: false,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Name without any extension, e.g. `system-backup-20260101-010203--nightly`
    pub fn stem(&self) -> String {
        let mut stem = format!("{}-{}", self.prefix, self.timestamp.format(TIMESTAMP_FORMAT));
        if let Some(tag) = &self.tag {
            stem.push_str("--");
            stem.push_str(tag);
        }
        stem
    }

    pub fn file_name(&self) -> String {
        let mut name = format!("{}.tar{}", self.stem(), self.compression.extension());
        if self.encrypted {
            name.push_str(ENCRYPTED_EXTENSION);
        }
        name
    }

    /// Parses a file name produced by [`ArchiveName::file_name`].
    ///
    /// Returns `None` for anything that does not follow the grammar,
    /// including sidecars and partial files.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = NAME_RE.as_ref()?.captures(name)?;
        let timestamp = NaiveDateTime::parse_from_str(&caps["ts"], TIMESTAMP_FORMAT).ok()?;
        let compression = match caps.name("comp").map(|m| m.as_str()) {
            Some(".zst") => Compression::Zstd,
            Some(".xz") => Compression::Xz,
            Some(".gz") => Compression::Gzip,
            _ => Compression::None,
        };

        Some(Self {
            prefix: caps["prefix"].to_string(),
            timestamp,
            tag: caps.name("tag").map(|m| m.as_str().to_string()),
            compression,
            encrypted: caps.name("enc").is_some(),
        })
    }

    /// True when this name belongs to the retention series `prefix`/`tag`.
    pub fn same_series(&self, prefix: &str, tag: Option<&str>) -> bool {
        self.prefix == prefix && self.tag.as_deref() == tag
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

static NAME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<prefix>.+?)-(?P<ts>\d{8}-\d{6})(?:--(?P<tag>[A-Za-z0-9._-]+))?\.tar(?P<comp>\.zst|\.xz|\.gz)?(?P<enc>\.gpg)?$",
    )
    .ok()
});

//! Compression stage.
//!
//! gzip and zstd stream in-process; xz is delegated to the external `xz`
//! program because no pure-Rust encoder is part of our stack. The raw tar is
//! never modified: each codec writes a new file next to it, and on failure
//! the partial output is removed so the caller can carry on with the raw tar.

use crate::cancel::{wait_child, CancelFlag, CancellableReader};
use crate::error::BackupError;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use sysbak_core::Compression;
use tracing::warn;

/// Default gzip level (6 = balanced speed/ratio).
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Default zstd level, matching the `zstd` CLI.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Default xz preset.
pub const DEFAULT_XZ_LEVEL: u32 = 6;

/// Statistics about a compression operation.
#[derive(Debug, Clone)]
pub struct CompressionStats {
    /// Original uncompressed size in bytes
    pub original_size: u64,

    /// Compressed size in bytes
    pub compressed_size: u64,

    /// Compression ratio (compressed / original)
    pub compression_ratio: f64,
}

impl CompressionStats {
    pub fn new(original_size: u64, compressed_size: u64) -> Self {
        let compression_ratio = if original_size > 0 {
            compressed_size as f64 / original_size as f64
        } else {
            0.0
        };

        Self {
            original_size,
            compressed_size,
            compression_ratio,
        }
    }

    /// Returns compression percentage saved.
    pub fn compression_percentage(&self) -> u8 {
        ((1.0 - self.compression_ratio).clamp(0.0, 1.0) * 100.0) as u8
    }
}

/// The codec this host can apply for `requested`.
///
/// gzip and zstd are built in; xz needs the external program. Resolved
/// before the manifest is written so it names the codec the artifact gets.
pub fn available_compression(requested: Compression) -> Compression {
    let available = requested != Compression::Xz || which::which("xz").is_ok();
    let effective = effective_compression(requested, available);
    if effective != requested {
        warn!("{} compression requested but xz is not on PATH", requested);
    }
    effective
}

/// `requested`, or `None` when its external tool is missing.
pub fn effective_compression(requested: Compression, tool_available: bool) -> Compression {
    match requested {
        Compression::Xz if !tool_available => Compression::None,
        other => other,
    }
}

/// Compresses `source` into `dest` with the given codec.
///
/// `level` is clamped to the codec's valid range. On error or cancellation
/// `dest` is removed.
pub fn compress_file(
    source: &Path,
    dest: &Path,
    compression: Compression,
    level: Option<i32>,
    cancel: &CancelFlag,
) -> anyhow::Result<CompressionStats> {
    let original_size = fs::metadata(source)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", source.display(), e))?
        .len();

    let result = match compression {
        Compression::Gzip => gzip(source, dest, level, cancel),
        Compression::Zstd => zstd_file(source, dest, level, cancel),
        Compression::Xz => xz(source, dest, level, cancel),
        Compression::None => Err(anyhow::anyhow!("No codec selected")),
    };

    if let Err(e) = result {
        let _ = fs::remove_file(dest);
        return Err(e);
    }

    let compressed_size = fs::metadata(dest)?.len();
    Ok(CompressionStats::new(original_size, compressed_size))
}

fn gzip(source: &Path, dest: &Path, level: Option<i32>, cancel: &CancelFlag) -> anyhow::Result<()> {
    let level = level
        .map(|l| l.clamp(0, 9) as u32)
        .unwrap_or(DEFAULT_GZIP_LEVEL);

    let mut reader = CancellableReader::new(BufReader::new(File::open(source)?), cancel.clone());
    let encoder = GzEncoder::new(File::create(dest)?, flate2::Compression::new(level));
    let mut writer = BufWriter::new(encoder);

    io::copy(&mut reader, &mut writer)
        .map_err(|e| anyhow::anyhow!("Failed to gzip data: {}", e))?;
    let encoder = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush gzip stream: {}", e.error()))?;
    encoder.finish()?.sync_all()?;
    Ok(())
}

fn zstd_file(
    source: &Path,
    dest: &Path,
    level: Option<i32>,
    cancel: &CancelFlag,
) -> anyhow::Result<()> {
    let level = level.map(|l| l.clamp(1, 19)).unwrap_or(DEFAULT_ZSTD_LEVEL);

    let mut reader = CancellableReader::new(BufReader::new(File::open(source)?), cancel.clone());
    let mut encoder = zstd::stream::write::Encoder::new(File::create(dest)?, level)?;
    encoder.include_checksum(true)?;

    io::copy(&mut reader, &mut encoder)
        .map_err(|e| anyhow::anyhow!("Failed to zstd data: {}", e))?;
    let mut file = encoder.finish()?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

fn xz(source: &Path, dest: &Path, level: Option<i32>, cancel: &CancelFlag) -> anyhow::Result<()> {
    let level = level
        .map(|l| l.clamp(0, 9) as u32)
        .unwrap_or(DEFAULT_XZ_LEVEL);
    let xz = which::which("xz").map_err(|_| anyhow::anyhow!("xz not found on PATH"))?;

    let mut child = Command::new(xz)
        .arg("--compress")
        .arg("--stdout")
        .arg("--threads=0")
        .arg(format!("-{}", level))
        .stdin(Stdio::from(File::open(source)?))
        .stdout(Stdio::from(File::create(dest)?))
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to run xz: {}", e))?;
    let status = wait_child(&mut child, cancel)?;

    if !status.success() {
        return Err(BackupError::stage_failed("xz compress", status.code()).into());
    }
    Ok(())
}

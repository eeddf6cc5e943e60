//! Errors callers need to tell apart.
//!
//! Most failures inside the pipeline are recovered where they happen and only
//! show up in stage reports; these are the ones that reach the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Archive passed to restore or verify does not exist
    #[error("Archive not found: {}", path.display())]
    ArchiveNotFound { path: PathBuf },

    /// File name does not follow the `<name>.tar[.zst|.xz|.gz][.gpg]` grammar
    #[error("Unrecognized archive format: {name}")]
    UnrecognizedFormat { name: String },

    /// Encrypted archive but no decryption tool on PATH
    #[error("Archive is encrypted but no decryption tool (gpg) was found on PATH")]
    DecryptorMissing,

    /// Compressed with a codec whose external decoder is not installed
    #[error("Decoder '{tool}' required for this archive was not found on PATH")]
    DecoderMissing { tool: String },

    /// An external tool or codec exited unsuccessfully
    #[error("{stage} failed (exit code {})", code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    StageFailed { stage: String, code: Option<i32> },

    /// Output or scratch directory cannot be created or written
    #[error("Output location unavailable: {}: {reason}", path.display())]
    OutputUnavailable { path: PathBuf, reason: String },
}

impl BackupError {
    pub fn stage_failed(stage: impl Into<String>, code: Option<i32>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failed_message() {
        let err = BackupError::stage_failed("gpg decrypt", Some(2));
        assert_eq!(err.to_string(), "gpg decrypt failed (exit code 2)");

        let err = BackupError::stage_failed("xz", None);
        assert_eq!(err.to_string(), "xz failed (exit code none)");
    }
}

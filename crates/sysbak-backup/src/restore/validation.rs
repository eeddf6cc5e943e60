//! Pre-flight checks for restore operations

use crate::error::BackupError;
use crate::format::{find_gpg, DecodeStep, FormatChain};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;

/// Checks everything that can be known before touching the target: the
/// archive exists, its name follows the grammar, and every decoder it
/// needs is installed.
pub fn validate_restore_preconditions(archive: &Path) -> Result<FormatChain, BackupError> {
    if !archive.is_file() {
        return Err(BackupError::ArchiveNotFound {
            path: archive.to_path_buf(),
        });
    }
    debug!("✓ Archive exists");

    let chain = FormatChain::for_path(archive)?;
    debug!("✓ Format recognized: {:?}", chain.steps);

    if chain.is_encrypted() && find_gpg().is_none() {
        return Err(BackupError::DecryptorMissing);
    }
    if chain.steps.contains(&DecodeStep::Xz) && which::which("xz").is_err() {
        return Err(BackupError::DecoderMissing {
            tool: "xz".to_string(),
        });
    }
    debug!("✓ Decoders available");

    Ok(chain)
}

/// Creates the target if needed and proves it writable.
///
/// Returns the uid that owns files this process creates, which tells the
/// caller whether ownership can be restored.
pub fn validate_target_writable(target: &Path) -> Result<u32, BackupError> {
    let unavailable = |reason: String| BackupError::OutputUnavailable {
        path: target.to_path_buf(),
        reason,
    };

    fs::create_dir_all(target).map_err(|e| unavailable(e.to_string()))?;

    let test_file = target.join(".sysbak-restore-write-test");
    fs::write(&test_file, b"test").map_err(|e| unavailable(e.to_string()))?;
    let uid = fs::metadata(&test_file)
        .map(|m| m.uid())
        .map_err(|e| unavailable(e.to_string()));
    fs::remove_file(&test_file).ok();

    debug!("✓ Target directory is writable");
    uid
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let result = validate_restore_preconditions(&temp_dir.path().join("gone.tar"));
        assert!(matches!(result, Err(BackupError::ArchiveNotFound { .. })));
    }

    #[test]
    fn test_unrecognized_name() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("backup.zip");
        fs::write(&archive, b"zip").unwrap();

        let result = validate_restore_preconditions(&archive);
        assert!(matches!(result, Err(BackupError::UnrecognizedFormat { .. })));
    }

    #[test]
    fn test_in_process_codecs_need_no_tools() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("host-20260101-000000.tar.zst");
        fs::write(&archive, b"").unwrap();

        let chain = validate_restore_preconditions(&archive).unwrap();
        assert_eq!(chain.steps, vec![DecodeStep::Zstd]);
    }

    #[test]
    fn test_target_created_and_writable() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("restore/here");

        let uid = validate_target_writable(&target).unwrap();
        assert!(target.is_dir());
        assert_eq!(uid, fs::metadata(temp_dir.path()).unwrap().uid());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }
}

//! Checksum sidecars (`<archive>.sha256` / `<archive>.sha512`).
//!
//! Sidecars use the coreutils `"<hex>  <file name>"` layout so they can be
//! checked with `sha256sum -c` from the output directory.

use sha2::{Digest, Sha256, Sha512};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use sysbak_core::ChecksumAlgorithm;
use tracing::debug;

/// Hex digest of a file.
pub fn calculate_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> anyhow::Result<String> {
    let mut file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open file for checksum: {}", e))?;

    let digest = match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)
                .map_err(|e| anyhow::anyhow!("Failed to calculate checksum: {}", e))?;
            format!("{:x}", hasher.finalize())
        }
        ChecksumAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)
                .map_err(|e| anyhow::anyhow!("Failed to calculate checksum: {}", e))?;
            format!("{:x}", hasher.finalize())
        }
        ChecksumAlgorithm::None => anyhow::bail!("No checksum algorithm selected"),
    };

    Ok(digest)
}

/// Sidecar path for `archive`, or `None` when checksums are disabled.
pub fn sidecar_path(archive: &Path, algorithm: ChecksumAlgorithm) -> Option<PathBuf> {
    let ext = algorithm.extension()?;
    let mut path = archive.as_os_str().to_owned();
    path.push(".");
    path.push(ext);
    Some(PathBuf::from(path))
}

/// Writes the sidecar next to `archive` and returns its path.
pub fn write_sidecar(archive: &Path, algorithm: ChecksumAlgorithm) -> anyhow::Result<PathBuf> {
    let path = sidecar_path(archive, algorithm)
        .ok_or_else(|| anyhow::anyhow!("No checksum algorithm selected"))?;
    let digest = calculate_checksum(archive, algorithm)?;
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    fs::write(&path, format!("{}  {}\n", digest, name))
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
    Ok(path)
}

/// Removes every known sidecar of `archive`; returns the ones removed.
pub fn remove_sidecars(archive: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for ext in ChecksumAlgorithm::ALL_EXTENSIONS {
        let mut path = archive.as_os_str().to_owned();
        path.push(".");
        path.push(ext);
        let path = PathBuf::from(path);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to remove sidecar {}: {}", path.display(), e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.tar");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            calculate_checksum(&path, ChecksumAlgorithm::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let sha512 = calculate_checksum(&path, ChecksumAlgorithm::Sha512).unwrap();
        assert_eq!(sha512.len(), 128);
        assert!(sha512.starts_with("ddaf35a193617aba"));
    }

    #[test]
    fn test_sidecar_matches_coreutils_layout() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("host-20260101-000000.tar.zst");
        fs::write(&archive, b"archive bytes").unwrap();

        let sidecar = write_sidecar(&archive, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(sidecar, dir.path().join("host-20260101-000000.tar.zst.sha256"));

        let text = fs::read_to_string(&sidecar).unwrap();
        let (digest, name) = text.split_once("  ").unwrap();
        assert_eq!(name, "host-20260101-000000.tar.zst\n");
        assert_eq!(
            digest,
            calculate_checksum(&archive, ChecksumAlgorithm::Sha256).unwrap()
        );
    }

    #[test]
    fn test_no_sidecar_when_disabled() {
        assert!(sidecar_path(Path::new("/x/a.tar"), ChecksumAlgorithm::None).is_none());
    }

    #[test]
    fn test_remove_all_sidecars() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("a.tar");
        fs::write(&archive, b"x").unwrap();
        write_sidecar(&archive, ChecksumAlgorithm::Sha256).unwrap();
        write_sidecar(&archive, ChecksumAlgorithm::Sha512).unwrap();

        let removed = remove_sidecars(&archive);
        assert_eq!(removed.len(), 2);
        assert!(archive.exists());
        assert!(remove_sidecars(&archive).is_empty());
    }
}

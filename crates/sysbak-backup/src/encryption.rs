//! Encryption stage, delegated to `gpg`.
//!
//! Encryption needs both a capable tool and a recipient. Missing either one
//! downgrades the run to an unencrypted archive with a warning; it never
//! fails the run.

use crate::cancel::{wait_child, CancelFlag};
use crate::error::BackupError;
use crate::format::find_gpg;
use crate::naming::ENCRYPTED_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use sysbak_core::Encryption;

/// What the encryption stage will do for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionPlan {
    /// Encryption not requested
    Disabled,
    /// Requested but a prerequisite is missing
    Unavailable(String),
    Ready { tool: PathBuf, recipient: String },
}

impl EncryptionPlan {
    /// Checks prerequisites for `mode`, looking the tool up on PATH.
    pub fn resolve(mode: Encryption, recipient: Option<&str>) -> Self {
        Self::resolve_with(mode, recipient, find_gpg())
    }

    /// Like [`EncryptionPlan::resolve`] with an explicit tool location.
    pub fn resolve_with(mode: Encryption, recipient: Option<&str>, tool: Option<PathBuf>) -> Self {
        if mode == Encryption::None {
            return Self::Disabled;
        }
        let recipient = match recipient.map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => return Self::Unavailable("no recipient configured".to_string()),
        };
        match tool {
            Some(tool) => Self::Ready { tool, recipient },
            None => Self::Unavailable("gpg not found on PATH".to_string()),
        }
    }
}

/// Encrypts `source` to `<source>.gpg` for `recipient`.
///
/// The plaintext input is left in place; on failure or cancellation any
/// partial output is removed.
pub fn encrypt_file(
    tool: &Path,
    recipient: &str,
    source: &Path,
    cancel: &CancelFlag,
) -> anyhow::Result<PathBuf> {
    let mut dest = source.as_os_str().to_owned();
    dest.push(ENCRYPTED_EXTENSION);
    let dest = PathBuf::from(dest);

    let mut child = Command::new(tool)
        .args(["--batch", "--yes", "--trust-model", "always", "--encrypt"])
        .arg("--recipient")
        .arg(recipient)
        .arg("--output")
        .arg(&dest)
        .arg(source)
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", tool.display(), e))?;

    let status = match wait_child(&mut child, cancel) {
        Ok(status) => status,
        Err(e) => {
            let _ = fs::remove_file(&dest);
            return Err(e.into());
        }
    };
    if !status.success() || !dest.is_file() {
        let _ = fs::remove_file(&dest);
        return Err(BackupError::stage_failed("gpg encrypt", status.code()).into());
    }

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-gpg");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_plan_disabled() {
        let plan = EncryptionPlan::resolve_with(Encryption::None, Some("ops@example.com"), None);
        assert_eq!(plan, EncryptionPlan::Disabled);
    }

    #[test]
    fn test_plan_without_recipient() {
        let plan =
            EncryptionPlan::resolve_with(Encryption::Gpg, Some("  "), Some(PathBuf::from("/bin/gpg")));
        assert!(matches!(plan, EncryptionPlan::Unavailable(_)));
    }

    #[test]
    fn test_plan_without_tool() {
        let plan = EncryptionPlan::resolve_with(Encryption::Gpg, Some("ops@example.com"), None);
        assert_eq!(
            plan,
            EncryptionPlan::Unavailable("gpg not found on PATH".to_string())
        );
    }

    #[test]
    fn test_encrypt_writes_sibling() {
        let dir = TempDir::new().unwrap();
        // Copies the last argument to the path after --output
        let tool = fake_tool(
            dir.path(),
            r#"out=""; prev=""; for a in "$@"; do [ "$prev" = "--output" ] && out="$a"; prev="$a"; done; cp "$prev" "$out""#,
        );
        let source = dir.path().join("a.tar.zst");
        fs::write(&source, b"data").unwrap();

        let dest = encrypt_file(&tool, "ops@example.com", &source, &CancelFlag::default()).unwrap();
        assert_eq!(dest, dir.path().join("a.tar.zst.gpg"));
        assert_eq!(fs::read(&dest).unwrap(), b"data");
        assert!(source.exists());
    }

    #[test]
    fn test_encrypt_failure_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "exit 2");
        let source = dir.path().join("a.tar");
        fs::write(&source, b"data").unwrap();

        let err = encrypt_file(&tool, "nobody", &source, &CancelFlag::default()).unwrap_err();
        assert_eq!(err.to_string(), "gpg encrypt failed (exit code 2)");
        assert!(!dir.path().join("a.tar.gpg").exists());
    }

    #[test]
    fn test_cancel_stops_a_hanging_encryptor() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "echo partial > \"$9\"; exec sleep 30");
        let source = dir.path().join("a.tar");
        fs::write(&source, b"data").unwrap();

        let cancel = CancelFlag::default();
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let err = encrypt_file(&tool, "ops@example.com", &source, &cancel).unwrap_err();
        assert_eq!(err.to_string(), "run was cancelled");
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
        assert!(!dir.path().join("a.tar.gpg").exists());
        assert!(source.exists());
        handle.join().unwrap();
    }
}

//! Restore conflict policy: keep existing files, or overwrite them.
//!
//! The two modes are mutually exclusive; the safer "keep existing" is the
//! default.

use anyhow::Result;
use std::fs::Metadata;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// How to treat archive entries whose target already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// Never replace anything already on disk
    #[default]
    KeepExisting,
    /// Replace existing files with the archived version
    Overwrite,
}

/// Action to take for one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreAction {
    /// Leave the target alone
    Skip { reason: String },
    /// Unpack the entry over whatever is there
    Restore,
}

/// Mode-specific behavior for entries that collide with existing paths.
///
/// Called from the blocking extraction loop, so implementations must not
/// block on async work.
pub trait RestoreModeHandler: Send + Sync {
    /// Decide what to do when `target` already exists.
    fn handle_existing(&self, target: &Path, existing: &Metadata, entry_is_dir: bool)
        -> Result<RestoreAction>;

    /// Decide what to do when `target` does not exist yet.
    fn handle_new(&self, _target: &Path) -> Result<RestoreAction> {
        Ok(RestoreAction::Restore)
    }
}

/// Handler for [`RestoreMode::KeepExisting`]
pub struct KeepExistingHandler;

impl RestoreModeHandler for KeepExistingHandler {
    fn handle_existing(
        &self,
        target: &Path,
        _existing: &Metadata,
        _entry_is_dir: bool,
    ) -> Result<RestoreAction> {
        debug!("Keeping existing {}", target.display());
        Ok(RestoreAction::Skip {
            reason: "already exists".to_string(),
        })
    }
}

/// Handler for [`RestoreMode::Overwrite`]
pub struct OverwriteHandler;

impl RestoreModeHandler for OverwriteHandler {
    fn handle_existing(
        &self,
        target: &Path,
        existing: &Metadata,
        entry_is_dir: bool,
    ) -> Result<RestoreAction> {
        if existing.is_dir() && !entry_is_dir {
            return Ok(RestoreAction::Skip {
                reason: "a directory is in the way".to_string(),
            });
        }
        debug!("Overwriting {}", target.display());
        Ok(RestoreAction::Restore)
    }
}

impl RestoreMode {
    /// Picks the mode from the two mutually exclusive CLI switches.
    pub fn from_flags(overwrite: bool) -> Self {
        if overwrite {
            Self::Overwrite
        } else {
            Self::KeepExisting
        }
    }

    pub fn handler(&self) -> Box<dyn RestoreModeHandler> {
        match self {
            Self::KeepExisting => Box::new(KeepExistingHandler),
            Self::Overwrite => Box::new(OverwriteHandler),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepExisting => "keep-existing",
            Self::Overwrite => "overwrite",
        }
    }
}

impl FromStr for RestoreMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "keep-existing" | "keep" | "keep-old-files" => Ok(Self::KeepExisting),
            "overwrite" => Ok(Self::Overwrite),
            _ => Err(anyhow::anyhow!(
                "Invalid restore mode: {}. Valid modes: keep-existing, overwrite",
                s
            )),
        }
    }
}

//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{Parser, Subcommand};
use std::ffi::OsString;

// Re-export command types for convenience
pub use crate::commands::backup::BackupArgs;
pub use crate::commands::restore::RestoreArgs;

/// sysbak - whole-system backup and restore
#[derive(Parser, Debug)]
#[command(name = "sysbak")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run collection tasks and write one archive
    Backup(BackupArgs),

    /// Restore an archive into a target directory
    Restore(RestoreArgs),
}

/// Parses `args`, dropping arguments clap does not know and retrying.
///
/// Returns the parsed CLI and the arguments that were dropped so the caller
/// can warn about them once logging is up. Any other parse error (missing
/// value, conflicting flags, `--help`) is returned unchanged.
pub fn parse_lenient<I, T>(args: I) -> Result<(Cli, Vec<String>), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let mut dropped = Vec::new();

    loop {
        let err = match Cli::try_parse_from(&args) {
            Ok(cli) => return Ok((cli, dropped)),
            Err(e) if e.kind() == ErrorKind::UnknownArgument => e,
            Err(e) => return Err(e),
        };

        let Some(ContextValue::String(bad)) = err.get(ContextKind::InvalidArg) else {
            return Err(err);
        };
        let with_value = format!("{}=", bad);
        let position = args.iter().skip(1).position(|arg| {
            arg.to_str()
                .map(|s| s == bad.as_str() || s.starts_with(&with_value))
                .unwrap_or(false)
        });
        match position {
            Some(idx) => {
                let removed = args.remove(idx + 1);
                dropped.push(removed.to_string_lossy().into_owned());
            }
            None => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_flags() {
        let (cli, dropped) = parse_lenient([
            "sysbak",
            "-v",
            "backup",
            "--compression",
            "xz",
            "--no-verify",
            "--keep",
            "3",
            "--tag",
            "pre-upgrade",
        ])
        .unwrap();

        assert!(dropped.is_empty());
        assert_eq!(cli.verbose, 1);
        let Commands::Backup(args) = cli.command else {
            panic!("expected backup");
        };
        let layer = args.to_overrides();
        assert_eq!(layer.compression.as_deref(), Some("xz"));
        assert_eq!(layer.verify, Some(false));
        assert_eq!(layer.keep, Some(3));
        assert_eq!(layer.tag.as_deref(), Some("pre-upgrade"));
        assert_eq!(layer.overwrite, None);
    }

    #[test]
    fn test_unknown_flags_are_dropped() {
        let (cli, dropped) = parse_lenient([
            "sysbak",
            "backup",
            "--bogus",
            "--frobnicate=yes",
            "--overwrite",
        ])
        .unwrap();

        assert_eq!(dropped, vec!["--bogus", "--frobnicate=yes"]);
        let Commands::Backup(args) = cli.command else {
            panic!("expected backup");
        };
        assert_eq!(args.to_overrides().overwrite, Some(true));
    }

    #[test]
    fn test_restore_flags() {
        let (cli, _) = parse_lenient([
            "sysbak",
            "restore",
            "/backups/system-backup-20260101-000000.tar.zst",
            "--target",
            "/mnt/restore",
            "--dry-run",
            "--yes",
        ])
        .unwrap();

        let Commands::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert!(args.dry_run);
        assert!(args.non_interactive);
        assert_eq!(
            args.target.as_deref(),
            Some(std::path::Path::new("/mnt/restore"))
        );
    }

    #[test]
    fn test_restore_policies_conflict() {
        let err = parse_lenient([
            "sysbak",
            "restore",
            "a.tar",
            "--keep-old-files",
            "--overwrite",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(parse_lenient(["sysbak"]).is_err());
    }
}

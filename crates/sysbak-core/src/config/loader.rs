//! Layered configuration loader
//!
//! Resolves a [`RunConfiguration`] with the following precedence (low to high):
//! 1. Built-in defaults
//! 2. Config file (`--config <path>` or `~/.config/sysbak/config.yaml`)
//! 3. Environment variables (`SYSBAK_*` prefix)
//! 4. CLI flags (passed in as a [`PartialConfig`])
//!
//! Unknown enum values never abort resolution: the safe default is
//! substituted and a warning is recorded in [`ResolvedConfig::warnings`].
//! The caller emits those warnings once logging is up.

use crate::error::{Error, Result};
use crate::types::{ChecksumAlgorithm, Compression, Encryption, RunConfiguration, TaskOutputMode};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::str::FromStr;

/// Default config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default archive name prefix
pub const DEFAULT_PREFIX: &str = "system-backup";

/// Default output directory for finished archives
pub const DEFAULT_OUTPUT_DIR: &str = "/var/backups/sysbak";

/// Default number of archives kept by retention
pub const DEFAULT_KEEP: usize = 7;

/// One configuration layer: every field optional, later layers win
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartialConfig {
    pub prefix: Option<String>,
    pub output_dir: Option<Utf8PathBuf>,
    pub root: Option<Utf8PathBuf>,
    pub include_file: Option<Utf8PathBuf>,
    pub exclude_file: Option<Utf8PathBuf>,
    pub tasks_dir: Option<Utf8PathBuf>,
    pub lock_file: Option<Utf8PathBuf>,
    pub log_file: Option<Utf8PathBuf>,
    pub work_dir: Option<Utf8PathBuf>,
    pub compression: Option<String>,
    pub compression_level: Option<i32>,
    pub encryption: Option<String>,
    pub recipient: Option<String>,
    pub checksum: Option<String>,
    pub keep: Option<usize>,
    pub verify: Option<bool>,
    pub overwrite: Option<bool>,
    pub one_file_system: Option<bool>,
    pub exclude_caches: Option<bool>,
    pub sparse: Option<bool>,
    pub tag: Option<String>,
    pub non_interactive: Option<bool>,
    pub task_output: Option<String>,

    /// Keys this version does not know about
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml_ng::Value>,
}

macro_rules! overlay_fields {
    ($base:ident, $overlay:ident, $($field:ident),+ $(,)?) => {
        $(
            if $overlay.$field.is_some() {
                $base.$field = $overlay.$field;
            }
        )+
    };
}

impl PartialConfig {
    /// Layer `overlay` on top of `self`
    pub fn merge(mut self, overlay: PartialConfig) -> PartialConfig {
        overlay_fields!(
            self,
            overlay,
            prefix,
            output_dir,
            root,
            include_file,
            exclude_file,
            tasks_dir,
            lock_file,
            log_file,
            work_dir,
            compression,
            compression_level,
            encryption,
            recipient,
            checksum,
            keep,
            verify,
            overwrite,
            one_file_system,
            exclude_caches,
            sparse,
            tag,
            non_interactive,
            task_output,
        );
        self.unknown.extend(overlay.unknown);
        self
    }
}

/// Outcome of configuration resolution
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: RunConfiguration,

    /// Config file that contributed, if any
    pub source: Option<Utf8PathBuf>,

    /// Non-fatal problems found while resolving
    pub warnings: Vec<String>,
}

/// Configuration loader
pub struct ConfigLoader {
    /// Directory holding config.yaml, include/exclude lists and tasks.d
    config_dir: Utf8PathBuf,
}

impl ConfigLoader {
    /// Create a loader rooted at the standard config directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_dir: Self::default_config_dir()?,
        })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// `$XDG_CONFIG_HOME/sysbak`, falling back to `~/.config/sysbak`
    fn default_config_dir() -> Result<Utf8PathBuf> {
        let base = match dirs::config_dir() {
            Some(dir) => dir,
            None => crate::utils::get_home_dir()
                .map_err(|e| Error::invalid_config(e.to_string()))?
                .join(".config"),
        };
        let base = Utf8PathBuf::from_path_buf(base)
            .map_err(|_| Error::invalid_config("Config directory path is not valid UTF-8"))?;
        Ok(base.join("sysbak"))
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Resolve the run configuration from every layer.
    ///
    /// An explicit config path that does not exist is an error; a missing
    /// default config file is not.
    pub fn load(&self, explicit: Option<&Utf8Path>, cli: PartialConfig) -> Result<ResolvedConfig> {
        let mut warnings = Vec::new();

        let (file_layer, source) = match explicit {
            Some(path) => (self.load_file(path)?, Some(path.to_owned())),
            None => {
                let path = self.config_dir.join(CONFIG_FILE_NAME);
                if path.exists() {
                    (self.load_file(&path)?, Some(path))
                } else {
                    (PartialConfig::default(), None)
                }
            }
        };

        let layered = file_layer.merge(Self::env_layer()?).merge(cli);

        for key in layered.unknown.keys() {
            warnings.push(format!("Ignoring unknown configuration key '{}'", key));
        }

        let config = self.resolve(layered, &mut warnings);
        Ok(ResolvedConfig {
            config,
            source,
            warnings,
        })
    }

    /// Resolve one layer on top of the built-in defaults, without reading the
    /// config file or the environment.
    pub fn resolve_layer(&self, layer: PartialConfig) -> ResolvedConfig {
        let mut warnings = Vec::new();
        let config = self.resolve(layer, &mut warnings);
        ResolvedConfig {
            config,
            source: None,
            warnings,
        }
    }

    /// Parse a YAML config file into a layer
    fn load_file(&self, path: &Utf8Path) -> Result<PartialConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.as_str())
            } else {
                Error::Io(e)
            }
        })?;
        if content.trim().is_empty() {
            return Ok(PartialConfig::default());
        }
        let layer: PartialConfig = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))?;
        Ok(layer)
    }

    /// Build a layer from `SYSBAK_*` environment variables
    fn env_layer() -> Result<PartialConfig> {
        let mut layer = PartialConfig::default();

        layer.prefix = env_string("SYSBAK_PREFIX");
        layer.output_dir = env_string("SYSBAK_OUTPUT_DIR").map(Utf8PathBuf::from);
        layer.root = env_string("SYSBAK_ROOT").map(Utf8PathBuf::from);
        layer.include_file = env_string("SYSBAK_INCLUDE_FILE").map(Utf8PathBuf::from);
        layer.exclude_file = env_string("SYSBAK_EXCLUDE_FILE").map(Utf8PathBuf::from);
        layer.tasks_dir = env_string("SYSBAK_TASKS_DIR").map(Utf8PathBuf::from);
        layer.lock_file = env_string("SYSBAK_LOCK_FILE").map(Utf8PathBuf::from);
        layer.log_file = env_string("SYSBAK_LOG_FILE").map(Utf8PathBuf::from);
        layer.work_dir = env_string("SYSBAK_WORK_DIR").map(Utf8PathBuf::from);
        layer.compression = env_string("SYSBAK_COMPRESSION");
        layer.encryption = env_string("SYSBAK_ENCRYPTION");
        layer.recipient = env_string("SYSBAK_RECIPIENT");
        layer.checksum = env_string("SYSBAK_CHECKSUM");
        layer.tag = env_string("SYSBAK_TAG");
        layer.task_output = env_string("SYSBAK_TASK_OUTPUT");

        if let Some(val) = env_string("SYSBAK_COMPRESSION_LEVEL") {
            layer.compression_level = Some(val.parse().map_err(|_| {
                Error::invalid_config("SYSBAK_COMPRESSION_LEVEL must be a valid number")
            })?);
        }
        if let Some(val) = env_string("SYSBAK_KEEP") {
            layer.keep = Some(
                val.parse()
                    .map_err(|_| Error::invalid_config("SYSBAK_KEEP must be a valid number"))?,
            );
        }

        layer.verify = env_bool("SYSBAK_VERIFY")?;
        layer.overwrite = env_bool("SYSBAK_OVERWRITE")?;
        layer.one_file_system = env_bool("SYSBAK_ONE_FILE_SYSTEM")?;
        layer.exclude_caches = env_bool("SYSBAK_EXCLUDE_CACHES")?;
        layer.sparse = env_bool("SYSBAK_SPARSE")?;
        layer.non_interactive = env_bool("SYSBAK_NONINTERACTIVE")?;

        Ok(layer)
    }

    /// Collapse the merged layer onto the built-in defaults
    fn resolve(&self, layer: PartialConfig, warnings: &mut Vec<String>) -> RunConfiguration {
        let prefix = match layer.prefix.filter(|p| !p.trim().is_empty()) {
            Some(raw) => match RunConfiguration::sanitize_prefix(&raw) {
                Some(cleaned) => {
                    if cleaned != raw {
                        warnings.push(format!("Prefix '{}' sanitized to '{}'", raw, cleaned));
                    }
                    cleaned
                }
                None => {
                    warnings.push(format!(
                        "Prefix '{}' has no usable characters; using '{}'",
                        raw, DEFAULT_PREFIX
                    ));
                    DEFAULT_PREFIX.to_string()
                }
            },
            None => DEFAULT_PREFIX.to_string(),
        };
        let output_dir = layer
            .output_dir
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_DIR));
        let temp_dir = Utf8PathBuf::from_path_buf(env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));

        let tag = match layer.tag {
            Some(raw) => {
                let cleaned = RunConfiguration::sanitize_tag(&raw);
                if cleaned.as_deref() != Some(raw.as_str()) {
                    warnings.push(format!(
                        "Tag '{}' sanitized to '{}'",
                        raw,
                        cleaned.as_deref().unwrap_or("")
                    ));
                }
                cleaned
            }
            None => None,
        };

        RunConfiguration {
            log_file: layer
                .log_file
                .unwrap_or_else(|| output_dir.join(format!("{}.log", prefix))),
            prefix,
            root: layer.root.unwrap_or_else(|| Utf8PathBuf::from("/")),
            include_file: layer
                .include_file
                .unwrap_or_else(|| self.config_dir.join("include.list")),
            exclude_file: layer
                .exclude_file
                .unwrap_or_else(|| self.config_dir.join("exclude.list")),
            tasks_dir: layer
                .tasks_dir
                .unwrap_or_else(|| self.config_dir.join("tasks.d")),
            lock_file: layer
                .lock_file
                .unwrap_or_else(|| temp_dir.join("sysbak.lock")),
            work_dir: layer.work_dir.unwrap_or(temp_dir),
            output_dir,
            compression: parse_or_default(layer.compression, Compression::None, warnings)
                .unwrap_or_default(),
            compression_level: layer.compression_level,
            encryption: parse_or_default(layer.encryption, Encryption::None, warnings)
                .unwrap_or_default(),
            recipient: layer.recipient.filter(|r| !r.trim().is_empty()),
            checksum: parse_or_default(layer.checksum, ChecksumAlgorithm::None, warnings)
                .unwrap_or_default(),
            keep: layer.keep.unwrap_or(DEFAULT_KEEP),
            verify: layer.verify.unwrap_or(true),
            overwrite: layer.overwrite.unwrap_or(false),
            one_file_system: layer.one_file_system.unwrap_or(true),
            exclude_caches: layer.exclude_caches.unwrap_or(true),
            sparse: layer.sparse.unwrap_or(true),
            tag,
            non_interactive: layer.non_interactive.unwrap_or(false),
            task_output: parse_or_default(layer.task_output, TaskOutputMode::Buffered, warnings)
                .unwrap_or_default(),
        }
    }
}

/// Parse an enum value leniently.
///
/// `None` input means "not configured" and yields `None` so the caller's
/// default applies; an unknown value yields `Some(fallback)` plus a warning.
fn parse_or_default<T: FromStr<Err = String> + Copy>(
    value: Option<String>,
    fallback: T,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let raw = value?;
    match raw.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warnings.push(format!("{}, using safe default", e));
            Some(fallback)
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env_string(name) {
        None => Ok(None),
        Some(val) => parse_bool(&val)
            .map(Some)
            .ok_or_else(|| Error::invalid_config(format!("{} must be a boolean", name))),
    }
}

/// Accepts the spellings shell configs commonly use
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

//! Include/exclude list compilation.
//!
//! Spec files are semi-trusted data: environment variables are expanded, but
//! a line that contains command substitution is kept verbatim so no pattern
//! can ever run a command.
//!
//! - Includes become root-relative paths written as a NUL-delimited list.
//! - Excludes are emitted as written plus, for absolute patterns, a
//!   separator-stripped variant so they match in both forms.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Whether a spec line selects or rejects paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Include,
    Exclude,
}

/// Ordered patterns loaded from one spec file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSpec {
    entries: Vec<(String, PatternKind)>,
}

impl PathSpec {
    /// Loads a spec file. A missing file yields an empty spec.
    pub fn load(path: &Path, kind: PatternKind) -> anyhow::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self::parse(&String::from_utf8_lossy(&bytes), kind)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Spec file {} not found, using empty list", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read spec file {}: {}",
                path.display(),
                e
            )),
        }
    }

    /// Parses spec text, skipping blank and comment lines.
    pub fn parse(text: &str, kind: PatternKind) -> Self {
        let entries = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| {
                let trimmed = line.trim_start();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            })
            .map(|line| (expand_env(line.trim()), kind))
            .filter(|(pattern, _)| !pattern.is_empty())
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, PatternKind)] {
        &self.entries
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True when the line contains shell command substitution syntax
pub fn refuses_substitution(line: &str) -> bool {
    line.contains("$(") || line.contains('`')
}

static ENV_VAR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").ok()
});

/// Expands `$NAME`, `${NAME}` and a leading `~/`.
///
/// Unset variables expand to the empty string. Lines with command
/// substitution are returned untouched.
pub fn expand_env(line: &str) -> String {
    if refuses_substitution(line) {
        warn!("Refusing substitution in spec line, keeping it literal: {}", line);
        return line.to_string();
    }

    let Some(re) = ENV_VAR_RE.as_ref() else {
        return line.to_string();
    };
    let expanded = re.replace_all(line, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_default()
    });

    match expanded.strip_prefix("~/") {
        Some(rest) => match sysbak_core::get_home_dir() {
            Ok(home) => format!("{}/{}", home.display(), rest),
            Err(_) => expanded.into_owned(),
        },
        None => expanded.into_owned(),
    }
}

/// Normalises an include path to root-relative form.
fn root_relative(pattern: &str) -> PathBuf {
    let mut rel = pattern.trim_start_matches('/');
    while let Some(rest) = rel.strip_prefix("./") {
        rel = rest.trim_start_matches('/');
    }
    let rel = rel.trim_end_matches('/');
    if rel.is_empty() || rel == "." {
        PathBuf::from(".")
    } else {
        PathBuf::from(rel)
    }
}

/// The archiver's view of the spec files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledPathList {
    /// Root-relative include paths, first occurrence order
    pub includes: Vec<PathBuf>,

    /// Exclude patterns including separator-stripped variants
    pub excludes: Vec<String>,
}

impl CompiledPathList {
    /// Compiles already-loaded include and exclude specs.
    pub fn compile(include: &PathSpec, exclude: &PathSpec) -> Self {
        let mut seen = HashSet::new();
        let includes = include
            .patterns()
            .map(root_relative)
            .filter(|p| seen.insert(p.clone()))
            .collect();

        let mut excludes = Vec::new();
        for pattern in exclude.patterns() {
            excludes.push(pattern.to_string());
            if pattern.starts_with('/') {
                let stripped = pattern.trim_start_matches('/');
                if !stripped.is_empty() {
                    excludes.push(stripped.to_string());
                }
            }
        }

        Self { includes, excludes }
    }

    /// Loads and compiles both spec files. Missing files compile to empty lists.
    pub fn from_files(include_file: &Path, exclude_file: &Path) -> anyhow::Result<Self> {
        let include = PathSpec::load(include_file, PatternKind::Include)?;
        let exclude = PathSpec::load(exclude_file, PatternKind::Exclude)?;
        Ok(Self::compile(&include, &exclude))
    }

    /// Writes the NUL-delimited include list consumed by the assembler.
    pub fn write_include_list(&self, path: &Path) -> anyhow::Result<()> {
        let mut buf = Vec::new();
        for include in &self.includes {
            buf.extend_from_slice(include.as_os_str().as_bytes());
            buf.push(0);
        }
        fs::write(path, buf)
            .map_err(|e| anyhow::anyhow!("Failed to write include list {}: {}", path.display(), e))
    }

    /// Reads a NUL-delimited include list.
    pub fn read_include_list(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
        use std::ffi::OsStr;

        let bytes = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read include list {}: {}", path.display(), e))?;
        Ok(bytes
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| PathBuf::from(OsStr::from_bytes(chunk)))
            .collect())
    }
}

/// Compiled exclusion matcher used while walking includes.
///
/// Patterns that start with `/`, or contain a `/`, are anchored at the root;
/// patterns without a separator match any single path component. The
/// stripped variant of an anchored pattern stays anchored.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    anchored: GlobSet,
    component: GlobSet,
    /// Root-relative paths excluded outright (output dir, scratch dir, ...)
    paths: Vec<PathBuf>,
}

impl ExclusionSet {
    /// Builds the matcher. Invalid globs are logged and skipped.
    pub fn new(patterns: &[String], implicit_paths: Vec<PathBuf>) -> anyhow::Result<Self> {
        let anchored_sources: HashSet<&str> = patterns
            .iter()
            .filter_map(|p| p.strip_prefix('/'))
            .map(|p| p.trim_start_matches('/'))
            .collect();

        let mut anchored = GlobSetBuilder::new();
        let mut component = GlobSetBuilder::new();

        for pattern in patterns {
            let is_variant = !pattern.starts_with('/') && anchored_sources.contains(pattern.as_str());
            let body = pattern.trim_start_matches('/').trim_end_matches('/');
            if body.is_empty() {
                continue;
            }

            let glob = match Glob::new(body) {
                Ok(glob) => glob,
                Err(e) => {
                    warn!("Ignoring invalid exclude pattern '{}': {}", pattern, e);
                    continue;
                }
            };

            if pattern.contains('/') || is_variant {
                anchored.add(glob);
            } else {
                component.add(glob);
            }
        }

        Ok(Self {
            anchored: anchored
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build exclusion globset: {}", e))?,
            component: component
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build exclusion globset: {}", e))?,
            paths: implicit_paths,
        })
    }

    /// Checks a root-relative path against every exclusion.
    pub fn should_exclude(&self, rel_path: &Path) -> bool {
        if self.paths.iter().any(|p| rel_path.starts_with(p)) {
            return true;
        }
        if self.anchored.is_match(rel_path) {
            return true;
        }
        match rel_path.file_name() {
            Some(name) => self.component.is_match(Path::new(name)),
            None => false,
        }
    }
}

//! Archive format detection and decoding.
//!
//! The transform chain of an archive is derived purely from its trailing
//! extensions. A small suffix table is matched greedily from the end of the
//! name: encryption first, then at most one compression layer, then `.tar`,
//! which is mandatory. Verification and restore both decode through
//! [`DecodePipeline`], so there is exactly one place that knows which tool
//! reverses which suffix.

use crate::error::BackupError;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::debug;

/// One inverse transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    Decrypt,
    Zstd,
    Xz,
    Gzip,
}

impl DecodeStep {
    /// Stage label used in logs and errors
    pub fn stage(&self) -> &'static str {
        match self {
            DecodeStep::Decrypt => "decrypt",
            DecodeStep::Zstd | DecodeStep::Xz | DecodeStep::Gzip => "decompress",
        }
    }

    fn is_compression(&self) -> bool {
        !matches!(self, DecodeStep::Decrypt)
    }
}

/// Suffix -> inverse step. Encryption must be the outermost layer.
const SUFFIX_TABLE: &[(&str, DecodeStep)] = &[
    (".gpg", DecodeStep::Decrypt),
    (".zst", DecodeStep::Zstd),
    (".xz", DecodeStep::Xz),
    (".gz", DecodeStep::Gzip),
];

/// Decode steps for an archive, outermost first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatChain {
    pub steps: Vec<DecodeStep>,
}

impl FormatChain {
    /// Detects the chain from a file name.
    pub fn detect(name: &str) -> Result<Self, BackupError> {
        let unrecognized = || BackupError::UnrecognizedFormat {
            name: name.to_string(),
        };

        let mut rest = name;
        let mut steps = Vec::new();

        while let Some((suffix, step)) = SUFFIX_TABLE
            .iter()
            .find(|(suffix, _)| rest.ends_with(suffix))
        {
            let out_of_order = match step {
                // Decrypt only as the very first (outermost) step
                DecodeStep::Decrypt => !steps.is_empty(),
                _ => steps.iter().any(DecodeStep::is_compression),
            };
            if out_of_order {
                return Err(unrecognized());
            }
            steps.push(*step);
            rest = &rest[..rest.len() - suffix.len()];
        }

        if !rest.ends_with(".tar") || rest.len() == ".tar".len() {
            return Err(unrecognized());
        }

        Ok(Self { steps })
    }

    /// Detects the chain from the file name component of `path`.
    pub fn for_path(path: &Path) -> Result<Self, BackupError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::detect(&name)
    }

    pub fn is_encrypted(&self) -> bool {
        self.steps.first() == Some(&DecodeStep::Decrypt)
    }
}

/// Locates the decryption tool (`gpg`, then `gpg2`).
pub fn find_gpg() -> Option<PathBuf> {
    which::which("gpg").or_else(|_| which::which("gpg2")).ok()
}

/// A readable plain tar stream produced by undoing every layer of an archive.
///
/// Read it to the end, then call [`DecodePipeline::finish`] to learn whether
/// every external decoder exited cleanly.
pub struct DecodePipeline {
    reader: Box<dyn Read + Send>,
    children: Vec<(DecodeStep, Child)>,
}

enum Source {
    File(File),
    Pipe(ChildStdout),
    Decoder(Box<dyn Read + Send>),
}

impl DecodePipeline {
    /// Opens `path` and stacks the decoders its extensions call for.
    pub fn open(path: &Path) -> Result<Self, BackupError> {
        if !path.is_file() {
            return Err(BackupError::ArchiveNotFound {
                path: path.to_path_buf(),
            });
        }
        let chain = FormatChain::for_path(path)?;
        let file = File::open(path).map_err(|_| BackupError::ArchiveNotFound {
            path: path.to_path_buf(),
        })?;

        // Resolve every external tool before spawning anything
        let gpg = if chain.is_encrypted() {
            Some(find_gpg().ok_or(BackupError::DecryptorMissing)?)
        } else {
            None
        };
        let xz = if chain.steps.contains(&DecodeStep::Xz) {
            Some(
                which::which("xz").map_err(|_| BackupError::DecoderMissing {
                    tool: "xz".to_string(),
                })?,
            )
        } else {
            None
        };

        let mut source = Source::File(file);
        let mut children = Vec::new();

        for step in &chain.steps {
            source = match (step, &gpg, &xz) {
                (DecodeStep::Decrypt, Some(gpg), _) => {
                    let mut cmd = Command::new(gpg);
                    cmd.args(["--batch", "--quiet", "--decrypt"]);
                    spawn_step(*step, cmd, source, &mut children)?
                }
                (DecodeStep::Xz, _, Some(xz)) => {
                    let mut cmd = Command::new(xz);
                    cmd.args(["--decompress", "--stdout"]);
                    spawn_step(*step, cmd, source, &mut children)?
                }
                (DecodeStep::Zstd, _, _) => {
                    let decoder = zstd::stream::read::Decoder::new(into_reader(source))
                        .map_err(|_| BackupError::stage_failed("decompress", None))?;
                    Source::Decoder(Box::new(decoder))
                }
                (DecodeStep::Gzip, _, _) => {
                    Source::Decoder(Box::new(MultiGzDecoder::new(into_reader(source))))
                }
                _ => return Err(BackupError::stage_failed(step.stage(), None)),
            };
        }

        Ok(Self {
            reader: into_reader(source),
            children,
        })
    }

    /// Drains any unread bytes and waits for the external decoders.
    pub fn finish(mut self) -> Result<(), BackupError> {
        // tar stops at the end-of-archive marker; the record padding after it
        // still has to be consumed so upstream writers do not hit EPIPE.
        if let Err(e) = io::copy(&mut self.reader, &mut io::sink()) {
            debug!("Failed to drain decoded stream: {}", e);
        }
        drop(self.reader);

        let mut failure = None;
        for (step, mut child) in self.children {
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    failure.get_or_insert(BackupError::stage_failed(step.stage(), status.code()));
                }
                Err(e) => {
                    debug!("Failed to wait for {} process: {}", step.stage(), e);
                    failure.get_or_insert(BackupError::stage_failed(step.stage(), None));
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stops every external decoder without reading the rest of the stream.
    pub fn abort(self) {
        drop(self.reader);
        for (step, mut child) in self.children {
            let _ = child.kill();
            if let Err(e) = child.wait() {
                debug!("Failed to reap {} process: {}", step.stage(), e);
            }
        }
    }
}

impl Read for DecodePipeline {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

fn spawn_step(
    step: DecodeStep,
    mut cmd: Command,
    source: Source,
    children: &mut Vec<(DecodeStep, Child)>,
) -> Result<Source, BackupError> {
    let stdin = match source {
        Source::File(file) => Stdio::from(file),
        Source::Pipe(pipe) => Stdio::from(pipe),
        // External tools only ever follow the file itself or another
        // external tool in the grammar, so this never holds a decoder.
        Source::Decoder(_) => return Err(BackupError::stage_failed(step.stage(), None)),
    };

    let mut child = cmd
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| {
            debug!("Failed to spawn {} process: {}", step.stage(), e);
            BackupError::stage_failed(step.stage(), None)
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BackupError::stage_failed(step.stage(), None))?;
    children.push((step, child));
    Ok(Source::Pipe(stdout))
}

fn into_reader(source: Source) -> Box<dyn Read + Send> {
    match source {
        Source::File(file) => Box::new(file),
        Source::Pipe(pipe) => Box::new(pipe),
        Source::Decoder(reader) => reader,
    }
}

//! Collection task discovery and supervision.
//!
//! A task is an independently failing unit that drops files into the shared
//! extras directory. The runner executes every task once, in natural name
//! order, and never lets one task's failure stop the others or the run.

use crate::runlog::RunLog;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use sysbak_core::TaskOutputMode;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extras directory handed to tasks
pub const ENV_EXTRAS_DIR: &str = "SYSBAK_EXTRAS_DIR";
/// `1` when tasks must not prompt
pub const ENV_NONINTERACTIVE: &str = "SYSBAK_NONINTERACTIVE";
/// Run log path, for tasks that want to log directly
pub const ENV_LOG_FILE: &str = "SYSBAK_LOG_FILE";
/// Name of the task being run
pub const ENV_TASK_NAME: &str = "SYSBAK_TASK_NAME";

/// Lifecycle of a single task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

/// Completion record for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    pub state: TaskState,
    /// `None` when the task could not be spawned or was killed by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl TaskRecord {
    pub fn succeeded(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Succeeded,
            exit_code: Some(0),
            duration,
        }
    }

    pub fn failed(name: impl Into<String>, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Failed,
            exit_code,
            duration,
        }
    }
}

/// Shared environment every task sees
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub extras_dir: PathBuf,
    pub non_interactive: bool,
    pub log: RunLog,
    pub output: TaskOutputMode,
}

/// A collection task.
///
/// `run` must not fail: spawn errors, non-zero exits and anything else are
/// folded into the returned [`TaskRecord`]. Tasks are never retried by the
/// runner; a task that wants retries implements them itself.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &TaskContext) -> TaskRecord;
}

/// Task backed by an executable file in the tasks directory
#[derive(Debug, Clone)]
pub struct ExecutableTask {
    name: String,
    path: PathBuf,
}

impl ExecutableTask {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Task for ExecutableTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> TaskRecord {
        let start = Instant::now();

        let mut cmd = Command::new(&self.path);
        cmd.current_dir(&ctx.extras_dir)
            .env(ENV_EXTRAS_DIR, &ctx.extras_dir)
            .env(ENV_NONINTERACTIVE, if ctx.non_interactive { "1" } else { "0" })
            .env(ENV_LOG_FILE, ctx.log.path())
            .env(ENV_TASK_NAME, &self.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Task {} could not be started: {}", self.name, e);
                let _ = ctx
                    .log
                    .append_line(&format!("[{}] failed to start: {}", self.name, e));
                return TaskRecord::failed(&self.name, None, start.elapsed());
            }
        };

        let streamed = ctx.output == TaskOutputMode::Streamed;
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_lines(
                stdout,
                self.name.clone(),
                ctx.log.clone(),
                streamed,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_lines(
                stderr,
                self.name.clone(),
                ctx.log.clone(),
                streamed,
            )));
        }

        let status = child.wait().await;
        for pump in pumps {
            let _ = pump.await;
        }
        let duration = start.elapsed();

        match status {
            Ok(status) if status.success() => TaskRecord::succeeded(&self.name, duration),
            Ok(status) => TaskRecord::failed(&self.name, status.code(), duration),
            Err(e) => {
                warn!("Failed to wait for task {}: {}", self.name, e);
                TaskRecord::failed(&self.name, None, duration)
            }
        }
    }
}

/// Copies a child stream line by line into the run log, and to the console
/// when streaming. Lines are prefixed with the task name.
async fn pump_lines<R>(reader: R, name: String, log: RunLog, streamed: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = format!("[{}] {}", name, text.trim_end_matches(['\n', '\r']));
                if let Err(e) = log.append_line(&line) {
                    debug!("Failed to append task output to run log: {}", e);
                }
                if streamed {
                    let mut out = std::io::stdout().lock();
                    let _ = writeln!(out, "{}", line);
                }
            }
            Err(e) => {
                debug!("Stopped reading output of task {}: {}", name, e);
                break;
            }
        }
    }
}

/// Ordered set of tasks discovered for this run
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<Box<dyn Task>>,
}

impl TaskRegistry {
    /// Scans `dir` for executable files.
    ///
    /// Names containing `sample` are skipped, as are directories and
    /// non-executable files. A missing directory yields an empty registry.
    pub fn discover(dir: &Path) -> anyhow::Result<Self> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Tasks directory {} does not exist", dir.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read tasks directory {}: {}",
                    dir.display(),
                    e
                ))
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.contains("sample") || name.starts_with('.') {
                debug!("Skipping task candidate {}", name);
                continue;
            }
            if !is_executable_file(&path) {
                debug!("Skipping non-executable task candidate {}", name);
                continue;
            }
            paths.push(path);
        }

        paths.sort_by(|a, b| {
            natural_cmp(
                &a.file_name().unwrap_or_default().to_string_lossy(),
                &b.file_name().unwrap_or_default().to_string_lossy(),
            )
        });

        Ok(Self {
            tasks: paths
                .into_iter()
                .map(|p| Box::new(ExecutableTask::new(p)) as Box<dyn Task>)
                .collect(),
        })
    }

    /// Builds a registry from already-constructed tasks, keeping their order.
    pub fn from_tasks(tasks: Vec<Box<dyn Task>>) -> Self {
        Self { tasks }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Digit-aware string comparison: `2-foo` sorts before `10-bar`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_num = String::new();
                while let Some(c) = a_chars.peek().copied().filter(char::is_ascii_digit) {
                    x_num.push(c);
                    a_chars.next();
                }
                let mut y_num = String::new();
                while let Some(c) = b_chars.peek().copied().filter(char::is_ascii_digit) {
                    y_num.push(c);
                    b_chars.next();
                }
                let x_trim = x_num.trim_start_matches('0');
                let y_trim = y_num.trim_start_matches('0');
                let ord = x_trim
                    .len()
                    .cmp(&y_trim.len())
                    .then_with(|| x_trim.cmp(y_trim))
                    .then_with(|| x_num.len().cmp(&y_num.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

/// Aggregate counters for the manifest and the run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records: Vec<TaskRecord>,
}

impl TaskSummary {
    fn push(&mut self, record: TaskRecord) {
        self.total += 1;
        match record.state {
            TaskState::Succeeded => self.succeeded += 1,
            _ => self.failed += 1,
        }
        self.records.push(record);
    }
}

/// Sequential task executor
pub struct TaskRunner {
    ctx: TaskContext,
}

impl TaskRunner {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }

    /// Runs every task in registry order and returns one record per task.
    pub async fn run_all(&self, registry: &TaskRegistry) -> TaskSummary {
        let mut summary = TaskSummary::default();

        for (idx, task) in registry.tasks.iter().enumerate() {
            info!(
                "Task {}/{} {}: {}",
                idx + 1,
                registry.len(),
                task.name(),
                TaskState::Running.as_str()
            );

            let record = task.run(&self.ctx).await;

            let exit = record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string());
            let line = format!(
                "task={} state={} exit={} duration={:.1}s",
                record.name,
                record.state.as_str(),
                exit,
                record.duration.as_secs_f64()
            );
            if record.state == TaskState::Succeeded {
                info!("{}", line);
            } else {
                warn!("{}", line);
            }

            summary.push(record);
        }

        summary
    }
}

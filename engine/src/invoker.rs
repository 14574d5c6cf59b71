//! Running tsqllint.
//!
//! [`LintInvoker`] is the seam between the scheduler and the external tool.
//! [`TsqllintInvoker`] is the process-backed implementation used by the server;
//! tests substitute scripted invokers.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tsqlls_types::LintSettings;

/// Default executable looked up on `PATH` when no explicit path is configured.
pub const DEFAULT_COMMAND: &str = "tsqllint";

/// Cap on captured stderr; tsqllint only prints diagnostics there on failure.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Invocation future type alias.
pub type LintFut<'a> = Pin<Box<dyn Future<Output = Result<LintRunResult, InvokeError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("{command} not found: {source}")]
    NotFound {
        command: String,
        source: which::Error,
    },
    #[error("failed to spawn {}: {source}", command.display())]
    Spawn { command: PathBuf, source: io::Error },
    #[error("failed to stage buffer for {}: {source}", file.display())]
    Stage { file: PathBuf, source: io::Error },
    #[error("failed waiting for tsqllint: {0}")]
    Wait(#[source] io::Error),
}

/// Everything one run needs, owned so the run can outlive its caller.
#[derive(Debug, Clone)]
pub struct LintRequest {
    /// Live buffer contents.
    pub content: String,
    /// Absolute path of the document being linted.
    pub file_path: PathBuf,
    pub working_dir: PathBuf,
    /// Settings as they were when the run started.
    pub settings: LintSettings,
}

/// Raw outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintRunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl LintRunResult {
    /// Result for a run that was cancelled before or during execution.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completed(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }
}

/// Runs the linter against one document's content.
///
/// Contract: if `token` is already cancelled, return `cancelled = true` at once
/// without starting work. If it is cancelled mid-flight, stop the external
/// work as far as possible and return `cancelled = true`.
pub trait LintInvoker: Send + Sync {
    fn run(&self, request: LintRequest, token: CancellationToken) -> LintFut<'_>;
}

/// Spawns the tsqllint executable.
///
/// The buffer is staged into a private temp directory under the document's own
/// file name, so unsaved edits are linted. Paths in the report that name the
/// staged copy are rewritten to the real document path.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsqllintInvoker;

impl TsqllintInvoker {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn resolve_command(settings: &LintSettings) -> Result<PathBuf, InvokeError> {
        let command = settings.path().unwrap_or(DEFAULT_COMMAND);
        which::which(command).map_err(|source| InvokeError::NotFound {
            command: command.to_string(),
            source,
        })
    }
}

impl LintInvoker for TsqllintInvoker {
    fn run(&self, request: LintRequest, token: CancellationToken) -> LintFut<'_> {
        Box::pin(async move {
            if token.is_cancelled() {
                return Ok(LintRunResult::cancelled());
            }

            let command = Self::resolve_command(&request.settings)?;
            let staged = StagedBuffer::write(&request.file_path, &request.content).await?;

            let mut cmd = Command::new(&command);
            if let Some(config) = request.settings.config_path() {
                cmd.arg("-c").arg(config);
            }
            cmd.arg(staged.path())
                .current_dir(&request.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            tracing::debug!(
                command = %command.display(),
                file = %request.file_path.display(),
                cwd = %request.working_dir.display(),
                "Spawning tsqllint"
            );
            let mut child = cmd.spawn().map_err(|source| InvokeError::Spawn {
                command: command.clone(),
                source,
            })?;

            let stdout_task = child
                .stdout
                .take()
                .map(|out| tokio::spawn(read_capped(out, u64::MAX)));
            let stderr_task = child
                .stderr
                .take()
                .map(|err| tokio::spawn(read_capped(err, MAX_STDERR_BYTES)));

            let status = tokio::select! {
                status = child.wait() => status.map_err(InvokeError::Wait)?,
                () = token.cancelled() => {
                    let _ = child.kill().await;
                    // Grandchildren may still hold the pipes open; don't wait on them.
                    for task in [stdout_task, stderr_task].into_iter().flatten() {
                        task.abort();
                    }
                    tracing::debug!(file = %request.file_path.display(), "tsqllint cancelled");
                    return Ok(LintRunResult::cancelled());
                }
            };

            let stdout = join_output(stdout_task).await;
            let stderr = join_output(stderr_task).await;

            Ok(LintRunResult {
                stdout: staged.rewrite_report(&stdout, &request.file_path),
                stderr,
                exit_code: status.code(),
                timed_out: false,
                cancelled: token.is_cancelled(),
            })
        })
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: R, limit: u64) -> String {
    let mut buf = Vec::with_capacity(1024);
    let _ = reader.take(limit).read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn join_output(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(task) => task
            .await
            .unwrap_or_else(|e| format!("[output task failed: {e}]")),
        None => String::new(),
    }
}

/// A copy of the live buffer on disk, removed on drop.
struct StagedBuffer {
    // Held for its Drop.
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl StagedBuffer {
    async fn write(file: &Path, content: &str) -> Result<Self, InvokeError> {
        let stage_err = |source| InvokeError::Stage {
            file: file.to_path_buf(),
            source,
        };
        let dir = tempfile::Builder::new()
            .prefix("tsqlls-")
            .tempdir()
            .map_err(stage_err)?;
        let name = file
            .file_name()
            .map_or_else(|| "buffer.sql".into(), ToOwned::to_owned);
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await.map_err(stage_err)?;
        Ok(Self { _dir: dir, path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Point report lines that name the staged copy at the real document.
    fn rewrite_report(&self, report: &str, real: &Path) -> String {
        let staged = self.path.to_string_lossy();
        if staged.is_empty() {
            return report.to_string();
        }
        report.replace(staged.as_ref(), &real.to_string_lossy())
    }
}

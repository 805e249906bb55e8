//! Terminal multiplexer seam used by the supervisor.

pub mod memory;
pub mod tmux;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_COLS: u16 = 220;
pub const DEFAULT_ROWS: u16 = 50;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("failed to run {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("{command} timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("{command} failed (status={status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// A detached session to start.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub name: String,
    pub workdir: PathBuf,
    /// Shell command run inside the session.
    pub command: String,
    pub cols: u16,
    pub rows: u16,
}

impl SessionSpec {
    pub fn new(
        name: impl Into<String>,
        workdir: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            workdir: workdir.into(),
            command: command.into(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Named, detached interactive sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Short name for logs and the health endpoint.
    fn kind(&self) -> &'static str;

    /// Start a detached session. Fails if `spec.name` is already taken.
    async fn start(&self, spec: &SessionSpec) -> Result<(), BackendError>;

    async fn is_alive(&self, name: &str) -> bool;

    /// Deliver `text` as a single paste followed by Enter, so embedded
    /// newlines do not submit separate commands.
    async fn paste_text(&self, name: &str, text: &str) -> Result<(), BackendError>;

    /// Last `lines` lines of the session screen and scrollback. Empty if the
    /// session does not exist.
    async fn capture(&self, name: &str, lines: usize) -> String;

    /// Terminate the session. Succeeds if it is already gone.
    async fn kill(&self, name: &str) -> Result<(), BackendError>;

    /// Append everything the session prints to `log_path`.
    async fn pipe_output(&self, name: &str, log_path: &Path) -> Result<(), BackendError>;
}

/// Last `n` lines of `text`, ignoring trailing blank lines (tmux pads a
/// capture with the empty rows below the cursor).
pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

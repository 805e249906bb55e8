//! [`SessionBackend`] on top of the `tmux` command line.
//!
//! Every invocation runs under a timeout and the child is killed if the
//! timeout fires.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{BackendError, SessionBackend, SessionSpec, tail_lines};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between the paste and the Enter keystroke so the application has
/// finished consuming the bracketed paste.
const SUBMIT_DELAY: Duration = Duration::from_millis(200);

pub struct TmuxBackend {
    program: PathBuf,
    timeout: Duration,
}

impl Default for TmuxBackend {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl TmuxBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("tmux"),
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[String], input: Option<&str>) -> Result<Output, BackendError> {
        let label = format!(
            "tmux {}",
            args.first().map(String::as_str).unwrap_or_default()
        );
        debug!(command = %label, ?args, "running tmux");

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let mut child = cmd.spawn()?;
            if let Some(text) = input {
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(text.as_bytes()).await?;
                    stdin.shutdown().await?;
                }
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(BackendError::Spawn {
                command: label,
                message: err.to_string(),
            }),
            Err(_) => Err(BackendError::Timeout {
                command: label,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn run_checked(
        &self,
        args: &[String],
        input: Option<&str>,
    ) -> Result<Output, BackendError> {
        let output = self.run(args, input).await?;
        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: format!(
                    "tmux {}",
                    args.first().map(String::as_str).unwrap_or_default()
                ),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    fn kind(&self) -> &'static str {
        "tmux"
    }

    async fn start(&self, spec: &SessionSpec) -> Result<(), BackendError> {
        if self.is_alive(&spec.name).await {
            return Err(BackendError::SessionExists(spec.name.clone()));
        }
        self.run_checked(&new_session_args(spec), None).await?;
        debug!(session = %spec.name, workdir = %spec.workdir.display(), "tmux session started");
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> bool {
        match self.run(&has_session_args(name), None).await {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!(session = %name, "liveness check failed: {err}");
                false
            }
        }
    }

    async fn paste_text(&self, name: &str, text: &str) -> Result<(), BackendError> {
        if !self.is_alive(name).await {
            return Err(BackendError::SessionNotFound(name.to_string()));
        }
        let buffer = buffer_name(name);
        self.run_checked(&load_buffer_args(&buffer), Some(text)).await?;
        self.run_checked(&paste_buffer_args(&buffer, name), None).await?;
        tokio::time::sleep(SUBMIT_DELAY).await;
        self.run_checked(&send_enter_args(name), None).await?;
        Ok(())
    }

    async fn capture(&self, name: &str, lines: usize) -> String {
        if !self.is_alive(name).await {
            return String::new();
        }
        match self.run_checked(&capture_args(name, lines), None).await {
            Ok(output) => trim_capture(&String::from_utf8_lossy(&output.stdout), lines),
            Err(err) => {
                debug!(session = %name, "capture failed: {err}");
                String::new()
            }
        }
    }

    async fn kill(&self, name: &str) -> Result<(), BackendError> {
        match self.run_checked(&kill_session_args(name), None).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if self.is_alive(name).await {
                    Err(err)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn pipe_output(&self, name: &str, log_path: &Path) -> Result<(), BackendError> {
        self.run_checked(&pipe_pane_args(name, log_path), None).await?;
        Ok(())
    }
}

/// `=name` makes tmux match the session name exactly instead of by prefix.
fn session_target(name: &str) -> String {
    format!("={name}")
}

fn pane_target(name: &str) -> String {
    format!("={name}:")
}

fn buffer_name(session: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("wsctl-{session}-{}", &suffix[..8])
}

fn new_session_args(spec: &SessionSpec) -> Vec<String> {
    vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        spec.name.clone(),
        "-x".to_string(),
        spec.cols.to_string(),
        "-y".to_string(),
        spec.rows.to_string(),
        "-c".to_string(),
        spec.workdir.display().to_string(),
        spec.command.clone(),
    ]
}

fn has_session_args(name: &str) -> Vec<String> {
    vec![
        "has-session".to_string(),
        "-t".to_string(),
        session_target(name),
    ]
}

fn load_buffer_args(buffer: &str) -> Vec<String> {
    vec![
        "load-buffer".to_string(),
        "-b".to_string(),
        buffer.to_string(),
        "-".to_string(),
    ]
}

/// `-p` pastes with bracketed-paste markers when the application asked for
/// them; `-d` deletes the buffer afterwards.
fn paste_buffer_args(buffer: &str, name: &str) -> Vec<String> {
    vec![
        "paste-buffer".to_string(),
        "-p".to_string(),
        "-d".to_string(),
        "-b".to_string(),
        buffer.to_string(),
        "-t".to_string(),
        pane_target(name),
    ]
}

fn send_enter_args(name: &str) -> Vec<String> {
    vec![
        "send-keys".to_string(),
        "-t".to_string(),
        pane_target(name),
        "Enter".to_string(),
    ]
}

fn capture_args(name: &str, lines: usize) -> Vec<String> {
    vec![
        "capture-pane".to_string(),
        "-p".to_string(),
        "-J".to_string(),
        "-t".to_string(),
        pane_target(name),
        "-S".to_string(),
        format!("-{lines}"),
    ]
}

/// `capture-pane -S -N` returns N scrollback lines plus the whole visible
/// pane, so the result is cut back to the last `lines` non-padding lines.
fn trim_capture(raw: &str, lines: usize) -> String {
    let mut text = tail_lines(raw, lines);
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

fn kill_session_args(name: &str) -> Vec<String> {
    vec![
        "kill-session".to_string(),
        "-t".to_string(),
        session_target(name),
    ]
}

fn pipe_pane_args(name: &str, log_path: &Path) -> Vec<String> {
    vec![
        "pipe-pane".to_string(),
        "-o".to_string(),
        "-t".to_string(),
        pane_target(name),
        format!("cat >> {}", shell_quote(&log_path.display().to_string())),
    ]
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

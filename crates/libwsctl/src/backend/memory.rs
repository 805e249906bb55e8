//! In-process [`SessionBackend`] with no real terminal.
//!
//! Sessions are plain records: pasted text is echoed onto a line-based
//! "screen", and exits are triggered by the caller. Used for UI work without
//! tmux and throughout the tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{BackendError, SessionBackend, SessionSpec};

#[derive(Debug, Default)]
struct MemorySession {
    workdir: PathBuf,
    alive: bool,
    screen: Vec<String>,
    inputs: Vec<String>,
    log_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, MemorySession>>,
    start_failure: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, MemorySession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `start` fail with `message`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        *self
            .start_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    /// Mark a session as exited, flushing its screen to the output log if one
    /// was attached.
    pub fn exit_session(&self, name: &str) {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(name) else {
            return;
        };
        if !session.alive {
            return;
        }
        session.alive = false;
        if let Some(path) = &session.log_path {
            let mut text = session.screen.join("\n");
            text.push('\n');
            if let Err(err) = std::fs::write(path, text) {
                tracing::warn!(session = %name, "failed to flush output log: {err}");
            }
        }
    }

    /// Append lines to the session screen as if the program printed them.
    pub fn print(&self, name: &str, text: &str) {
        if let Some(session) = self.sessions().get_mut(name) {
            session.screen.extend(text.lines().map(str::to_string));
        }
    }

    /// Every paste delivered to the session, in order.
    pub fn inputs(&self, name: &str) -> Vec<String> {
        self.sessions()
            .get(name)
            .map(|s| s.inputs.clone())
            .unwrap_or_default()
    }

    pub fn workdir(&self, name: &str) -> Option<PathBuf> {
        self.sessions().get(name).map(|s| s.workdir.clone())
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn start(&self, spec: &SessionSpec) -> Result<(), BackendError> {
        if let Some(message) = self
            .start_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(BackendError::CommandFailed {
                command: "memory start".to_string(),
                status: Some(1),
                stderr: message,
            });
        }

        let mut sessions = self.sessions();
        if sessions.get(&spec.name).is_some_and(|s| s.alive) {
            return Err(BackendError::SessionExists(spec.name.clone()));
        }
        sessions.insert(
            spec.name.clone(),
            MemorySession {
                workdir: spec.workdir.clone(),
                alive: true,
                screen: vec![format!("$ {}", spec.command)],
                ..MemorySession::default()
            },
        );
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> bool {
        self.sessions().get(name).is_some_and(|s| s.alive)
    }

    async fn paste_text(&self, name: &str, text: &str) -> Result<(), BackendError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(name)
            .filter(|s| s.alive)
            .ok_or_else(|| BackendError::SessionNotFound(name.to_string()))?;
        session.inputs.push(text.to_string());
        session.screen.extend(text.lines().map(|l| format!("> {l}")));
        Ok(())
    }

    async fn capture(&self, name: &str, lines: usize) -> String {
        let sessions = self.sessions();
        let Some(session) = sessions.get(name).filter(|s| s.alive) else {
            return String::new();
        };
        let start = session.screen.len().saturating_sub(lines);
        let mut text = session.screen[start..].join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    async fn kill(&self, name: &str) -> Result<(), BackendError> {
        if let Some(session) = self.sessions().get_mut(name) {
            session.alive = false;
        }
        Ok(())
    }

    async fn pipe_output(&self, name: &str, log_path: &Path) -> Result<(), BackendError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| BackendError::SessionNotFound(name.to_string()))?;
        session.log_path = Some(log_path.to_path_buf());
        Ok(())
    }
}

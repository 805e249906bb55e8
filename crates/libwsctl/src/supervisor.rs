//! Task lifecycle on top of a [`TaskStore`] and a [`SessionBackend`].
//!
//! The supervisor keeps no task state in memory: every call reloads the
//! record from disk. A task leaves `running` either through an explicit
//! delete or through reconciliation, which happens lazily whenever a task is
//! read and its backend session turns out to be gone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use wsctl_protocol::{
    Followup, NO_OUTPUT_SENTINEL, TaskDetail, TaskId, TaskRecord, TaskStatus, TaskSummary,
    session_name,
};

use crate::backend::{DEFAULT_COLS, DEFAULT_ROWS, SessionBackend, SessionSpec, tail_lines};
use crate::error::{TaskError, TaskResult};
use crate::store::TaskStore;

pub const DEFAULT_ASSISTANT_COMMAND: &str = "claude";
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);
const RECENT_OUTPUT_LINES: usize = 50;
const FULL_OUTPUT_LINES: usize = 2000;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Used when a task is created without a workdir.
    pub default_workdir: PathBuf,
    /// Shell command started in each session.
    pub assistant_command: String,
    /// Wait between starting a session and pasting the initial prompt, while
    /// the assistant draws its UI.
    pub settle_delay: Duration,
    pub cols: u16,
    pub rows: u16,
    /// Capture window for `get`.
    pub recent_output_lines: usize,
    /// Capture window for `output`.
    pub full_output_lines: usize,
}

impl SupervisorConfig {
    pub fn new(default_workdir: impl Into<PathBuf>) -> Self {
        Self {
            default_workdir: default_workdir.into(),
            assistant_command: DEFAULT_ASSISTANT_COMMAND.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            recent_output_lines: RECENT_OUTPUT_LINES,
            full_output_lines: FULL_OUTPUT_LINES,
        }
    }
}

/// Per-task async mutexes, keyed by task id.
///
/// An entry lives only while some caller holds or waits on it, so the map
/// does not grow with the number of tasks ever touched.
#[derive(Default)]
struct TaskLocks {
    inner: Arc<DashMap<TaskId, Arc<Mutex<()>>>>,
}

impl TaskLocks {
    async fn lock(&self, task_id: &str) -> TaskLockGuard {
        let mutex = self.inner.entry(task_id.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        TaskLockGuard {
            guard: Some(guard),
            task_id: task_id.to_string(),
            locks: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.len()
    }
}

struct TaskLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    task_id: TaskId,
    locks: Arc<DashMap<TaskId, Arc<Mutex<()>>>>,
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody holds or awaits the mutex.
        self.locks.remove_if(&self.task_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct TaskSupervisor {
    store: TaskStore,
    backend: Arc<dyn SessionBackend>,
    config: SupervisorConfig,
    /// Guards each task's metadata record.
    locks: TaskLocks,
    /// Held by the detached initial-prompt delivery until it has pasted, so
    /// follow-ups are never typed ahead of the initial prompt.
    deliveries: TaskLocks,
}

impl TaskSupervisor {
    pub fn new(
        store: TaskStore,
        backend: Arc<dyn SessionBackend>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
            locks: TaskLocks::default(),
            deliveries: TaskLocks::default(),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Create a task and start its session.
    ///
    /// A backend failure is not an error for the caller: the task is stored
    /// with `status = error` and returned so the reason can be inspected.
    pub async fn create(&self, prompt: &str, workdir: Option<PathBuf>) -> TaskResult<TaskRecord> {
        if prompt.trim().is_empty() {
            return Err(TaskError::InvalidInput("prompt is required".to_string()));
        }
        let workdir = match workdir {
            Some(dir) if !dir.is_absolute() => {
                return Err(TaskError::InvalidInput(format!(
                    "workdir must be an absolute path: {}",
                    dir.display()
                )));
            }
            Some(dir) => dir,
            None => self.config.default_workdir.clone(),
        };

        let task_id = new_task_id();
        let mut record = TaskRecord {
            task_id: task_id.clone(),
            session_id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            workdir,
            status: TaskStatus::Running,
            created_at: epoch_secs(),
            finished_at: None,
            killed_at: None,
            tmux_session: session_name(&task_id),
            followups: Vec::new(),
            error: None,
        };

        let _guard = self.locks.lock(&task_id).await;
        self.store.create(&task_id)?;
        self.store.write_prompt(&task_id, prompt)?;
        self.store.write(&record)?;

        let spec = SessionSpec {
            name: record.tmux_session.clone(),
            workdir: record.workdir.clone(),
            command: self.config.assistant_command.clone(),
            cols: self.config.cols,
            rows: self.config.rows,
        };
        if let Err(err) = self.backend.start(&spec).await {
            warn!(task_id = %task_id, session = %spec.name, "failed to start session: {err}");
            record.status = TaskStatus::Error;
            record.error = Some(err.to_string());
            record.finished_at = Some(epoch_secs());
            self.store.write(&record)?;
            return Ok(record);
        }

        let log_path = self.store.output_log_path(&task_id);
        if let Err(err) = self.backend.pipe_output(&spec.name, &log_path).await {
            warn!(task_id = %task_id, "output log unavailable: {err}");
        }

        let delivery = self.deliveries.lock(&task_id).await;
        self.schedule_prompt_delivery(&record, delivery);
        info!(
            task_id = %task_id,
            session = %record.tmux_session,
            workdir = %record.workdir.display(),
            "task created"
        );
        Ok(record)
    }

    /// Paste the initial prompt once the assistant has had time to start.
    /// Runs detached and releases `delivery` when done; failures are only
    /// logged and never change the task's status.
    fn schedule_prompt_delivery(&self, record: &TaskRecord, delivery: TaskLockGuard) {
        let backend = Arc::clone(&self.backend);
        let delay = self.config.settle_delay;
        let task_id = record.task_id.clone();
        let session = record.tmux_session.clone();
        let prompt = record.prompt.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match backend.paste_text(&session, &prompt).await {
                Ok(()) => info!(task_id = %task_id, "initial prompt delivered"),
                Err(err) => warn!(task_id = %task_id, "initial prompt delivery failed: {err}"),
            }
            drop(delivery);
        });
    }

    /// Summaries of every task, newest first. Unreadable records are skipped.
    pub async fn list(&self) -> TaskResult<Vec<TaskSummary>> {
        let mut records = Vec::new();
        for task_id in self.store.list_ids()? {
            match self.load_reconciled(&task_id).await {
                Ok(record) => records.push(record),
                Err(err) => warn!(task_id = %task_id, "skipping task: {err}"),
            }
        }
        records.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
        Ok(records.iter().map(TaskRecord::summary).collect())
    }

    pub async fn get(&self, task_id: &str) -> TaskResult<TaskDetail> {
        let record = self
            .load_reconciled(task_id)
            .await
            .map_err(|e| e.persistence_as_not_found(task_id))?;
        let recent_output = self
            .backend
            .capture(&record.tmux_session, self.config.recent_output_lines)
            .await;
        Ok(TaskDetail {
            record,
            recent_output,
        })
    }

    /// Session output: a live capture if the session is up, otherwise the
    /// persisted log, otherwise [`NO_OUTPUT_SENTINEL`].
    pub async fn output(&self, task_id: &str, tail: Option<usize>) -> TaskResult<String> {
        let record = self.load(task_id)?;
        let text = if self.backend.is_alive(&record.tmux_session).await {
            self.backend
                .capture(&record.tmux_session, self.config.full_output_lines)
                .await
        } else {
            match self.store.read_output_log(task_id) {
                Ok(Some(log)) if !log.is_empty() => log,
                Ok(_) => NO_OUTPUT_SENTINEL.to_string(),
                Err(err) => {
                    warn!(task_id = %task_id, "failed to read output log: {err}");
                    NO_OUTPUT_SENTINEL.to_string()
                }
            }
        };

        Ok(match tail {
            Some(n) => tail_lines(&text, n),
            None => text,
        })
    }

    /// Paste a follow-up into a live session and record it.
    pub async fn send_followup(&self, task_id: &str, prompt: &str) -> TaskResult<TaskRecord> {
        if prompt.trim().is_empty() {
            return Err(TaskError::InvalidInput("prompt is required".to_string()));
        }

        // Queue behind a pending initial prompt, without holding the record lock.
        drop(self.deliveries.lock(task_id).await);

        let _guard = self.locks.lock(task_id).await;
        let mut record = self.load(task_id)?;
        if !self.backend.is_alive(&record.tmux_session).await {
            return Err(TaskError::BackendUnavailable(
                "session no longer running".to_string(),
            ));
        }
        self.backend.paste_text(&record.tmux_session, prompt).await?;

        record.followups.push(Followup {
            prompt: prompt.to_string(),
            sent_at: epoch_secs(),
        });
        record.status = TaskStatus::Running;
        self.store.write(&record)?;
        info!(
            task_id = %task_id,
            followups = record.followups.len(),
            "follow-up sent"
        );
        Ok(record)
    }

    /// Kill the session and mark the task `killed`. Safe to repeat.
    pub async fn delete(&self, task_id: &str) -> TaskResult<TaskRecord> {
        let _guard = self.locks.lock(task_id).await;
        let mut record = self.load(task_id)?;
        self.backend.kill(&record.tmux_session).await?;

        record.status = TaskStatus::Killed;
        record.killed_at.get_or_insert_with(epoch_secs);
        self.store.write(&record)?;
        info!(task_id = %task_id, session = %record.tmux_session, "task killed");
        Ok(record)
    }

    fn load(&self, task_id: &str) -> TaskResult<TaskRecord> {
        self.store
            .read(task_id)
            .map_err(|e| e.persistence_as_not_found(task_id))
    }

    /// Load a record and mark it `completed` if its session has exited.
    async fn load_reconciled(&self, task_id: &str) -> TaskResult<TaskRecord> {
        let record = self.store.read(task_id)?;
        if !record.status.is_running() || self.backend.is_alive(&record.tmux_session).await {
            return Ok(record);
        }

        let _guard = self.locks.lock(task_id).await;
        let mut record = self.store.read(task_id)?;
        if !record.status.is_running() || self.backend.is_alive(&record.tmux_session).await {
            return Ok(record);
        }

        record.status = TaskStatus::Completed;
        record.finished_at.get_or_insert_with(epoch_secs);
        if let Err(err) = self.store.write(&record) {
            warn!(task_id = %task_id, "failed to persist reconciled status: {err}");
        } else {
            info!(task_id = %task_id, "session exited, task completed");
        }
        Ok(record)
    }
}

/// `<unix seconds>-<8 hex chars>`; sorts by creation time.
fn new_task_id() -> TaskId {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{secs}-{}", &suffix[..8])
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a task. Also the name of its directory on disk.
pub type TaskId = String;

/// Prefix of the backend session that hosts a task.
pub const SESSION_PREFIX: &str = "claude-";

/// Number of prompt characters kept in list summaries.
pub const PROMPT_PREVIEW_CHARS: usize = 120;

/// Returned by the output endpoint when neither a live capture nor a log exists.
pub const NO_OUTPUT_SENTINEL: &str = "no output available";

/// Backend session name for a task id.
pub fn session_name(task_id: &str) -> String {
    format!("{SESSION_PREFIX}{task_id}")
}

/// First `max_chars` characters of `prompt`, cut on a char boundary.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    match prompt.char_indices().nth(max_chars) {
        Some((idx, _)) => prompt[..idx].to_string(),
        None => prompt.to_string(),
    }
}

/// Lifecycle state of a task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
    Killed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Killed => "killed",
        }
    }

    pub fn is_running(self) -> bool {
        self == TaskStatus::Running
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A follow-up message delivered to a running task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Followup {
    pub prompt: String,
    /// Seconds since the unix epoch.
    pub sent_at: f64,
}

/// Persisted metadata for one task (`meta.json` in the task directory).
///
/// Timestamps are seconds since the unix epoch. `finished_at` and
/// `killed_at` are written at most once.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub session_id: String,
    pub prompt: String,
    pub workdir: PathBuf,
    pub status: TaskStatus,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_at: Option<f64>,
    pub tmux_session: String,
    #[serde(default)]
    pub followups: Vec<Followup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            prompt: truncate_prompt(&self.prompt, PROMPT_PREVIEW_CHARS),
            status: self.status,
            created_at: self.created_at,
            workdir: self.workdir.clone(),
            followup_count: self.followups.len(),
        }
    }
}

/// Entry in the task list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub prompt: String,
    pub status: TaskStatus,
    pub created_at: f64,
    pub workdir: PathBuf,
    pub followup_count: usize,
}

/// Full task record plus a bounded capture of the session screen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub recent_output: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TaskList {
    pub tasks: Vec<TaskSummary>,
}

/// Body of `POST /api/claude/tasks`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateTaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

/// Body of `POST /api/claude/tasks/{id}/message`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FollowupRequest {
    pub prompt: String,
}

/// Query string of `GET /api/claude/tasks/{id}/output`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OutputQuery {
    #[serde(default)]
    pub tail: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

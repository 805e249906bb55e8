//! On-disk task records.
//!
//! Layout under the tasks root:
//!
//! ```text
//! <root>/<task_id>/meta.json    full TaskRecord, rewritten atomically
//! <root>/<task_id>/prompt.txt   initial prompt
//! <root>/<task_id>/output.log   pane output piped by the backend (optional)
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use wsctl_protocol::{TaskId, TaskRecord};

use crate::error::{TaskError, TaskResult};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const META_FILE: &str = "meta.json";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const OUTPUT_LOG_FILE: &str = "output.log";

const MAX_TASK_ID_LEN: usize = 128;

/// Task ids are used as directory names, so only a conservative charset is accepted.
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id.len() <= MAX_TASK_ID_LEN
        && task_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Owns the per-task directories below a single root.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// Open the store, creating the root with `0700` permissions if needed.
    pub fn open(root: impl Into<PathBuf>) -> TaskResult<Self> {
        let root = root.into();
        ensure_private_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    pub fn output_log_path(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join(OUTPUT_LOG_FILE)
    }

    /// Create the directory for a new task. Fails if it already exists.
    pub fn create(&self, task_id: &str) -> TaskResult<PathBuf> {
        if !is_valid_task_id(task_id) {
            return Err(TaskError::InvalidInput(format!("invalid task id: {task_id}")));
        }
        let dir = self.task_dir(task_id);
        fs::create_dir(&dir)?;
        Ok(dir)
    }

    pub fn write_prompt(&self, task_id: &str, prompt: &str) -> TaskResult<()> {
        let path = self.task_dir(task_id).join(PROMPT_FILE);
        write_private(&path, prompt.as_bytes())?;
        Ok(())
    }

    /// Replace the whole metadata record.
    pub fn write(&self, record: &TaskRecord) -> TaskResult<()> {
        if !is_valid_task_id(&record.task_id) {
            return Err(TaskError::InvalidInput(format!(
                "invalid task id: {}",
                record.task_id
            )));
        }
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| TaskError::Persistence(format!("failed to encode task: {e}")))?;
        let path = self.task_dir(&record.task_id).join(META_FILE);
        write_private(&path, &json)?;
        debug!(task_id = %record.task_id, status = %record.status, "task record written");
        Ok(())
    }

    pub fn read(&self, task_id: &str) -> TaskResult<TaskRecord> {
        if !is_valid_task_id(task_id) {
            return Err(TaskError::NotFound(task_id.to_string()));
        }
        let path = self.task_dir(task_id).join(META_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TaskError::NotFound(task_id.to_string()));
            }
            Err(err) => {
                return Err(TaskError::Persistence(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        let record: TaskRecord = serde_json::from_slice(&raw).map_err(|e| {
            TaskError::Persistence(format!("failed to decode {}: {e}", path.display()))
        })?;
        if record.task_id != task_id {
            return Err(TaskError::Persistence(format!(
                "record in {} belongs to task {}",
                path.display(),
                record.task_id
            )));
        }
        Ok(record)
    }

    /// Task ids, newest first.
    ///
    /// Ids start with their creation time in seconds, so a descending sort
    /// orders them by creation.
    pub fn list_ids(&self) -> TaskResult<Vec<TaskId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_valid_task_id(&name) {
                ids.push(name);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Contents of the persisted output log, if one was written.
    pub fn read_output_log(&self, task_id: &str) -> TaskResult<Option<String>> {
        match fs::read(self.output_log_path(task_id)) {
            Ok(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Create a directory with `0700` permissions. An existing directory is left
/// as it is.
pub(crate) fn ensure_private_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `bytes` to a temp file next to `path` and rename it into place.
/// The result is readable and writable by the owner only.
pub(crate) fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = new_private_tempfile(path)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like [`write_private`], but fails with `AlreadyExists` instead of replacing `path`.
pub(crate) fn write_private_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = new_private_tempfile(path)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn new_private_tempfile(path: &Path) -> io::Result<tempfile::NamedTempFile> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    #[cfg(unix)]
    {
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
    }
    Ok(tmp)
}

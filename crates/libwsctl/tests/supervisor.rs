//! Task lifecycle scenarios against the in-memory session backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use libwsctl::{
    MemoryBackend, SessionBackend, SupervisorConfig, TaskError, TaskStore, TaskSupervisor,
};
use wsctl_protocol::{NO_OUTPUT_SENTINEL, TaskStatus};

struct Harness {
    _dir: tempfile::TempDir,
    backend: Arc<MemoryBackend>,
    supervisor: TaskSupervisor,
}

fn harness() -> Harness {
    harness_with_settle(Duration::from_millis(10))
}

fn harness_with_settle(settle_delay: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = TaskStore::open(dir.path().join("tasks")).unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let mut config = SupervisorConfig::new("/home/coder");
    config.settle_delay = settle_delay;
    let supervisor = TaskSupervisor::new(store, backend.clone(), config);
    Harness {
        _dir: dir,
        backend,
        supervisor,
    }
}

/// Wait until the backend has received `count` pastes for `session`.
async fn wait_for_inputs(backend: &MemoryBackend, session: &str, count: usize) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let inputs = backend.inputs(session);
        if inputs.len() >= count || tokio::time::Instant::now() > deadline {
            return inputs;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn create_then_list_shows_running_task() {
    let h = harness();
    let task = h.supervisor.create("write tests", None).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.tmux_session, format!("claude-{}", task.task_id));
    assert_eq!(task.workdir, PathBuf::from("/home/coder"));

    let tasks = h.supervisor.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, task.task_id);
    assert_eq!(tasks[0].status, TaskStatus::Running);

    let dir = h.supervisor.store().task_dir(&task.task_id);
    assert_eq!(
        std::fs::read_to_string(dir.join("prompt.txt")).unwrap(),
        "write tests"
    );
}

#[tokio::test]
async fn initial_prompt_is_pasted_after_settle_delay() {
    let h = harness();
    let prompt = "first line\nsecond line";
    let task = h.supervisor.create(prompt, Some("/srv/app".into())).await.unwrap();

    let inputs = wait_for_inputs(&h.backend, &task.tmux_session, 1).await;
    assert_eq!(inputs, vec![prompt.to_string()]);
    assert_eq!(
        h.backend.workdir(&task.tmux_session),
        Some(PathBuf::from("/srv/app"))
    );
}

#[tokio::test]
async fn empty_prompt_is_rejected_without_creating_a_task() {
    let h = harness();
    assert!(matches!(
        h.supervisor.create("", None).await,
        Err(TaskError::InvalidInput(_))
    ));
    assert!(matches!(
        h.supervisor.create("  \n ", None).await,
        Err(TaskError::InvalidInput(_))
    ));
    assert!(h.supervisor.store().list_ids().unwrap().is_empty());
}

#[tokio::test]
async fn relative_workdir_is_rejected() {
    let h = harness();
    assert!(matches!(
        h.supervisor.create("hi", Some("relative/dir".into())).await,
        Err(TaskError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn start_failure_is_recorded_on_the_task() {
    let h = harness();
    h.backend.fail_next_start("no server running");
    let task = h.supervisor.create("hello", None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.error.as_deref().unwrap().contains("no server running"));

    let detail = h.supervisor.get(&task.task_id).await.unwrap();
    assert_eq!(detail.record.status, TaskStatus::Error);
    assert_eq!(detail.recent_output, "");
}

#[tokio::test]
async fn exited_session_is_reconciled_to_completed() {
    let h = harness();
    let task = h.supervisor.create("echo hi", None).await.unwrap();
    h.backend.exit_session(&task.tmux_session);

    let tasks = h.supervisor.list().await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Completed);

    let detail = h.supervisor.get(&task.task_id).await.unwrap();
    assert_eq!(detail.record.status, TaskStatus::Completed);
    let finished_at = detail.record.finished_at.expect("finished_at set");

    // finished_at is written once.
    let again = h.supervisor.get(&task.task_id).await.unwrap();
    assert_eq!(again.record.finished_at, Some(finished_at));
}

#[tokio::test]
async fn list_skips_corrupt_records_and_orders_newest_first() {
    let h = harness();
    let older = h.supervisor.create("older", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = h.supervisor.create("newer", None).await.unwrap();

    let corrupt = h.supervisor.store().root().join("1-corrupt");
    std::fs::create_dir(&corrupt).unwrap();
    std::fs::write(corrupt.join("meta.json"), b"{oops").unwrap();

    let tasks = h.supervisor.list().await.unwrap();
    let ids: Vec<_> = tasks.iter().map(|t| t.task_id.clone()).collect();
    assert_eq!(ids, vec![newer.task_id, older.task_id]);

    assert!(matches!(
        h.supervisor.get("1-corrupt").await,
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn unreadable_record_is_not_found() {
    let h = harness();
    let task_dir = h.supervisor.store().root().join("1-unreadable");
    std::fs::create_dir(&task_dir).unwrap();
    std::fs::create_dir(task_dir.join("meta.json")).unwrap();

    assert!(matches!(
        h.supervisor.get("1-unreadable").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.output("1-unreadable", None).await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.delete("1-unreadable").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(h.supervisor.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn create_returns_before_prompt_delivery() {
    let settle = Duration::from_millis(300);
    let h = harness_with_settle(settle);

    let started = tokio::time::Instant::now();
    let task = h.supervisor.create("slow start", None).await.unwrap();
    assert!(started.elapsed() < settle / 2);
    assert!(h.backend.inputs(&task.tmux_session).is_empty());

    // The session dies before the prompt can be pasted.
    h.backend.exit_session(&task.tmux_session);
    tokio::time::sleep(settle + Duration::from_millis(200)).await;

    let record = h.supervisor.store().read(&task.task_id).unwrap();
    assert_eq!(record.status, TaskStatus::Running);
    assert!(record.error.is_none());
    assert!(h.backend.inputs(&task.tmux_session).is_empty());
}

#[tokio::test]
async fn followup_waits_for_initial_prompt() {
    let h = harness_with_settle(Duration::from_millis(200));
    let task = h.supervisor.create("first", None).await.unwrap();

    h.supervisor
        .send_followup(&task.task_id, "second")
        .await
        .unwrap();
    assert_eq!(h.backend.inputs(&task.tmux_session), vec!["first", "second"]);
}

#[tokio::test]
async fn list_truncates_long_prompts() {
    let h = harness();
    let prompt = "p".repeat(500);
    h.supervisor.create(&prompt, None).await.unwrap();
    let tasks = h.supervisor.list().await.unwrap();
    assert_eq!(tasks[0].prompt.chars().count(), 120);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.supervisor.get("1700000000-deadbeef").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.output("1700000000-deadbeef", None).await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.delete("1700000000-deadbeef").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.send_followup("1700000000-deadbeef", "hi").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.get("../../etc").await,
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let h = harness();
    let task = h.supervisor.create("long job", None).await.unwrap();

    let first = h.supervisor.delete(&task.task_id).await.unwrap();
    assert_eq!(first.status, TaskStatus::Killed);
    let killed_at = first.killed_at.expect("killed_at set");
    assert!(!h.backend.is_alive(&task.tmux_session).await);

    let second = h.supervisor.delete(&task.task_id).await.unwrap();
    assert_eq!(second.status, TaskStatus::Killed);
    assert_eq!(second.killed_at, Some(killed_at));

    // A killed task is not reconciled into completed.
    let detail = h.supervisor.get(&task.task_id).await.unwrap();
    assert_eq!(detail.record.status, TaskStatus::Killed);
}

#[tokio::test]
async fn followup_is_pasted_and_recorded() {
    let h = harness();
    let task = h.supervisor.create("start", None).await.unwrap();
    wait_for_inputs(&h.backend, &task.tmux_session, 1).await;

    let updated = h
        .supervisor
        .send_followup(&task.task_id, "now add docs\nand tests")
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Running);
    assert_eq!(updated.followups.len(), 1);
    assert_eq!(updated.followups[0].prompt, "now add docs\nand tests");

    let inputs = h.backend.inputs(&task.tmux_session);
    assert_eq!(inputs.last().map(String::as_str), Some("now add docs\nand tests"));
}

#[tokio::test]
async fn followup_to_dead_session_fails_without_mutation() {
    let h = harness();
    let task = h.supervisor.create("start", None).await.unwrap();
    h.backend.exit_session(&task.tmux_session);

    let err = h
        .supervisor
        .send_followup(&task.task_id, "are you there?")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::BackendUnavailable(_)));
    assert!(err.to_string().contains("session no longer running"));

    let record = h.supervisor.store().read(&task.task_id).unwrap();
    assert!(record.followups.is_empty());
}

#[tokio::test]
async fn concurrent_followups_are_all_recorded() {
    let h = Arc::new(harness());
    let task = h.supervisor.create("start", None).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let h = Arc::clone(&h);
        let task_id = task.task_id.clone();
        handles.push(tokio::spawn(async move {
            h.supervisor
                .send_followup(&task_id, &format!("message {i}"))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = h.supervisor.store().read(&task.task_id).unwrap();
    assert_eq!(record.followups.len(), 8);
}

#[tokio::test]
async fn output_prefers_live_capture_then_log_then_sentinel() {
    let h = harness();
    let task = h.supervisor.create("echo hi", None).await.unwrap();
    wait_for_inputs(&h.backend, &task.tmux_session, 1).await;
    h.backend.print(&task.tmux_session, "hi\nthere");

    let live = h.supervisor.output(&task.task_id, None).await.unwrap();
    assert!(live.contains("hi\nthere"));

    h.backend.exit_session(&task.tmux_session);
    let from_log = h.supervisor.output(&task.task_id, Some(1)).await.unwrap();
    assert_eq!(from_log, "there");

    std::fs::remove_file(h.supervisor.store().output_log_path(&task.task_id)).unwrap();
    let none = h.supervisor.output(&task.task_id, None).await.unwrap();
    assert_eq!(none, NO_OUTPUT_SENTINEL);
}

#[tokio::test]
async fn end_to_end_echo_task() {
    let h = harness();
    let task = h.supervisor.create("echo hi", None).await.unwrap();
    wait_for_inputs(&h.backend, &task.tmux_session, 1).await;

    let running = h.supervisor.get(&task.task_id).await.unwrap();
    assert_eq!(running.record.status, TaskStatus::Running);
    assert!(running.recent_output.contains("> echo hi"));

    h.backend.exit_session(&task.tmux_session);
    let done = h.supervisor.get(&task.task_id).await.unwrap();
    assert_eq!(done.record.status, TaskStatus::Completed);
    assert!(done.record.finished_at.is_some());

    let tail = h.supervisor.output(&task.task_id, Some(5)).await.unwrap();
    assert!(tail.lines().count() <= 5);
    assert!(tail.contains("echo hi"));
}

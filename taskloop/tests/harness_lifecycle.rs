//! Loop-level harness tests for full run lifecycle scenarios.
//!
//! These tests drive `run_goal` with a scripted model against a real working
//! directory: task intake, execution, feedback, retries, escalation and
//! termination.

use std::fs;
use std::sync::Arc;

use anyhow::{Result, anyhow};

use taskloop::core::types::{ExecOutput, Role, Task, TaskStatus, TaskType};
use taskloop::intake::IntakeOutcome;
use taskloop::io::config::LoopConfig;
use taskloop::io::executor::{CommandExecutor, SystemExecutor};
use taskloop::io::process::Mirror;
use taskloop::io::store::{TaskStore, TaskUpdate};
use taskloop::io::workspace::Workspace;
use taskloop::looping::LoopStop;
use taskloop::run::{open_store, run_goal};
use taskloop::step::StepOutcome;
use taskloop::test_support::ScriptedModel;

fn executor(config: &LoopConfig) -> SystemExecutor {
    SystemExecutor::from_config(&config.exec).with_mirror(Mirror::Silent)
}

fn task_line(description: &str, command: &str, kind: &str) -> String {
    format!("{description} [$execute_command(\"{command}\")] [$command_type(\"{kind}\")]")
}

/// Executor that raises for commands starting with `fail`, otherwise runs them.
struct FlakyExecutor {
    inner: SystemExecutor,
}

impl CommandExecutor for FlakyExecutor {
    fn execute(&self, task: &Task, workspace: &mut Workspace) -> Result<ExecOutput> {
        if task
            .command
            .as_deref()
            .is_some_and(|command| command.starts_with("fail"))
        {
            return Err(anyhow!("spawn command: program not found"));
        }
        self.inner.execute(task, workspace)
    }
}

/// Full lifecycle: plan → write → append → read → done.
///
/// Verifies one task per reply, ascending execution order, the feedback loop,
/// the persisted history and the audit log.
#[test]
fn full_lifecycle_runs_until_model_stops() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let store = open_store(temp.path(), &config).expect("store");
    let model = ScriptedModel::new([
        format!(
            "Plan: write a greeting.\n1. Create file [$execute_command(\"a.txt||hello|\")] [$command_type(\"write_file\")]\n2. {}",
            task_line("Ignored second task", "rm -rf .", "shell")
        ),
        task_line("2. Add a line", "a.txt|world", "append_file"),
        task_line("3. Read it back", "a.txt", "read_file"),
        "Everything is in place. The project is complete.".to_string(),
    ]);

    let mut steps = Vec::new();
    let report = run_goal(
        Workspace::new(temp.path().to_path_buf()),
        &config,
        Arc::clone(&store),
        "write a greeting file",
        &model,
        &executor(&config),
        |step| steps.push(step.clone()),
    )
    .expect("run");

    assert!(matches!(report.initial, IntakeOutcome::Enqueued(_)));
    assert_eq!(report.outcome.stop, LoopStop::Complete);
    assert_eq!(report.outcome.steps_executed, 3);
    assert!(steps.iter().all(StepOutcome::processed));
    assert_eq!(model.remaining(), 0);

    assert_eq!(
        fs::read_to_string(temp.path().join("a.txt")).expect("read"),
        "hello\nworld\n"
    );

    let tasks = store.list().expect("list");
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(tasks.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert_eq!(tasks[0].kind, TaskType::WriteFile);
    assert_eq!(tasks[0].description, "Create file");
    assert_eq!(tasks[2].output, "hello\nworld\n");

    let calls = model.calls();
    assert!(calls[3].message.contains("hello\nworld"));
    assert!(calls.iter().all(|call| call.system.contains("$execute_command")));

    let history = store.history().expect("history");
    assert_eq!(history.len(), 8);
    assert!(
        history
            .iter()
            .enumerate()
            .all(|(i, turn)| turn.role == if i % 2 == 0 { Role::User } else { Role::Model })
    );

    let log = fs::read_to_string(temp.path().join(&config.run.log_file)).expect("log");
    assert!(log.contains("User:\nUser wants to: \"write a greeting file\""));
    assert!(log.contains("The project is complete."));
}

/// A non-zero exit is reported to the model, not retried.
#[cfg(unix)]
#[test]
fn nonzero_exit_completes_and_is_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let store = open_store(temp.path(), &config).expect("store");
    let model = ScriptedModel::new([
        task_line("Check status", "exit 1", "shell"),
        "Understood, nothing else to do.".to_string(),
    ]);

    let report = run_goal(
        Workspace::new(temp.path().to_path_buf()),
        &config,
        Arc::clone(&store),
        "check",
        &model,
        &executor(&config),
        |_| {},
    )
    .expect("run");

    assert_eq!(report.outcome.stop, LoopStop::Complete);
    let task = &store.list().expect("list")[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retries, 0);
    assert!(task.output.contains("exited with code 1"));
    assert!(model.calls()[1].message.contains("exited with code 1"));
}

/// Spawn a background process, read its log without blocking, then close it.
#[cfg(unix)]
#[test]
fn spawned_process_is_retrieved_and_closed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let store = open_store(temp.path(), &config).expect("store");
    let model = ScriptedModel::new([
        task_line("Start server", "echo server up; sleep 30", "spawn_child_process"),
        task_line("Check server", "retrieve log for task 1", "retrieve_child_process"),
        task_line("Stop server", "close process for task 1", "close_child_process"),
        "Server verified.".to_string(),
    ]);

    let started = std::time::Instant::now();
    let report = run_goal(
        Workspace::new(temp.path().to_path_buf()),
        &config,
        Arc::clone(&store),
        "run a server",
        &model,
        &executor(&config),
        |_| {},
    )
    .expect("run");

    assert_eq!(report.outcome.stop, LoopStop::Complete);
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    let tasks = store.list().expect("list");
    assert_eq!(tasks.len(), 3);
    assert!(tasks[0].output.contains("Started process"));
    assert!(tasks[1].output.contains("stdout:"));
    assert_eq!(tasks[2].output, "Process for task 1 terminated");
}

/// Retries exhaust, the task fails and the escalation carries file contents.
#[cfg(unix)]
#[test]
fn exhausted_retries_escalate_with_created_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let store = open_store(temp.path(), &config).expect("store");
    let model = ScriptedModel::new([
        task_line("Write entry point", "index.js||console.log('hi')", "write_file"),
        task_line("Run it", "fail-to-launch index.js", "shell"),
        task_line("Try again", "node --version || true", "shell"),
        "Done.".to_string(),
    ]);
    let executor = FlakyExecutor {
        inner: executor(&config),
    };

    let mut outcomes = Vec::new();
    let report = run_goal(
        Workspace::new(temp.path().to_path_buf()),
        &config,
        Arc::clone(&store),
        "a node script",
        &model,
        &executor,
        |step| outcomes.push(step.clone()),
    )
    .expect("run");

    assert_eq!(report.outcome.stop, LoopStop::Complete);
    let retry_counts: Vec<u32> = outcomes
        .iter()
        .filter_map(|step| match step {
            StepOutcome::Retrying { retries, .. } => Some(*retries),
            _ => None,
        })
        .collect();
    assert_eq!(retry_counts, vec![1, 2, 3]);

    let failed = &store.list().expect("list")[1];
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retries, 3);

    let escalation = &model.calls()[2].message;
    assert!(escalation.contains("program not found"));
    assert!(escalation.contains("File: index.js\n---\nconsole.log('hi')"));
}

/// The iteration ceiling stops a model that never declares completion.
#[test]
fn iteration_ceiling_stops_endless_model() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = LoopConfig::default();
    config.run.max_iterations = 2;
    let store = open_store(temp.path(), &config).expect("store");
    let model = ScriptedModel::new(std::iter::repeat_n(
        task_line("Look around", "list files", "list_files"),
        5,
    ));

    let report = run_goal(
        Workspace::new(temp.path().to_path_buf()),
        &config,
        Arc::clone(&store),
        "explore forever",
        &model,
        &executor(&config),
        |_| {},
    )
    .expect("run");

    assert_eq!(
        report.outcome.stop,
        LoopStop::MaxIterationsExceeded { max_iterations: 2 }
    );
    assert_eq!(report.outcome.steps_executed, 2);
}

/// A model failure aborts the run with an error.
#[test]
fn model_failure_aborts_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let store = open_store(temp.path(), &config).expect("store");
    let model = ScriptedModel::new([task_line("Look", "list files", "list_files")]);

    let err = run_goal(
        Workspace::new(temp.path().to_path_buf()),
        &config,
        store,
        "anything",
        &model,
        &executor(&config),
        |_| {},
    )
    .expect_err("second model call has no reply");
    assert!(format!("{err:#}").contains("no reply left"));
}

/// Reopening the store returns a task left `in_progress` to `pending`.
#[test]
fn reopening_store_requeues_interrupted_task() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let path = temp.path().join(&config.run.store_file);
    {
        let store = TaskStore::open(&path).expect("open");
        let task = store
            .enqueue(&taskloop::core::types::NewTask {
                description: "interrupted".to_string(),
                command: None,
                kind: TaskType::Shell,
            })
            .expect("enqueue");
        store
            .update_status(task.id, &TaskUpdate::status(TaskStatus::InProgress))
            .expect("update");
        store.close().expect("close");
    }

    let store = open_store(temp.path(), &config).expect("reopen");
    let task = store.next_pending().expect("next").expect("pending task");
    assert_eq!(task.description, "interrupted");
    assert_eq!(store.pending_or_in_progress_count().expect("count"), 1);
}

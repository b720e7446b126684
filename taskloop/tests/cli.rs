//! CLI tests for the `taskloop` binary.
//!
//! Spawns the binary and verifies startup failures exit with
//! `exit_codes::INVALID` before any model request is made.

use std::process::Command;

use taskloop::core::types::{NewTask, TaskType};
use taskloop::exit_codes;
use taskloop::io::config::{LoopConfig, load_config};
use taskloop::io::store::TaskStore;

fn taskloop(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskloop"));
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn run_without_api_key_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskloop(temp.path())
        .env_remove("GEMINI_API_KEY")
        .args(["run", "project", "--goal", "a todo app"])
        .output()
        .expect("taskloop run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GEMINI_API_KEY"), "stderr: {stderr}");
    assert!(temp.path().join("project").is_dir());
}

#[test]
fn run_with_blank_goal_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskloop(temp.path())
        .env("GEMINI_API_KEY", "test-key")
        .args(["run", "project", "--goal", "   "])
        .output()
        .expect("taskloop run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("goal must not be empty"));
    assert!(!temp.path().join("project").join("taskloop.db").exists());
}

#[test]
fn run_with_invalid_config_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("bad.toml");
    std::fs::write(&config, "[run]\nmax_iterations = 0\n").expect("write config");
    let output = taskloop(temp.path())
        .env("GEMINI_API_KEY", "test-key")
        .args(["run", "project", "--goal", "x", "--config"])
        .arg(&config)
        .output()
        .expect("taskloop run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("run.max_iterations"));
}

#[test]
fn tasks_prints_stored_tasks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store_path = temp.path().join(LoopConfig::default().run.store_file);
    let store = TaskStore::open(&store_path).expect("open");
    store
        .enqueue(&NewTask {
            description: "Create file".to_string(),
            command: Some("a.txt||hello".to_string()),
            kind: TaskType::WriteFile,
        })
        .expect("enqueue");
    store.close().expect("close");

    let output = taskloop(temp.path())
        .args(["tasks", "."])
        .output()
        .expect("taskloop tasks");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pending"));
    assert!(stdout.contains("write_file"));
    assert!(stdout.contains("Create file"));
}

#[test]
fn tasks_without_store_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = taskloop(temp.path())
        .args(["tasks", "."])
        .status()
        .expect("taskloop tasks");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskloop(temp.path())
        .args(["init", "project"])
        .output()
        .expect("taskloop init");
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let path = temp.path().join("project").join("taskloop.toml");
    let config = load_config(&path).expect("load written config");
    assert_eq!(config, LoopConfig::default());

    let again = taskloop(temp.path())
        .args(["init", "project"])
        .output()
        .expect("taskloop init");
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    let forced = taskloop(temp.path())
        .args(["init", "project", "--force"])
        .status()
        .expect("taskloop init");
    assert_eq!(forced.code(), Some(exit_codes::OK));
}

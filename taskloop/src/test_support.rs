//! Test-only doubles for the model, the executor and the working directory.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ConversationTurn, ExecOutput, Task, TaskId, TaskStatus, TaskType};
use crate::io::executor::CommandExecutor;
use crate::io::model::ModelBackend;
use crate::io::workspace::Workspace;

/// One recorded `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCall {
    pub system: String,
    pub history: Vec<ConversationTurn>,
    pub message: String,
}

/// Model that replays canned replies in order and records what it was sent.
///
/// Running out of replies is an error, like a failed request.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<String>>,
    calls: RefCell<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl ModelBackend for ScriptedModel {
    fn generate(
        &self,
        system: &str,
        history: &[ConversationTurn],
        message: &str,
    ) -> Result<String> {
        self.calls.borrow_mut().push(ModelCall {
            system: system.to_string(),
            history: history.to_vec(),
            message: message.to_string(),
        });
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no reply left"))
    }
}

/// Executor whose every call fails, counting attempts.
#[derive(Debug)]
pub struct FailingExecutor {
    message: String,
    calls: Cell<u32>,
}

impl FailingExecutor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl CommandExecutor for FailingExecutor {
    fn execute(&self, _task: &Task, _workspace: &mut Workspace) -> Result<ExecOutput> {
        self.calls.set(self.calls.get() + 1);
        Err(anyhow!("{}", self.message))
    }
}

/// Temporary working directory wrapped in a [`Workspace`].
pub struct TestWorkspace {
    pub dir: TempDir,
    pub workspace: Workspace,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(dir.path().to_path_buf());
        Self { dir, workspace }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file and register it as created this session.
    pub fn write_created(&mut self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
        self.workspace.created_mut().insert(path.clone());
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an in-progress task with deterministic defaults.
pub fn task(id: TaskId, kind: TaskType, command: Option<&str>) -> Task {
    Task {
        id,
        description: format!("task {id}"),
        command: command.map(str::to_string),
        kind,
        status: TaskStatus::InProgress,
        output: String::new(),
        error: String::new(),
        retries: 0,
    }
}

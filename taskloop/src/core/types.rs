//! Shared types for the task loop.
//!
//! These types define stable contracts between the parser, the store, the
//! executor and the orchestrator. They carry no I/O and serialize to the same
//! lowercase names that are persisted in the store and emitted by the model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Store-assigned task identifier. Ascending ids define dequeue order.
pub type TaskId = i64;

/// Closed set of task kinds the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Shell,
    Node,
    WriteFile,
    AppendFile,
    SpawnChildProcess,
    RetrieveChildProcess,
    CloseChildProcess,
    ListFiles,
    ReadFile,
    DeleteFile,
}

impl TaskType {
    pub const ALL: [TaskType; 10] = [
        TaskType::Shell,
        TaskType::Node,
        TaskType::WriteFile,
        TaskType::AppendFile,
        TaskType::SpawnChildProcess,
        TaskType::RetrieveChildProcess,
        TaskType::CloseChildProcess,
        TaskType::ListFiles,
        TaskType::ReadFile,
        TaskType::DeleteFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Shell => "shell",
            TaskType::Node => "node",
            TaskType::WriteFile => "write_file",
            TaskType::AppendFile => "append_file",
            TaskType::SpawnChildProcess => "spawn_child_process",
            TaskType::RetrieveChildProcess => "retrieve_child_process",
            TaskType::CloseChildProcess => "close_child_process",
            TaskType::ListFiles => "list_files",
            TaskType::ReadFile => "read_file",
            TaskType::DeleteFile => "delete_file",
        }
    }

    /// Types whose payload names a file and therefore must be non-blank.
    pub fn requires_command(self) -> bool {
        matches!(
            self,
            TaskType::WriteFile | TaskType::AppendFile | TaskType::ReadFile | TaskType::DeleteFile
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task type '{s}'"))
    }
}

/// Lifecycle of a task: `pending -> in_progress -> {completed | failed}`.
///
/// A recoverable failure moves `in_progress` back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Task descriptor produced by the parser, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub description: String,
    pub command: Option<String>,
    #[serde(rename = "type")]
    pub kind: TaskType,
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub command: Option<String>,
    #[serde(rename = "type")]
    pub kind: TaskType,
    pub status: TaskStatus,
    pub output: String,
    pub error: String,
    pub retries: u32,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// One role-tagged message in the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub message: String,
}

impl ConversationTurn {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            message: message.into(),
        }
    }
}

/// Text captured from executing one task.
///
/// `stdout` is the report sent back to the model; for commands it also carries
/// the interleaved stderr lines and the exit-code marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn message(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

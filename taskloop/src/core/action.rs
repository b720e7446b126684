//! Typed view of a task's payload.
//!
//! The store keeps the wire form (`type` + raw `command`). [`TaskAction::decode`]
//! turns that pair into a tagged variant with per-type payload rules, and is
//! shared by the parser (to reject bad tasks at intake) and the executor (to
//! act on stored tasks).

use std::sync::LazyLock;

use regex::Regex;

use crate::core::grammar::ParseRejection;
use crate::core::path::validate_filename;
use crate::core::types::{TaskId, TaskType};

/// Separator between filename and content in a `write_file` payload.
pub const FILENAME_SEPARATOR: &str = "||";
/// Separator between lines in multi-line payloads.
pub const LINE_SEPARATOR: char = '|';
/// The only accepted `list_files` instruction (case-insensitive).
pub const LIST_FILES_INSTRUCTION: &str = "list files";

static RETRIEVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*retrieve\s+logs?\s+for\s+task\s+#?(\d+)\s*\.?\s*$")
        .expect("retrieve regex is valid")
});
static CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:close|kill)\s+process\s+for\s+task\s+#?(\d+)\s*\.?\s*$")
        .expect("close regex is valid")
});

/// Reference to a task that owns a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Instruction as written by the model.
    pub instruction: String,
    /// Parsed owner task id; `None` when the phrase did not match.
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    Shell { command: String },
    Node { script: String },
    WriteFile { path: String, content: String },
    AppendFile { path: String, lines: Vec<String> },
    SpawnChild { command: String },
    RetrieveChild(ChildRef),
    CloseChild(ChildRef),
    ListFiles,
    ReadFile { path: String },
    DeleteFile { path: String },
}

impl TaskAction {
    /// Decode a stored `(type, command)` pair.
    ///
    /// Returns `Ok(None)` for description-only tasks (no command on a type that
    /// does not require one).
    pub fn decode(kind: TaskType, command: Option<&str>) -> Result<Option<Self>, ParseRejection> {
        let blank = command.is_none_or(|c| c.trim().is_empty());
        if kind.requires_command() && blank {
            return Err(ParseRejection::EmptyCommand(kind));
        }
        if kind == TaskType::ListFiles {
            let instruction = command.unwrap_or_default().trim();
            if !instruction.eq_ignore_ascii_case(LIST_FILES_INSTRUCTION) {
                return Err(ParseRejection::UnexpectedListInstruction(
                    instruction.to_string(),
                ));
            }
            return Ok(Some(TaskAction::ListFiles));
        }
        let Some(command) = command.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let action = match kind {
            TaskType::Shell => TaskAction::Shell {
                command: command.to_string(),
            },
            TaskType::Node => TaskAction::Node {
                script: command.to_string(),
            },
            TaskType::WriteFile => {
                let (path, content) = split_write_payload(command);
                TaskAction::WriteFile {
                    content: render_write_content(&path, content),
                    path,
                }
            }
            TaskType::AppendFile => {
                let mut parts = command.split(LINE_SEPARATOR);
                let path = parts.next().unwrap_or_default().trim().to_string();
                TaskAction::AppendFile {
                    path,
                    lines: parts.map(str::to_string).collect(),
                }
            }
            TaskType::SpawnChildProcess => TaskAction::SpawnChild {
                command: command.to_string(),
            },
            TaskType::RetrieveChildProcess => {
                TaskAction::RetrieveChild(ChildRef::parse(command, &RETRIEVE_RE))
            }
            TaskType::CloseChildProcess => {
                TaskAction::CloseChild(ChildRef::parse(command, &CLOSE_RE))
            }
            TaskType::ReadFile => {
                let path = command.trim();
                validate_filename(path)?;
                TaskAction::ReadFile {
                    path: path.to_string(),
                }
            }
            TaskType::DeleteFile => {
                let path = command.trim();
                validate_filename(path)?;
                TaskAction::DeleteFile {
                    path: path.to_string(),
                }
            }
            TaskType::ListFiles => TaskAction::ListFiles,
        };
        Ok(Some(action))
    }
}

impl ChildRef {
    fn parse(instruction: &str, phrase: &Regex) -> Self {
        let task_id = phrase
            .captures(instruction)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<TaskId>().ok());
        Self {
            instruction: instruction.to_string(),
            task_id,
        }
    }
}

/// Split `filename||content`, falling back to the legacy `filename|content` form.
fn split_write_payload(command: &str) -> (String, &str) {
    let (path, content) = command
        .split_once(FILENAME_SEPARATOR)
        .or_else(|| command.split_once(LINE_SEPARATOR))
        .unwrap_or((command, ""));
    (path.trim().to_string(), content)
}

/// Expand line separators; JSON files are re-serialized with stable indentation.
fn render_write_content(path: &str, content: &str) -> String {
    let expanded = content.replace(LINE_SEPARATOR, "\n");
    if !is_structured_data(path) {
        return expanded;
    }
    let parsed = serde_json::from_str::<serde_json::Value>(&expanded)
        .or_else(|_| serde_json::from_str::<serde_json::Value>(content));
    match parsed.and_then(|value| serde_json::to_string_pretty(&value)) {
        Ok(mut pretty) => {
            pretty.push('\n');
            pretty
        }
        Err(_) => expanded,
    }
}

fn is_structured_data(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

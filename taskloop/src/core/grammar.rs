//! Task-line grammar for model replies.
//!
//! A reply may contain prose, code fences and several candidate tasks. Only the
//! first non-empty line that mentions [`COMMAND_MARKER`] is considered, which
//! caps intake at one task per model turn. That line is read with a small
//! recursive-descent scanner:
//!
//! ```text
//! line     := ordinal? segment*
//! ordinal  := DIGITS "." WS+
//! segment  := tag | TEXT
//! tag      := "["? marker "(" quoted ")" "]"?
//! marker   := "$execute_command" | "$command_type"
//! quoted   := '"' ( '\"' | '\\' | CHAR )* '"'
//! ```
//!
//! A `"` inside `quoted` only closes the argument when the next non-blank
//! character is `)`, so models that forget to escape inner quotes still parse.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::action::TaskAction;
use crate::core::types::{NewTask, TaskType};

pub const COMMAND_MARKER: &str = "$execute_command";
pub const TYPE_MARKER: &str = "$command_type";

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s+").expect("ordinal regex is valid"));

/// Reason a reply produced no task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRejection {
    #[error("no line contains $execute_command")]
    NoTaskLine,
    #[error("unknown task type '{0}'")]
    UnknownType(String),
    #[error("{0} task has an empty command")]
    EmptyCommand(TaskType),
    #[error("list_files expects the instruction 'list files', got '{0}'")]
    UnexpectedListInstruction(String),
    #[error("invalid filename '{name}': {reason}")]
    InvalidFilename { name: String, reason: &'static str },
}

/// Raw pieces of one task line, before type validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLine {
    pub description: String,
    pub command: Option<String>,
    pub type_tag: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Tag {
    Command,
    Type,
}

/// Parse one model reply into at most one validated task descriptor.
pub fn parse_response(raw: &str) -> Result<NewTask, ParseRejection> {
    let line = first_task_line(raw).ok_or(ParseRejection::NoTaskLine)?;
    let parsed = TaskLine::parse(line);

    let kind = match &parsed.type_tag {
        Some(tag) => {
            let lowered = tag.trim().to_lowercase();
            lowered
                .parse::<TaskType>()
                .map_err(|_| ParseRejection::UnknownType(lowered))?
        }
        None => TaskType::Shell,
    };

    TaskAction::decode(kind, parsed.command.as_deref())?;

    let description = if parsed.description.is_empty() {
        line.to_string()
    } else {
        parsed.description
    };
    Ok(NewTask {
        description,
        command: parsed.command,
        kind,
    })
}

/// Count the lines that carry a task marker (used for the flooding diagnostic).
pub fn count_task_lines(raw: &str) -> usize {
    raw.lines()
        .filter(|line| line.contains(COMMAND_MARKER))
        .count()
}

fn first_task_line(raw: &str) -> Option<&str> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| line.contains(COMMAND_MARKER))
}

impl TaskLine {
    /// Scan a single line, extracting both tags and the remaining description.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let mut rest = match ORDINAL_RE.find(trimmed) {
            Some(m) => &trimmed[m.end()..],
            None => trimmed,
        };

        let mut out = TaskLine::default();
        let mut text = String::new();

        while let Some((idx, marker, tag)) = next_marker(rest) {
            let before = &rest[..idx];
            let (before, bracketed) = match before.trim_end().strip_suffix('[') {
                Some(stripped) => (stripped, true),
                None => (before, false),
            };
            text.push_str(before);
            text.push(' ');

            let after_marker = &rest[idx + marker.len()..];
            let (value, mut remaining) = match parse_argument(after_marker) {
                Some((value, remaining)) => (Some(value), remaining),
                None => (None, after_marker),
            };
            if bracketed && let Some(closed) = remaining.trim_start().strip_prefix(']') {
                remaining = closed;
            }

            let value = value.filter(|v| !v.is_empty());
            match tag {
                Tag::Command if out.command.is_none() => out.command = value,
                Tag::Type if out.type_tag.is_none() => out.type_tag = value,
                _ => {}
            }
            rest = remaining;
        }
        text.push_str(rest);

        out.description = text.split_whitespace().collect::<Vec<_>>().join(" ");
        out
    }
}

fn next_marker(input: &str) -> Option<(usize, &'static str, Tag)> {
    [(COMMAND_MARKER, Tag::Command), (TYPE_MARKER, Tag::Type)]
        .into_iter()
        .filter_map(|(marker, tag)| input.find(marker).map(|idx| (idx, marker, tag)))
        .min_by_key(|(idx, _, _)| *idx)
}

/// Parse `( "..." )`, returning the unescaped value and the unconsumed tail.
fn parse_argument(input: &str) -> Option<(String, &str)> {
    let body = input.trim_start().strip_prefix('(')?;
    let body = body.trim_start().strip_prefix('"')?;

    let mut value = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.peek() {
                Some(&(_, next @ ('"' | '\\'))) => {
                    value.push(next);
                    chars.next();
                }
                _ => value.push('\\'),
            },
            '"' => {
                let after = body[idx + 1..].trim_start();
                if let Some(tail) = after.strip_prefix(')') {
                    return Some((value, tail));
                }
                value.push('"');
            }
            other => value.push(other),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_write_file_line() {
        let raw =
            r#"1. Create file [$execute_command("a.txt||hello")] [$command_type("write_file")]"#;
        let task = parse_response(raw).expect("task");
        assert_eq!(task.kind, TaskType::WriteFile);
        assert_eq!(task.command.as_deref(), Some("a.txt||hello"));
        assert_eq!(task.description, "Create file");
    }

    #[test]
    fn only_first_marker_line_is_honored() {
        let raw = concat!(
            "Here is the plan:\n",
            "\n",
            "1. Install deps [$execute_command(\"npm install\")] [$command_type(\"shell\")]\n",
            "2. Start server [$execute_command(\"node app.js\")] [$command_type(\"spawn_child_process\")]\n",
        );
        assert_eq!(count_task_lines(raw), 2);
        let task = parse_response(raw).expect("task");
        assert_eq!(task.command.as_deref(), Some("npm install"));
        assert_eq!(task.description, "Install deps");
    }

    #[test]
    fn missing_type_tag_defaults_to_shell() {
        let task = parse_response(r#"Show version $execute_command("node --version")"#)
            .expect("task");
        assert_eq!(task.kind, TaskType::Shell);
        assert_eq!(task.description, "Show version");
    }

    #[test]
    fn type_tag_is_lowercased() {
        let task =
            parse_response(r#"List [$execute_command("ls")] [$command_type("SHELL")]"#).expect("task");
        assert_eq!(task.kind, TaskType::Shell);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = parse_response(
            r#"Drop it [$execute_command("rm -rf db")] [$command_type("delete_database")]"#,
        )
        .unwrap_err();
        assert_eq!(err, ParseRejection::UnknownType("delete_database".to_string()));
    }

    #[test]
    fn escaped_quotes_and_backslashes_are_unescaped() {
        let line = r#"Greet [$execute_command("echo \"hi\" C:\\tmp")] [$command_type("shell")]"#;
        let task = parse_response(line).expect("task");
        assert_eq!(task.command.as_deref(), Some(r#"echo "hi" C:\tmp"#));
    }

    #[test]
    fn unescaped_inner_quotes_are_tolerated() {
        let line = r#"Print [$execute_command("echo "done"")] [$command_type("shell")]"#;
        let task = parse_response(line).expect("task");
        assert_eq!(task.command.as_deref(), Some(r#"echo "done""#));
        assert_eq!(task.description, "Print");
    }

    #[test]
    fn empty_file_command_is_rejected() {
        let err = parse_response(r#"Write [$execute_command("  ")] [$command_type("write_file")]"#)
            .unwrap_err();
        assert_eq!(err, ParseRejection::EmptyCommand(TaskType::WriteFile));

        let err = parse_response(r#"Append [$execute_command] [$command_type("append_file")]"#)
            .unwrap_err();
        assert_eq!(err, ParseRejection::EmptyCommand(TaskType::AppendFile));
    }

    #[test]
    fn list_files_requires_fixed_instruction() {
        let ok = parse_response(r#"Look [$execute_command("List Files")] [$command_type("list_files")]"#);
        assert!(ok.is_ok());

        let err = parse_response(r#"Look [$execute_command("ls -la")] [$command_type("list_files")]"#)
            .unwrap_err();
        assert!(matches!(err, ParseRejection::UnexpectedListInstruction(_)));
    }

    #[test]
    fn read_file_rejects_reserved_characters() {
        let err = parse_response(r#"Read [$execute_command("bad<name.txt")] [$command_type("read_file")]"#)
            .unwrap_err();
        assert!(matches!(err, ParseRejection::InvalidFilename { .. }));

        let task = parse_response(r#"Read [$execute_command("good.txt")] [$command_type("read_file")]"#)
            .expect("task");
        assert_eq!(task.command.as_deref(), Some("good.txt"));
    }

    #[test]
    fn reply_without_marker_yields_no_task() {
        let err = parse_response("All done! The project is complete.").unwrap_err();
        assert_eq!(err, ParseRejection::NoTaskLine);
    }

    #[test]
    fn marker_without_argument_leaves_command_empty() {
        let line = TaskLine::parse("3. Review the output $execute_command");
        assert_eq!(line.command, None);
        assert_eq!(line.description, "Review the output");
        let task = parse_response("3. Review the output $execute_command").expect("task");
        assert_eq!(task.kind, TaskType::Shell);
        assert_eq!(task.command, None);

        let task = parse_response(r#"4. Wrap up [$execute_command("")]"#).expect("task");
        assert_eq!(task.command, None);
        assert_eq!(task.description, "Wrap up");
    }

    #[test]
    fn type_tag_before_command_tag_is_accepted() {
        let line = TaskLine::parse(
            r#"Start [$command_type("spawn_child_process")] [$execute_command("node server.js")]"#,
        );
        assert_eq!(line.type_tag.as_deref(), Some("spawn_child_process"));
        assert_eq!(line.command.as_deref(), Some("node server.js"));
        assert_eq!(line.description, "Start");
    }
}

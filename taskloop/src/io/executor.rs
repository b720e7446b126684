//! Command execution for stored tasks.
//!
//! The [`CommandExecutor`] trait decouples the orchestrator from the real
//! filesystem and process side effects. Tests use failing or scripted
//! executors without touching the OS.
//!
//! Expected failure modes (a non-zero exit, a missing file, a refused path, a
//! malformed process phrase) come back as report text. Only faults the task
//! cannot report on, such as a program that cannot be spawned, are errors.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::action::{ChildRef, TaskAction};
use crate::core::types::{ExecOutput, Task};
use crate::io::config::ExecConfig;
use crate::io::process::{Mirror, run_command_mirrored, shell_command};
use crate::io::registry::SpawnOutcome;
use crate::io::workspace::Workspace;

/// Abstraction over task execution backends.
pub trait CommandExecutor {
    /// Perform the task's effect inside `workspace` and return its report.
    fn execute(&self, task: &Task, workspace: &mut Workspace) -> Result<ExecOutput>;
}

/// Executor that touches the real filesystem and spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    shell: Vec<String>,
    interpreter: String,
    timeout: Option<Duration>,
    mirror: Mirror,
}

impl SystemExecutor {
    pub fn new(shell: Vec<String>, interpreter: impl Into<String>) -> Self {
        Self {
            shell,
            interpreter: interpreter.into(),
            timeout: None,
            mirror: Mirror::Terminal,
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(config.shell.clone(), config.interpreter.clone())
            .with_timeout(config.command_timeout_secs.map(Duration::from_secs))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = mirror;
        self
    }

    fn run_to_completion(&self, mut cmd: Command, workspace: &Workspace) -> Result<ExecOutput> {
        cmd.current_dir(workspace.root());
        let output = run_command_mirrored(cmd, self.timeout, self.mirror)?;
        Ok(output.into_exec_output(self.timeout))
    }

    fn write_file(&self, workspace: &mut Workspace, path: &str, content: &str) -> Result<ExecOutput> {
        let resolved = match workspace.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(refused("write", path, &err)),
        };
        let shown = workspace.display_path(&resolved);
        if workspace.created().contains(&resolved) {
            warn!(path = %shown, "refusing to overwrite file created this session");
            return Ok(ExecOutput::message(format!(
                "File {shown} was already created in this session; skipped write. Use append_file to add to it."
            )));
        }
        if let Err(err) = create_parent(&resolved).and_then(|()| {
            fs::write(&resolved, content).with_context(|| format!("write {shown}"))
        }) {
            return Ok(failed(&err));
        }
        workspace.created_mut().insert(resolved);
        info!(path = %shown, bytes = content.len(), "file written");
        Ok(ExecOutput::message(format!("File {shown} written successfully")))
    }

    fn append_file(
        &self,
        workspace: &mut Workspace,
        path: &str,
        lines: &[String],
    ) -> Result<ExecOutput> {
        let resolved = match workspace.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(refused("append to", path, &err)),
        };
        let shown = workspace.display_path(&resolved);
        let existed = resolved.exists();
        let mut payload = lines.join("\n");
        if !lines.is_empty() {
            payload.push('\n');
        }
        let appended = create_parent(&resolved).and_then(|()| {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .with_context(|| format!("open {shown}"))?;
            file.write_all(payload.as_bytes())
                .with_context(|| format!("append to {shown}"))
        });
        if let Err(err) = appended {
            return Ok(failed(&err));
        }
        if !existed {
            workspace.created_mut().insert(resolved);
            return Ok(ExecOutput::message(format!(
                "File {shown} created with {} line(s)",
                lines.len()
            )));
        }
        Ok(ExecOutput::message(format!(
            "Appended {} line(s) to {shown}",
            lines.len()
        )))
    }

    fn list_files(&self, workspace: &Workspace) -> Result<ExecOutput> {
        let entries = fs::read_dir(workspace.root())
            .with_context(|| format!("list {}", workspace.root().display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.context("read directory entry")?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(ExecOutput::message(names.join("\n")))
    }

    fn read_file(&self, workspace: &Workspace, path: &str) -> Result<ExecOutput> {
        let resolved = match workspace.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(refused("read", path, &err)),
        };
        match fs::read_to_string(&resolved) {
            Ok(content) => Ok(ExecOutput::message(content)),
            Err(err) => Ok(ExecOutput::message(format!(
                "Failed to read {}: {err}",
                workspace.display_path(&resolved)
            ))),
        }
    }

    fn delete_file(&self, workspace: &mut Workspace, path: &str) -> Result<ExecOutput> {
        let resolved = match workspace.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(refused("delete", path, &err)),
        };
        let shown = workspace.display_path(&resolved);
        match fs::remove_file(&resolved) {
            Ok(()) => {
                workspace.created_mut().remove(&resolved);
                info!(path = %shown, "file deleted");
                Ok(ExecOutput::message(format!("File {shown} deleted")))
            }
            Err(err) => Ok(ExecOutput::message(format!("Failed to delete {shown}: {err}"))),
        }
    }

    fn spawn_child(&self, task: &Task, workspace: &mut Workspace, command: &str) -> Result<ExecOutput> {
        let mut cmd = shell_command(&self.shell, command)?;
        cmd.current_dir(workspace.root());
        let outcome = workspace.processes_mut().spawn_tracked(task.id, cmd)?;
        let message = match outcome {
            SpawnOutcome::Started { pid } => format!(
                "Started process {pid} for task {id}. Use \"retrieve log for task {id}\" to read its output and \"close process for task {id}\" to stop it.",
                id = task.id
            ),
            SpawnOutcome::AlreadyTracked { pid } => format!(
                "Task {} already has a running process (pid {pid}); no new process was started.",
                task.id
            ),
        };
        Ok(ExecOutput::message(message))
    }

    fn retrieve_child(&self, workspace: &mut Workspace, child: &ChildRef) -> ExecOutput {
        let Some(owner) = child.task_id else {
            return ExecOutput::message(format!(
                "Could not find a task id in \"{}\". Expected \"retrieve log for task N\".",
                child.instruction
            ));
        };
        let Some(snapshot) = workspace.processes_mut().retrieve_output(owner) else {
            return ExecOutput::message(format!("No process is tracked for task {owner}"));
        };
        let state = match snapshot.exit_code {
            None => format!("Process {} is still running.", snapshot.pid),
            Some(Some(code)) => format!("Process {} exited with code {code}.", snapshot.pid),
            Some(None) => format!("Process {} was terminated by a signal.", snapshot.pid),
        };
        ExecOutput {
            stdout: format!(
                "{state}\nstdout:\n{}\nstderr:\n{}",
                snapshot.output.stdout, snapshot.output.stderr
            ),
            stderr: snapshot.output.stderr,
        }
    }

    fn close_child(&self, workspace: &mut Workspace, child: &ChildRef) -> ExecOutput {
        let Some(owner) = child.task_id else {
            return ExecOutput::message(format!(
                "Could not find a task id in \"{}\". Expected \"close process for task N\".",
                child.instruction
            ));
        };
        if workspace.processes_mut().terminate(owner) {
            ExecOutput::message(format!("Process for task {owner} terminated"))
        } else {
            ExecOutput::message(format!("No process is tracked for task {owner}"))
        }
    }
}

impl CommandExecutor for SystemExecutor {
    #[instrument(skip_all, fields(task_id = task.id, kind = %task.kind))]
    fn execute(&self, task: &Task, workspace: &mut Workspace) -> Result<ExecOutput> {
        let action = match TaskAction::decode(task.kind, task.command.as_deref()) {
            Ok(Some(action)) => action,
            Ok(None) => return Ok(ExecOutput::message("No command to execute")),
            Err(rejection) => {
                warn!(%rejection, "stored task payload is invalid");
                return Ok(ExecOutput::message(format!("Task rejected: {rejection}")));
            }
        };
        debug!(?action, "executing task");

        match action {
            TaskAction::Shell { command } => {
                let cmd = shell_command(&self.shell, &command)?;
                self.run_to_completion(cmd, workspace)
            }
            TaskAction::Node { script } => {
                which::which(&self.interpreter)
                    .with_context(|| format!("locate interpreter {}", self.interpreter))?;
                let cmd = shell_command(&self.shell, &format!("{} {script}", self.interpreter))?;
                self.run_to_completion(cmd, workspace)
                    .with_context(|| format!("run {} {script}", self.interpreter))
            }
            TaskAction::WriteFile { path, content } => self.write_file(workspace, &path, &content),
            TaskAction::AppendFile { path, lines } => self.append_file(workspace, &path, &lines),
            TaskAction::ListFiles => self.list_files(workspace),
            TaskAction::ReadFile { path } => self.read_file(workspace, &path),
            TaskAction::DeleteFile { path } => self.delete_file(workspace, &path),
            TaskAction::SpawnChild { command } => self.spawn_child(task, workspace, &command),
            TaskAction::RetrieveChild(child) => Ok(self.retrieve_child(workspace, &child)),
            TaskAction::CloseChild(child) => Ok(self.close_child(workspace, &child)),
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

fn refused(verb: &str, path: &str, err: &anyhow::Error) -> ExecOutput {
    warn!(path, err = %err, "path refused");
    ExecOutput::message(format!("Refused to {verb} {path}: {err:#}"))
}

fn failed(err: &anyhow::Error) -> ExecOutput {
    warn!(err = %err, "file operation failed");
    ExecOutput::message(format!("Failed to {err:#}"))
}

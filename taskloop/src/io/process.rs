//! Helpers for running child processes while mirroring their output live.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ExecOutput;
use crate::io::registry::kill_descendants;

/// Where captured lines are mirrored while the child runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    /// Copy stdout/stderr lines to this process's own stdout/stderr.
    Terminal,
    /// Capture only.
    Silent,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// Interleaved stdout and stderr lines, in arrival order.
    pub combined: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Render the report sent back to the model.
    ///
    /// A non-zero exit is not a failure of the executor: it is appended as a
    /// marker so the model can decide what to do next.
    pub fn into_exec_output(self, timeout: Option<Duration>) -> ExecOutput {
        let mut stdout = self.combined;
        if self.timed_out {
            let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
            stdout.push_str(&format!("\nCommand timed out after {secs}s and was killed"));
        } else if let Some(code) = self.status.code()
            && code != 0
        {
            stdout.push_str(&format!("\nCommand exited with code {code}"));
            if !self.stderr.trim().is_empty() {
                stdout.push_str(&format!(": {}", self.stderr.trim_end()));
            }
        } else if self.status.code().is_none() {
            stdout.push_str("\nCommand terminated by signal");
        }
        ExecOutput {
            stdout,
            stderr: self.stderr,
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    combined: String,
    stderr: String,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run a command to completion, capturing and optionally mirroring its output.
///
/// Spawn failures are returned as errors (the caller's retry path); a non-zero
/// exit status is a normal result. With `timeout = None` the call blocks until
/// the child exits.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_command_mirrored(
    mut cmd: Command,
    timeout: Option<Duration>,
    mirror: Mirror,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let captured = Arc::new(Mutex::new(Captured::default()));
    let stdout_handle = {
        let captured = Arc::clone(&captured);
        thread::spawn(move || read_lines(stdout, Stream::Stdout, mirror, &captured))
    };
    let stderr_handle = {
        let captured = Arc::clone(&captured);
        thread::spawn(move || read_lines(stderr, Stream::Stderr, mirror, &captured))
    };

    let mut timed_out = false;
    let status = match timeout {
        None => child.wait().context("wait for command")?,
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                kill_descendants(child.id());
                child.kill().context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
    };

    join_reader(stdout_handle).context("join stdout")?;
    join_reader(stderr_handle).context("join stderr")?;

    let captured = std::mem::take(
        &mut *captured
            .lock()
            .map_err(|_| anyhow!("output buffer mutex poisoned"))?,
    );
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        combined: captured.combined,
        stderr: captured.stderr,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_lines<R: Read>(
    reader: R,
    stream: Stream,
    mirror: Mirror,
    captured: &Mutex<Captured>,
) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if mirror == Mirror::Terminal {
            let written = match stream {
                Stream::Stdout => std::io::stdout().write_all(&line),
                Stream::Stderr => std::io::stderr().write_all(&line),
            };
            if let Err(e) = written {
                warn!(err = %e, "failed to mirror child output");
            }
        }

        let text = String::from_utf8_lossy(&line);
        let mut guard = captured
            .lock()
            .map_err(|_| anyhow!("output buffer mutex poisoned"))?;
        guard.combined.push_str(&text);
        if let Stream::Stderr = stream {
            guard.stderr.push_str(&text);
        }
    }
    Ok(())
}

/// Build a command that runs `command_line` through the configured shell.
pub fn shell_command(shell: &[String], command_line: &str) -> Result<Command> {
    let (program, args) = shell
        .split_first()
        .ok_or_else(|| anyhow!("shell command is not configured"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).arg(command_line);
    Ok(cmd)
}

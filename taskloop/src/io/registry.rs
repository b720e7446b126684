//! Registry of long-running child processes started by `spawn_child_process`.
//!
//! Entries are keyed by the id of the task that spawned them, not by OS pid.
//! Output is accumulated line by line, without a cap, until the entry is closed.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use sysinfo::{Pid, Signal, System};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::TaskId;

/// Output accumulated so far by a tracked process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Point-in-time view of a tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub output: ProcessOutput,
    /// `None` while the process is still running.
    pub exit_code: Option<Option<i32>>,
}

/// Result of a spawn request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Started { pid: u32 },
    /// A process is already tracked for this task; nothing was started.
    AlreadyTracked { pid: u32 },
}

/// How long `terminate` waits to reap a killed child.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

struct TrackedProcess {
    child: Child,
    output: Arc<Mutex<ProcessOutput>>,
}

/// Shareable view of the pids a [`ProcessRegistry`] tracks.
///
/// The registry itself is owned by the single-threaded loop; the interrupt
/// handler holds a tracker so it can kill the same process trees before exit.
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    pids: Arc<Mutex<BTreeMap<TaskId, u32>>>,
}

impl ProcessTracker {
    pub fn pids(&self) -> Vec<u32> {
        self.lock().values().copied().collect()
    }

    /// Signal every tracked process tree and forget the pids.
    pub fn kill_all(&self) -> usize {
        let pids: Vec<u32> = std::mem::take(&mut *self.lock()).into_values().collect();
        pids.into_iter().filter(|pid| kill_tree(*pid)).count()
    }

    fn insert(&self, task_id: TaskId, pid: u32) {
        self.lock().insert(task_id, pid);
    }

    fn remove(&self, task_id: TaskId) {
        self.lock().remove(&task_id);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TaskId, u32>> {
        self.pids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
pub struct ProcessRegistry {
    entries: BTreeMap<TaskId, TrackedProcess>,
    tracker: ProcessTracker,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> ProcessTracker {
        self.tracker.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.contains_key(&task_id)
    }

    /// Launch `cmd` and start accumulating its output. Returns without waiting.
    #[instrument(skip_all, fields(task_id = task_id))]
    pub fn spawn_tracked(&mut self, task_id: TaskId, mut cmd: Command) -> Result<SpawnOutcome> {
        if let Some(existing) = self.entries.get(&task_id) {
            let pid = existing.child.id();
            warn!(task_id, pid, "process already tracked for task, refusing second spawn");
            return Ok(SpawnOutcome::AlreadyTracked { pid });
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().context("spawn tracked process")?;
        let pid = child.id();

        let output = Arc::new(Mutex::new(ProcessOutput::default()));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        spawn_accumulator(stdout, Arc::clone(&output), |out, line| {
            out.stdout.push_str(line);
        });
        spawn_accumulator(stderr, Arc::clone(&output), |out, line| {
            out.stderr.push_str(line);
        });

        info!(task_id, pid, "tracked process started");
        self.tracker.insert(task_id, pid);
        self.entries
            .insert(task_id, TrackedProcess { child, output });
        Ok(SpawnOutcome::Started { pid })
    }

    /// Output accumulated so far, or `None` if nothing is tracked for `task_id`.
    pub fn retrieve_output(&mut self, task_id: TaskId) -> Option<ProcessSnapshot> {
        let entry = self.entries.get_mut(&task_id)?;
        let exit_code = match entry.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(err) => {
                warn!(task_id, err = %err, "failed to poll tracked process");
                None
            }
        };
        let output = entry
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Some(ProcessSnapshot {
            pid: entry.child.id(),
            output,
            exit_code,
        })
    }

    /// Signal the process and all of its descendants, then forget the entry.
    ///
    /// Returns `false` when nothing is tracked for `task_id`. The killed child
    /// is reaped for at most [`REAP_TIMEOUT`].
    #[instrument(skip_all, fields(task_id = task_id))]
    pub fn terminate(&mut self, task_id: TaskId) -> bool {
        let Some(mut entry) = self.entries.remove(&task_id) else {
            return false;
        };
        self.tracker.remove(task_id);
        let pid = entry.child.id();
        let signalled = kill_descendants(pid);
        if let Err(err) = entry.child.kill() {
            debug!(task_id, pid, err = %err, "tracked process already exited");
        }
        match entry.child.wait_timeout(REAP_TIMEOUT) {
            Ok(Some(_)) => {}
            Ok(None) => warn!(task_id, pid, "killed process did not exit in time"),
            Err(err) => debug!(task_id, pid, err = %err, "failed to reap tracked process"),
        }
        info!(task_id, pid, descendants = signalled, "tracked process terminated");
        true
    }

    /// Terminate every tracked process. Returns how many were signalled.
    pub fn terminate_all(&mut self) -> usize {
        let ids: Vec<TaskId> = self.entries.keys().copied().collect();
        ids.into_iter().filter(|id| self.terminate(*id)).count()
    }
}

fn spawn_accumulator<R, F>(reader: R, output: Arc<Mutex<ProcessOutput>>, append: F)
where
    R: Read + Send + 'static,
    F: Fn(&mut ProcessOutput, &str) + Send + 'static,
{
    thread::spawn(move || {
        let mut buf_reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match buf_reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    match output.lock() {
                        Ok(mut guard) => append(&mut guard, &text),
                        Err(_) => break,
                    }
                }
                Err(err) => {
                    debug!(err = %err, "tracked process stream closed");
                    break;
                }
            }
        }
    });
}

/// Signal `pid` and its descendants. Returns whether `pid` itself was signalled.
fn kill_tree(pid: u32) -> bool {
    let descendants = kill_descendants(pid);
    let mut system = System::new();
    system.refresh_processes();
    let sent = system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.kill_with(Signal::Term).unwrap_or_else(|| process.kill()));
    debug!(pid, descendants, sent, "signalled process tree");
    sent
}

/// Send SIGTERM to every descendant of `root_pid`, deepest first.
///
/// Shell-spawned servers usually run as grandchildren, so killing the direct
/// child alone would leave them running.
pub(crate) fn kill_descendants(root_pid: u32) -> usize {
    let mut system = System::new();
    system.refresh_processes();

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut ordered = Vec::new();
    let mut frontier = vec![Pid::from_u32(root_pid)];
    while let Some(pid) = frontier.pop() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                if !ordered.contains(kid) {
                    ordered.push(*kid);
                    frontier.push(*kid);
                }
            }
        }
    }

    let mut signalled = 0;
    for pid in ordered.iter().rev() {
        let Some(process) = system.process(*pid) else {
            continue;
        };
        let sent = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        if sent {
            signalled += 1;
        } else {
            debug!(pid = pid.as_u32(), "failed to signal descendant");
        }
    }
    signalled
}

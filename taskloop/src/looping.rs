//! Multi-step driver: run steps until the queue drains or a ceiling is hit.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::io::executor::CommandExecutor;
use crate::io::model::ModelBackend;
use crate::session::Session;
use crate::step::{StepOutcome, run_step};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// No task is pending or in progress.
    Complete,
    /// The run executed `max_iterations` steps.
    MaxIterationsExceeded { max_iterations: u32 },
    /// Nothing is pending, yet `remaining` tasks are still counted as open
    /// (a task stuck `in_progress` after a store failure).
    Stalled { remaining: u64 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Run steps while they report a processed task. After the first step that
/// does not, re-check the open task count and resume if work remains.
///
/// Any step error (model failure, store read failure) stops the loop.
pub fn run_loop<M, E, F>(
    session: &mut Session,
    model: &M,
    executor: &E,
    max_iterations: u32,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    M: ModelBackend + ?Sized,
    E: CommandExecutor + ?Sized,
    F: FnMut(&StepOutcome),
{
    let mut steps_executed = 0u32;
    loop {
        if steps_executed >= max_iterations {
            warn!(max_iterations, "iteration ceiling reached, stopping");
            return Ok(LoopOutcome {
                steps_executed,
                stop: LoopStop::MaxIterationsExceeded { max_iterations },
            });
        }

        let step = run_step(session, model, executor)?;
        if step != StepOutcome::Idle {
            steps_executed += 1;
            on_step(&step);
        }
        if step.processed() {
            continue;
        }

        let remaining = session.store.pending_or_in_progress_count()?;
        debug!(remaining, ?step, "re-checking open tasks");
        if remaining == 0 {
            info!(steps_executed, "no open tasks remain");
            return Ok(LoopOutcome {
                steps_executed,
                stop: LoopStop::Complete,
            });
        }
        if step == StepOutcome::Idle {
            warn!(remaining, "open tasks remain but none is pending");
            return Ok(LoopOutcome {
                steps_executed,
                stop: LoopStop::Stalled { remaining },
            });
        }
    }
}

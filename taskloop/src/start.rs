//! Orchestration for the first model turn of a run.
//!
//! The goal is wrapped in the planning prompt and the reply is parsed like any
//! other: it contributes at most one task.

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::intake::{IntakeOutcome, intake_reply};
use crate::io::model::ModelBackend;
use crate::session::Session;

/// Send the planning message for `goal` and enqueue the first task.
pub fn start_run<M>(session: &mut Session, model: &M, goal: &str) -> Result<IntakeOutcome>
where
    M: ModelBackend + ?Sized,
{
    let goal = goal.trim();
    if goal.is_empty() {
        bail!("goal must not be empty");
    }
    info!(goal, "requesting initial plan");
    let message = session.prompts.initial_plan(goal)?;
    let reply = session
        .conversation
        .send(model, &session.store, &message)?;
    let outcome = intake_reply(&session.store, &reply);
    if !outcome.is_task() {
        warn!("initial plan produced no task");
    }
    Ok(outcome)
}

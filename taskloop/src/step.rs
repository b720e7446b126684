//! Orchestration for a single task cycle.
//!
//! One step dequeues the lowest-id pending task, executes it, reports the
//! result to the model and enqueues at most one follow-up task. A raised
//! executor error feeds the retry policy; once retries are exhausted the task
//! fails and the model receives the code of every file created so far.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::retry::RetryDecision;
use crate::core::types::{Task, TaskId, TaskStatus};
use crate::intake::intake_reply;
use crate::io::executor::CommandExecutor;
use crate::io::model::ModelBackend;
use crate::io::prompt::{CompletionFeedback, EscalationFeedback};
use crate::io::store::TaskUpdate;
use crate::session::Session;

/// Result of one `run_step` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// No pending task was found.
    Idle,
    /// The task had no command and was marked completed without a model call.
    Described { task_id: TaskId },
    /// The task ran; the model's reply produced `next`.
    Completed {
        task_id: TaskId,
        next: Option<TaskId>,
    },
    /// The executor raised; the task is pending again with `retries`.
    Retrying { task_id: TaskId, retries: u32 },
    /// Retries are exhausted; the escalation reply produced `next`.
    Failed {
        task_id: TaskId,
        retries: u32,
        next: Option<TaskId>,
    },
}

impl StepOutcome {
    /// Whether a task was successfully processed.
    pub fn processed(&self) -> bool {
        matches!(
            self,
            StepOutcome::Described { .. } | StepOutcome::Completed { .. }
        )
    }
}

/// Run one task cycle.
///
/// Model failures propagate. Store write failures are logged and the step
/// carries on with the task it holds in memory.
#[instrument(skip_all)]
pub fn run_step<M, E>(session: &mut Session, model: &M, executor: &E) -> Result<StepOutcome>
where
    M: ModelBackend + ?Sized,
    E: CommandExecutor + ?Sized,
{
    let Some(task) = session.store.next_pending()? else {
        return Ok(StepOutcome::Idle);
    };
    info!(
        task_id = task.id,
        kind = %task.kind,
        retries = task.retries,
        description = %task.description,
        "starting task"
    );
    persist(session, task.id, &TaskUpdate::status(TaskStatus::InProgress));

    if task.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
        persist(session, task.id, &TaskUpdate::status(TaskStatus::Completed));
        info!(task_id = task.id, "task has no command, marked completed");
        return Ok(StepOutcome::Described { task_id: task.id });
    }

    match executor.execute(&task, &mut session.workspace) {
        Ok(output) => {
            persist(
                session,
                task.id,
                &TaskUpdate {
                    status: TaskStatus::Completed,
                    output: Some(output.stdout.clone()),
                    error: Some(output.stderr.clone()),
                    retries: None,
                },
            );
            info!(task_id = task.id, "task completed");
            let feedback = session.prompts.completion(CompletionFeedback {
                description: &task.description,
                output: &output.stdout,
                error: &output.stderr,
            })?;
            let next = ask_for_next(session, model, &feedback)?;
            Ok(StepOutcome::Completed {
                task_id: task.id,
                next,
            })
        }
        Err(err) => handle_failure(session, model, &task, &format!("{err:#}")),
    }
}

fn handle_failure<M>(
    session: &mut Session,
    model: &M,
    task: &Task,
    error: &str,
) -> Result<StepOutcome>
where
    M: ModelBackend + ?Sized,
{
    let decision = session.policy.after_failure(task.retries);
    persist(
        session,
        task.id,
        &TaskUpdate {
            status: decision.status(),
            output: None,
            error: Some(error.to_string()),
            retries: Some(decision.retries()),
        },
    );

    match decision {
        RetryDecision::Retry { retries } => {
            warn!(task_id = task.id, retries, error, "task failed, will retry");
            Ok(StepOutcome::Retrying {
                task_id: task.id,
                retries,
            })
        }
        RetryDecision::Escalate { retries } => {
            warn!(task_id = task.id, retries, error, "task failed permanently, escalating");
            let code_context = session.workspace.code_context();
            let feedback = session.prompts.escalation(EscalationFeedback {
                description: &task.description,
                error,
                retries,
                code_context: &code_context,
            })?;
            let next = ask_for_next(session, model, &feedback)?;
            Ok(StepOutcome::Failed {
                task_id: task.id,
                retries,
                next,
            })
        }
    }
}

fn ask_for_next<M>(session: &mut Session, model: &M, message: &str) -> Result<Option<TaskId>>
where
    M: ModelBackend + ?Sized,
{
    let reply = session
        .conversation
        .send(model, &session.store, message)?;
    Ok(intake_reply(&session.store, &reply).task_id())
}

fn persist(session: &Session, task_id: TaskId, update: &TaskUpdate) {
    if let Err(err) = session.store.update_status(task_id, update) {
        warn!(task_id, status = %update.status, err = %err, "failed to persist task status");
    }
}

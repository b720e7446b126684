//! Turn a model reply into at most one persisted task.

use tracing::{debug, info, warn};

use crate::core::grammar::{ParseRejection, count_task_lines, parse_response};
use crate::core::types::{NewTask, Task, TaskId};
use crate::io::store::TaskStore;

/// What a model reply contributed to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// A task was parsed and stored.
    Enqueued(Task),
    /// A task was parsed but the store write failed.
    Unsaved(NewTask),
    /// The reply produced no task.
    Rejected(ParseRejection),
}

impl IntakeOutcome {
    /// Id of the stored task, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            IntakeOutcome::Enqueued(task) => Some(task.id),
            IntakeOutcome::Unsaved(_) | IntakeOutcome::Rejected(_) => None,
        }
    }

    pub fn is_task(&self) -> bool {
        !matches!(self, IntakeOutcome::Rejected(_))
    }
}

/// Parse `reply` and enqueue the first task line, if it is valid.
pub fn intake_reply(store: &TaskStore, reply: &str) -> IntakeOutcome {
    let lines = count_task_lines(reply);
    if lines > 1 {
        warn!(lines, "reply contains several task lines, keeping only the first");
    }

    let new_task = match parse_response(reply) {
        Ok(task) => task,
        Err(ParseRejection::NoTaskLine) => {
            debug!("reply contains no task line");
            return IntakeOutcome::Rejected(ParseRejection::NoTaskLine);
        }
        Err(rejection) => {
            warn!(%rejection, "rejected task from model reply");
            return IntakeOutcome::Rejected(rejection);
        }
    };

    match store.enqueue(&new_task) {
        Ok(task) => {
            info!(
                task_id = task.id,
                kind = %task.kind,
                description = %task.description,
                "task enqueued"
            );
            IntakeOutcome::Enqueued(task)
        }
        Err(err) => {
            warn!(err = %err, description = %new_task.description, "failed to persist task");
            IntakeOutcome::Unsaved(new_task)
        }
    }
}

//! Whole-run driver shared by the binary and the integration tests.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::retry::RetryPolicy;
use crate::intake::IntakeOutcome;
use crate::io::config::LoopConfig;
use crate::io::conversation::Conversation;
use crate::io::conversation_log::ConversationLog;
use crate::io::executor::CommandExecutor;
use crate::io::model::ModelBackend;
use crate::io::prompt::PromptEngine;
use crate::io::store::TaskStore;
use crate::io::workspace::Workspace;
use crate::looping::{LoopOutcome, run_loop};
use crate::session::Session;
use crate::start::start_run;
use crate::step::StepOutcome;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub initial: IntakeOutcome,
    pub outcome: LoopOutcome,
}

/// Open the store under `workdir` and return tasks an interrupted run left
/// `in_progress` to `pending`.
pub fn open_store(workdir: &Path, config: &LoopConfig) -> Result<Arc<TaskStore>> {
    let path = workdir.join(&config.run.store_file);
    let store =
        TaskStore::open(&path).with_context(|| format!("open task store {}", path.display()))?;
    store.requeue_in_progress()?;
    Ok(Arc::new(store))
}

/// Plan `goal` in `workspace`, then execute tasks until the loop stops.
///
/// Spawned processes still tracked at the end are terminated whether the run
/// succeeded or not. The store is left open for the caller to close.
pub fn run_goal<M, E, F>(
    workspace: Workspace,
    config: &LoopConfig,
    store: Arc<TaskStore>,
    goal: &str,
    model: &M,
    executor: &E,
    on_step: F,
) -> Result<RunReport>
where
    M: ModelBackend + ?Sized,
    E: CommandExecutor + ?Sized,
    F: FnMut(&StepOutcome),
{
    let prompts = PromptEngine::new()?;
    let system = prompts.system_instruction()?;
    let conversation = Conversation::new(system, config.run.history_window)
        .with_log(ConversationLog::new(workspace.root().join(&config.run.log_file)));
    let mut session = Session {
        store,
        workspace,
        conversation,
        prompts,
        policy: RetryPolicy {
            max_retries: config.run.max_retries,
        },
    };

    let result = start_run(&mut session, model, goal).and_then(|initial| {
        let outcome = run_loop(
            &mut session,
            model,
            executor,
            config.run.max_iterations,
            on_step,
        )?;
        Ok(RunReport { initial, outcome })
    });

    let terminated = session.workspace.shutdown();
    if terminated > 0 {
        info!(terminated, "terminated spawned processes");
    }
    result
}

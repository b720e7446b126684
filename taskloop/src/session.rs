//! Explicit per-run context shared by the orchestration steps.

use std::sync::Arc;

use crate::core::retry::RetryPolicy;
use crate::io::conversation::Conversation;
use crate::io::prompt::PromptEngine;
use crate::io::store::TaskStore;
use crate::io::workspace::Workspace;

/// Everything a step reads or mutates, besides the model and the executor.
pub struct Session {
    pub store: Arc<TaskStore>,
    pub workspace: Workspace,
    pub conversation: Conversation,
    pub prompts: PromptEngine,
    pub policy: RetryPolicy,
}

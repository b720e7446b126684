//! Stateful chat session with the model.

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::history::bounded_window;
use crate::core::types::ConversationTurn;
use crate::io::conversation_log::ConversationLog;
use crate::io::model::ModelBackend;
use crate::io::store::TaskStore;

/// In-memory history plus its durable copies (store history and audit log).
pub struct Conversation {
    system: String,
    turns: Vec<ConversationTurn>,
    window: usize,
    log: Option<ConversationLog>,
}

impl Conversation {
    pub fn new(system: impl Into<String>, window: usize) -> Self {
        Self {
            system: system.into(),
            turns: Vec::new(),
            window,
            log: None,
        }
    }

    pub fn with_log(mut self, log: ConversationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Send `message` with the bounded history and record both turns.
    ///
    /// Model failures propagate. Store and log failures are only logged.
    pub fn send<M>(&mut self, model: &M, store: &TaskStore, message: &str) -> Result<String>
    where
        M: ModelBackend + ?Sized,
    {
        let history = bounded_window(&self.turns, self.window);
        if let Some(log) = &self.log
            && let Err(err) = log.append_request(&history, message)
        {
            warn!(err = %err, "failed to write conversation log");
        }

        debug!(replayed = history.len(), total = self.turns.len(), "sending message");
        let reply = model.generate(&self.system, &history, message)?;

        self.record(store, ConversationTurn::user(message));
        self.record(store, ConversationTurn::model(reply.clone()));
        if let Some(log) = &self.log
            && let Err(err) = log.append_response(&reply)
        {
            warn!(err = %err, "failed to write conversation log");
        }
        Ok(reply)
    }

    fn record(&mut self, store: &TaskStore, turn: ConversationTurn) {
        if let Err(err) = store.append_history(turn.role, &turn.message) {
            warn!(err = %err, role = turn.role.as_str(), "failed to persist conversation turn");
        }
        self.turns.push(turn);
    }
}

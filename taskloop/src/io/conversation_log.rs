//! Append-only audit log of every model exchange (`llm_log.txt`).
//!
//! This is product output, written regardless of `RUST_LOG`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::ConversationTurn;

#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
}

impl ConversationLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the history replayed for a request and the new user message.
    pub fn append_request(&self, history: &[ConversationTurn], message: &str) -> Result<()> {
        let history_json =
            serde_json::to_string_pretty(history).context("serialize conversation history")?;
        self.append(&format!(
            "\nHistory:\n{history_json}\n\nUser:\n{message}\n"
        ))
    }

    pub fn append_response(&self, response: &str) -> Result<()> {
        self.append(&format!("\nModel:\n{response}\n"))
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("write {}", self.path.display()))
    }
}

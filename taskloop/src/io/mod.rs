//! Side-effecting adapters used by the orchestration modules.

pub mod config;
pub mod conversation;
pub mod conversation_log;
pub mod executor;
pub mod model;
pub mod process;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod workspace;

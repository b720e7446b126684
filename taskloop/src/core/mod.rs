//! Deterministic, pure logic shared by the task loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (model text, task records, history turns) and return deterministic
//! outputs suitable for tests.

pub mod action;
pub mod grammar;
pub mod history;
pub mod path;
pub mod retry;
pub mod types;

//! LLM-driven task execution loop.
//!
//! A model is given a project goal and replies with one task at a time. Each
//! task is parsed, persisted, executed in a working directory and reported
//! back until the model stops proposing work. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure logic (task grammar, payload decoding, retry policy,
//!   history window, path confinement). No I/O.
//! - **[`io`]**: Side effects (SQLite store, processes, filesystem, model HTTP
//!   client, prompts, config). Behind traits where tests need doubles.
//!
//! Orchestration modules ([`intake`], [`step`], [`looping`], [`start`],
//! [`run`]) combine the two around an explicit [`session::Session`].

pub mod core;
pub mod exit_codes;
pub mod intake;
pub mod io;
pub mod logging;
pub mod looping;
pub mod run;
pub mod session;
pub mod shutdown;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

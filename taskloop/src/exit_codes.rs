//! Stable exit codes for the `taskloop` binary.

/// The run finished (or `taskloop tasks` printed the store).
pub const OK: i32 = 0;
/// Startup failed: bad arguments, config, credentials or goal.
pub const INVALID: i32 = 1;
/// The run aborted on an uncaught fault (e.g. a failed model request).
pub const FAULT: i32 = 2;
/// The process was interrupted by Ctrl-C.
pub const INTERRUPTED: i32 = 130;

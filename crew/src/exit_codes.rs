//! Stable exit codes for crew CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, bindings or templates, or any other error before a stage ran.
pub const INVALID: i32 = 1;
/// A pipeline stage failed; the run produced no output.
pub const FAILED: i32 = 2;
/// The run was cancelled (Ctrl-C) before completing.
pub const CANCELLED: i32 = 3;

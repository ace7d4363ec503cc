//! Stable exit codes for research CLI commands.

/// Command succeeded: the run completed and verification passed.
pub const OK: i32 = 0;
/// Command failed: invalid input/config, a stage failure, or an interactive
/// clarification that produced no usable answer.
pub const INVALID: i32 = 1;
/// Non-interactive run needs clarification answers before it can proceed.
pub const CLARIFICATION_REQUIRED: i32 = 2;
/// The run finished its audit but structural verification failed.
pub const VERIFICATION_FAILED: i32 = 3;

//! Stable exit codes for the `bulk` CLI.

/// The batch ran to completion (individual items may still have failed).
pub const OK: i32 = 0;
/// Invalid arguments, directories or configuration; nothing was scheduled.
pub const INVALID: i32 = 1;

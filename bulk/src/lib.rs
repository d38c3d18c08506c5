//! Batch orchestration for motion-capture solver and calibration runs.
//!
//! The numerical work is done by external tools; this crate discovers input
//! files, expands configuration tuples, mirrors the output layout and runs
//! every (file × configuration) pair on a bounded worker pool with a retry
//! sweep. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (filtering, expansion, layout, retry).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (scanning, directories, processes,
//!   config, the run log). Collaborators sit behind traits for tests.
//!
//! Orchestration modules ([`pool`], [`task`], [`batch`]) coordinate core logic
//! with I/O to implement the CLI variants.

pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pool;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

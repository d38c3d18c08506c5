//! Deterministic, pure logic shared by the batch driver.
//!
//! Core modules must be free of I/O side effects. They operate on paths and
//! in-memory values and return deterministic outputs suitable for tests.

pub mod expand;
pub mod filter;
pub mod layout;
pub mod retry;
pub mod types;

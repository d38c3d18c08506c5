//! I/O helpers for batch runs.

pub mod collaborator;
pub mod config;
pub mod output_dir;
pub mod prepare;
pub mod process;
pub mod report;
pub mod run_log;
pub mod scan;

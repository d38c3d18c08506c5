//! Batch report written to the output root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::BatchReport;

pub const REPORT_FILE: &str = "report.json";

/// Serialize `report` to `<output_root>/report.json` (pretty, trailing newline).
pub fn write_report(output_root: &Path, report: &BatchReport) -> Result<PathBuf> {
    let path = output_root.join(REPORT_FILE);
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

//! Setup files staged into result directories before the solve phase.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Copy each of `files` (relative to `models_dir`) into `dir`, keeping file names.
pub fn copy_setup_files(models_dir: &Path, files: &[String], dir: &Path) -> Result<()> {
    for file in files {
        let source = models_dir.join(file);
        let name = source
            .file_name()
            .with_context(|| format!("setup file {} has no file name", source.display()))?;
        let target = dir.join(name);
        fs::copy(&source, &target).with_context(|| {
            format!("copy {} to {}", source.display(), target.display())
        })?;
    }
    Ok(())
}

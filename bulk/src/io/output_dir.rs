//! Result directory creation.

use std::fs;
use std::path::Path;

use crate::core::layout::LayoutError;

/// Create `dir` and its parents. Safe to call concurrently for the same path:
/// losing a creation race is success as long as a directory ends up there.
pub fn ensure(dir: &Path) -> Result<(), LayoutError> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(source) => Err(LayoutError::CreateDirectoryFailed {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

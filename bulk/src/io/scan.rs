//! Recursive discovery of candidate input files.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// Lazily enumerate every regular file under `root`.
///
/// Symlinks are neither followed nor yielded. Entries that cannot be read
/// mid-walk are reported and skipped.
pub fn scan(root: &Path) -> Result<impl Iterator<Item = PathBuf> + use<>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    debug!(root = %root.display(), "scanning input tree");
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    Ok(walker.filter_map(|entry| match entry {
        Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
        Ok(_) => None,
        Err(err) => {
            warn!(err = %err, "skipping unreadable entry");
            None
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;

    #[test]
    fn visits_every_regular_file_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("08/walk")).expect("mkdir");
        fs::create_dir_all(root.join("09/run/deep/er")).expect("mkdir");
        fs::write(root.join("top.txt"), "").expect("write");
        fs::write(root.join("08/walk/a.sto"), "").expect("write");
        fs::write(root.join("09/run/deep/er/b.sto"), "").expect("write");

        let found: Vec<PathBuf> = scan(root).expect("scan").collect();
        let unique: BTreeSet<&PathBuf> = found.iter().collect();
        assert_eq!(found.len(), 3);
        assert_eq!(unique.len(), 3);
        assert!(found.contains(&root.join("09/run/deep/er/b.sto")));
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(scan(temp.path()).expect("scan").count(), 0);
    }

    #[test]
    fn rejects_files_and_missing_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("f.sto");
        fs::write(&file, "").expect("write");
        assert!(matches!(scan(&file), Err(ScanError::NotADirectory(_))));
        assert!(matches!(
            scan(&temp.path().join("missing")),
            Err(ScanError::NotADirectory(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_yielded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("real.sto"), "").expect("write");
        std::os::unix::fs::symlink(root.join("real.sto"), root.join("link.sto"))
            .expect("symlink");
        let found: Vec<PathBuf> = scan(root).expect("scan").collect();
        assert_eq!(found, vec![root.join("real.sto")]);
    }
}

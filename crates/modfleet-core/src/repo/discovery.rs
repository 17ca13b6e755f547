//! Candidate repository enumeration.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::error::Result;

/// List the top-level entries of every search directory.
///
/// With no directories the current directory is searched. Hidden entries
/// are skipped; the result is sorted for stable discovery order.
pub fn discover_candidates(directories: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let current = [PathBuf::from(".")];
    let directories = if directories.is_empty() {
        &current[..]
    } else {
        directories
    };

    let mut candidates = Vec::new();
    for directory in directories {
        let mut entries = Vec::new();
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden {
                entries.push(entry.path());
            }
        }
        entries.sort();
        candidates.extend(entries);
    }
    Ok(candidates)
}

/// A directory is a repository when it contains `.git`.
pub fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_visible_entries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha", ".hidden"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let found = discover_candidates(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("alpha"), dir.path().join("zeta")]
        );
    }

    #[test]
    fn test_concatenates_search_directories() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::create_dir(first.path().join("b")).unwrap();
        fs::create_dir(second.path().join("a")).unwrap();

        let found =
            discover_candidates(&[first.path().to_path_buf(), second.path().to_path_buf()])
                .unwrap();
        assert_eq!(found, vec![first.path().join("b"), second.path().join("a")]);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_candidates(&[dir.path().join("nope")]).is_err());
    }

    #[test]
    fn test_repository_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_repository(dir.path()));
        fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(is_repository(dir.path()));
    }
}

//! Filesystem helpers shared by the fetch, expand and clip steps.
//!
//! Artifacts are always produced under a sibling temporary name and renamed into
//! place, so the presence of the final path alone marks a completed step.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix marking an incomplete file.
pub const PART_SUFFIX: &str = ".part";

/// Suffix marking an incomplete extraction directory.
pub const PARTIAL_DIR_SUFFIX: &str = ".partial";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `roads.zip` -> `roads.zip.part`.
#[must_use]
pub fn part_path(path: &Path) -> PathBuf {
    with_suffix(path, PART_SUFFIX)
}

/// `data/roads` -> `data/roads.partial`.
#[must_use]
pub fn partial_dir(path: &Path) -> PathBuf {
    with_suffix(path, PARTIAL_DIR_SUFFIX)
}

/// Move a finished temporary file over `target`, then sync the parent directory.
///
/// # Errors
///
/// Returns the rename error.
pub fn replace_atomically(temp: &Path, target: &Path) -> io::Result<()> {
    fs::rename(temp, target)?;
    if let Some(parent) = target.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Returns `true` if `path` is a directory with at least one entry.
#[must_use]
pub fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}

/// Create the parent directory of `path` if it has one.
///
/// # Errors
///
/// Returns the `create_dir_all` error.
pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_part_path_keeps_extension() {
        assert_eq!(
            part_path(Path::new("data/pop.tif")),
            PathBuf::from("data/pop.tif.part")
        );
        assert_eq!(
            partial_dir(Path::new("data/roads")),
            PathBuf::from("data/roads.partial")
        );
    }

    #[test]
    fn test_is_non_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_non_empty_dir(temp_dir.path()));
        fs::write(temp_dir.path().join("x"), b"1").unwrap();
        assert!(is_non_empty_dir(temp_dir.path()));
        assert!(!is_non_empty_dir(&temp_dir.path().join("x")));
        assert!(!is_non_empty_dir(&temp_dir.path().join("missing")));
    }

    #[test]
    fn test_replace_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.geojson");
        let temp = part_path(&target);
        fs::write(&temp, b"{}").unwrap();

        replace_atomically(&temp, &target).unwrap();
        assert!(target.exists());
        assert!(!temp.exists());
    }
}

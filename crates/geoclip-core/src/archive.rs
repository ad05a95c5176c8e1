//! Zip archive expansion.
//!
//! `data/roads.zip` expands into `data/roads/`. The members are first written to
//! `data/roads.partial/`, which is renamed into place after the last member, so a
//! non-empty extraction directory always holds a complete archive.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info};
use zip::ZipArchive;

use crate::error::{ClipError, IoResultExt, Result};
use crate::paths::{is_non_empty_dir, partial_dir};

/// Directory an archive expands into: the archive path without its extension.
#[must_use]
pub fn extraction_dir(archive: &Path) -> PathBuf {
    archive.with_extension("")
}

/// Expand `archive` next to itself and return the extraction directory.
///
/// Does nothing when the directory already exists and is non-empty.
///
/// # Errors
///
/// Returns [`ClipError::CorruptArchive`] if the archive cannot be parsed or holds a
/// member whose path escapes the extraction directory, and [`ClipError::Io`] for
/// filesystem failures.
pub fn expand(archive: &Path) -> Result<PathBuf> {
    let target = extraction_dir(archive);
    if is_non_empty_dir(&target) {
        debug!("{} already expanded", archive.display());
        return Ok(target);
    }

    let staging = partial_dir(&target);
    if staging.exists() {
        fs::remove_dir_all(&staging).with_path(&staging)?;
    }
    fs::create_dir_all(&staging).with_path(&staging)?;

    if let Err(e) = extract_into(archive, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if target.exists() {
        fs::remove_dir_all(&target).with_path(&target)?;
    }
    fs::rename(&staging, &target).with_path(&target)?;
    info!("Expanded {} into {}", archive.display(), target.display());
    Ok(target)
}

fn extract_into(archive: &Path, staging: &Path) -> Result<usize> {
    let corrupt = |reason: String| ClipError::CorruptArchive {
        path: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive).with_path(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;

    let mut files = 0;
    for index in 0..zip.len() {
        let mut member = zip.by_index(index).map_err(|e| corrupt(e.to_string()))?;
        let relative = member
            .enclosed_name()
            .ok_or_else(|| corrupt(format!("unsafe member path '{}'", member.name())))?;
        let out_path = staging.join(relative);

        if member.is_dir() {
            fs::create_dir_all(&out_path).with_path(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        let mut out = File::create(&out_path).with_path(&out_path)?;
        io::copy(&mut member, &mut out).map_err(|e| corrupt(e.to_string()))?;
        files += 1;
    }
    debug!("Extracted {files} file(s) from {}", archive.display());
    Ok(files)
}

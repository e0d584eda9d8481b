use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use tempfile::Builder;

use crate::error::CurateError;

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CurateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Copy a dataset-level file only when the destination does not already
/// have it. Returns true when a copy happened.
pub fn copy_file_if_absent(source: &Utf8Path, dest: &Utf8Path) -> Result<bool, CurateError> {
    if dest.as_std_path().is_file() {
        return Ok(false);
    }
    if !source.as_std_path().is_file() {
        return Err(CurateError::MissingFile(source.to_path_buf()));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    }
    fs::copy(source.as_std_path(), dest.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    Ok(true)
}

pub fn copy_dir_recursive(source: &Utf8Path, dest: &Utf8Path) -> Result<(), CurateError> {
    fs::create_dir_all(dest.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    for entry in walk_dir(source.as_std_path())? {
        let relative = entry
            .strip_prefix(source.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
        let target = dest.as_std_path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| CurateError::Filesystem(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| CurateError::Filesystem(err.to_string()))?;
            }
            fs::copy(entry, &target).map_err(|err| CurateError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

/// Copy a subtree through a sibling temp directory so a partially
/// written destination is never observable.
pub fn copy_dir_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), CurateError> {
    if !source.as_std_path().is_dir() {
        return Err(CurateError::MissingDirectory(source.to_path_buf()));
    }
    let parent = dest
        .parent()
        .ok_or_else(|| CurateError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    let temp_dir = Builder::new()
        .prefix("bids-curator-copy")
        .tempdir_in(parent.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    let temp_path = camino::Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf())
        .map_err(|_| CurateError::Filesystem("invalid temp dir".to_string()))?;
    copy_dir_recursive(source, &temp_path)?;
    atomic_rename_dir(temp_dir.keep().as_path(), dest.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, CurateError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| CurateError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| CurateError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

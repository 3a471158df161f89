use std::path::{Component, Path};

use crate::StorageError;

/// Directory under each file's path that holds its chunk files. Reserved:
/// no filename component may use it.
pub(crate) const CHUNK_DIR: &str = ".chunks";

/// Validates that a filename maps to a path under the store root.
///
/// Filenames may contain `/` separators (they become nested directories)
/// but must not be empty, absolute, contain `..`, a drive prefix, NUL bytes
/// or a `.chunks` component.
pub fn validate_filename(filename: &str) -> Result<(), StorageError> {
    if filename.contains('\0') {
        return Err(StorageError::InvalidName(format!(
            "NUL byte not allowed: {filename:?}"
        )));
    }

    // Reject Windows drive and UNC prefixes regardless of host platform.
    if filename.len() >= 2 && filename.as_bytes()[1] == b':' {
        return Err(StorageError::InvalidName(format!(
            "drive prefix not allowed: {filename}"
        )));
    }
    if filename.starts_with("\\\\") {
        return Err(StorageError::InvalidName(format!(
            "UNC path not allowed: {filename}"
        )));
    }

    let path = Path::new(filename);
    if path.is_absolute() {
        return Err(StorageError::InvalidName(format!(
            "absolute path not allowed: {filename}"
        )));
    }

    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(StorageError::InvalidName(format!(
                    "parent directory traversal not allowed: {filename}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(StorageError::InvalidName(format!(
                    "path prefix not allowed: {filename}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(part) if part == CHUNK_DIR => {
                return Err(StorageError::InvalidName(format!(
                    "reserved component {CHUNK_DIR:?} not allowed: {filename}"
                )));
            }
            Component::Normal(_) => normal += 1,
        }
    }

    if normal == 0 {
        return Err(StorageError::InvalidName(format!(
            "empty filename: {filename:?}"
        )));
    }

    Ok(())
}

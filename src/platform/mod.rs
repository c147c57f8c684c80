//! Deletion helpers that survive read-only trees unpacked from archives.

#[cfg(target_os = "windows")]
pub mod windows;

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Deletes a single file (or symlink). Widens permissions and retries once
/// if the first attempt is denied.
pub fn delete_file(path: &Path) -> Result<()> {
    try_fs_operation(path, |p| fs::remove_file(p)).map_err(|source| Error::Delete {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively deletes a directory. Widens permissions and retries once if
/// the first attempt is denied.
pub fn delete_directory(path: &Path) -> Result<()> {
    try_fs_operation(path, |p| fs::remove_dir_all(p)).map_err(|source| Error::Delete {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs `operation` on `path`. If it is denied, widens permissions and
/// tries exactly once more.
pub fn try_fs_operation<F>(path: &Path, operation: F) -> io::Result<()>
where
    F: Fn(&Path) -> io::Result<()>,
{
    match operation(path) {
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Permission denied on {}, widening permissions", path.display());
            lift_permissions(path)?;
            operation(path)
        }
        result => result,
    }
}

#[cfg(not(target_os = "windows"))]
fn lift_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    // Removing an entry needs write access on its parent as well.
    if let Some(parent) = path.parent() {
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o755));
    }
    for entry in walkdir::WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.path_is_symlink() {
            continue;
        }
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn lift_permissions(path: &Path) -> io::Result<()> {
    windows::clear_readonly(path)
}

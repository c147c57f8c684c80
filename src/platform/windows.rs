use std::fs;
use std::io;
use std::path::Path;

/// Clears the read-only attribute on `path` and, for directories, everything
/// beneath it.
pub fn clear_readonly(path: &Path) -> io::Result<()> {
    for entry in walkdir::WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let mut permissions = entry.metadata().map_err(io::Error::from)?.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(entry.path(), permissions)?;
        }
    }
    Ok(())
}

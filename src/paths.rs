use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;

use crate::error::Result;
use crate::platform;

/// A file system entry addressed by a relative path under one of several
/// source roots (the read-only input tree or the scratch tree).
///
/// Only the relative path identifies the logical file. The source root is used
/// to locate it absolutely, so the same logical file can be asked about under
/// a different root with [`Entry::exists_in`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    source: PathBuf,
    relative: PathBuf,
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

impl Entry {
    /// # Panics
    ///
    /// Panics if `relative` is absolute.
    pub fn new(source: impl AsRef<Path>, relative: impl AsRef<Path>) -> Self {
        let relative = relative.as_ref();
        assert!(
            !relative.has_root(),
            "Relative path cannot be absolute: {}",
            relative.display()
        );
        Self {
            source: normalize(source.as_ref()),
            relative: normalize(relative),
        }
    }

    /// Entry at the root of `source` (empty relative path).
    pub fn root(source: impl AsRef<Path>) -> Self {
        Self::new(source, "")
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Returns a new entry with `name` appended to the relative path.
    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        Self::new(&self.source, self.relative.join(name))
    }

    /// Appends `name` to this entry's relative path in place.
    pub fn push(&mut self, name: impl AsRef<Path>) {
        let joined = self.relative.join(name);
        assert!(!joined.has_root(), "Cannot append an absolute path");
        self.relative = normalize(&joined);
    }

    /// Same relative path, different source root.
    pub fn with_source(&self, source: impl AsRef<Path>) -> Self {
        Self::new(source, &self.relative)
    }

    pub fn abspath(&self) -> PathBuf {
        if self.relative.as_os_str().is_empty() {
            self.source.clone()
        } else {
            self.source.join(&self.relative)
        }
    }

    pub fn absdirpath(&self) -> PathBuf {
        let abs = self.abspath();
        abs.parent().map(Path::to_path_buf).unwrap_or(abs)
    }

    pub fn reldirpath(&self) -> PathBuf {
        self.relative
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Forward-slash form of the relative path. Scan cursors compare these
    /// strings byte-wise, so the separator must be stable across platforms.
    pub fn rel_str(&self) -> String {
        self.relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::CurDir => Some(".".to_string()),
                Component::ParentDir => Some("..".to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn basename(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Base name without its last extension.
    pub fn filename(&self) -> String {
        self.relative
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Last extension including the leading period, or an empty string.
    pub fn extension(&self) -> String {
        self.relative
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        fs::symlink_metadata(self.abspath()).is_ok()
    }

    pub fn exists_in(&self, source: impl AsRef<Path>) -> bool {
        self.with_source(source).exists()
    }

    pub fn is_link(&self) -> bool {
        fs::symlink_metadata(self.abspath())
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    pub fn is_dir(&self) -> bool {
        self.abspath().is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.abspath().is_file()
    }

    /// Modification time in whole seconds since the epoch (negative before 1970).
    pub fn modified_secs(&self) -> std::io::Result<i64> {
        let metadata = fs::metadata(self.abspath())?;
        Ok(FileTime::from_last_modification_time(&metadata).unix_seconds())
    }

    /// Deletes whatever this entry points at. The entry itself is unchanged and
    /// still refers to the same location. A missing entry counts as deleted.
    pub fn delete(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let abs = self.abspath();
        if self.is_dir() && !self.is_link() {
            platform::delete_directory(&abs)
        } else {
            platform::delete_file(&abs)
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abspath().display())
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};

use super::{is_supported_archive, Extractor, UnzipError};
use crate::platform;

/// Lazy, single-pass sequence of the plain files produced by an extraction.
///
/// Each call to `next` advances the walk until it either reaches a plain file
/// (stamped with the outer archive's modification time and yielded) or a
/// nested archive fails to unpack (yielded as an error). Nested archives are
/// unpacked beside themselves and then deleted.
#[derive(Debug)]
pub struct ExtractedFiles {
    root: PathBuf,
    pending: Vec<PathBuf>,
    archive_mtime: FileTime,
    extractor: Extractor,
    nested_archives: usize,
}

impl ExtractedFiles {
    pub(super) fn new(root: PathBuf, archive_mtime: FileTime, extractor: Extractor) -> Self {
        Self {
            pending: vec![root.clone()],
            root,
            archive_mtime,
            extractor,
            nested_archives: 0,
        }
    }

    /// The file or directory the outermost archive unpacked into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of nested archives unpacked so far.
    pub fn nested_archives(&self) -> usize {
        self.nested_archives
    }

    fn push_children(&mut self, dir: &Path) -> Result<(), UnzipError> {
        let mut children: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        // Reverse order so the stack pops children alphabetically.
        children.sort();
        children.reverse();
        self.pending.extend(children);
        Ok(())
    }

    fn unpack_nested(&mut self, archive: &Path) -> Result<(), UnzipError> {
        let parent = archive.parent().unwrap_or(Path::new("")).to_path_buf();
        let unpacked = self.extractor.unpack_one(archive, &parent);
        if let Err(err) = platform::delete_file(archive) {
            warn!("Could not delete nested archive {}: {}", archive.display(), err);
            return Err(UnzipError::Cleanup {
                path: archive.to_path_buf(),
                reason: err.to_string(),
            });
        }
        let output = unpacked?;
        self.nested_archives += 1;
        self.pending.push(output);
        Ok(())
    }

    fn stamp(&self, file: &Path) -> Result<(), UnzipError> {
        let mtime = self.archive_mtime;
        platform::try_fs_operation(file, |p| filetime::set_file_mtime(p, mtime)).map_err(
            |source| {
                warn!("Set mod time failed, skipping file: {}", file.display());
                if let Err(err) = platform::delete_file(file) {
                    warn!("Could not delete {}: {}", file.display(), err);
                }
                UnzipError::SetModTime {
                    path: file.to_path_buf(),
                    source,
                }
            },
        )
    }
}

impl Iterator for ExtractedFiles {
    type Item = Result<PathBuf, UnzipError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(path) = self.pending.pop() {
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => return Some(Err(err.into())),
            };

            if metadata.file_type().is_symlink() {
                debug!("Skipping extracted symlink {}", path.display());
                continue;
            }

            if metadata.is_dir() {
                if let Err(err) = self.push_children(&path) {
                    return Some(Err(err));
                }
                continue;
            }

            if is_supported_archive(&path) {
                if let Err(err) = self.unpack_nested(&path) {
                    return Some(Err(err));
                }
                continue;
            }

            return Some(self.stamp(&path).map(|_| path));
        }
        None
    }
}

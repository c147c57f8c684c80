//! Recursive extraction of support-bundle archives.
//!
//! [`Extractor::recursive_unzip`] unpacks one archive next to a destination
//! and returns an [`ExtractedFiles`] iterator. Walking the iterator unpacks
//! any nested archives in place and yields the plain files one at a time.

mod extract;
mod walk;

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use thiserror::Error;
use tracing::{debug, warn};

pub use walk::ExtractedFiles;

/// Archive extensions that are unpacked rather than indexed.
pub const SUPPORTED_FILE_TYPES: [&str; 5] = [".gz", ".tgz", ".tar", ".zip", ".7z"];

/// A recoverable extraction failure. The archive is skipped and the run
/// carries on.
#[derive(Error, Debug)]
pub enum UnzipError {
    #[error("This path was already unzipped: {0}")]
    AlreadyUnpacked(PathBuf),

    #[error("Get mod time failed for {path}: {source}")]
    ModTime {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Set mod time failed for {path}: {source}")]
    SetModTime {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to unpack {archive}: {reason}")]
    Corrupt { archive: PathBuf, reason: String },

    #[error("{program} failed on {archive}: {reason}")]
    Tool {
        program: String,
        archive: PathBuf,
        reason: String,
    },

    #[error("Could not remove {path}: {reason}")]
    Cleanup { path: PathBuf, reason: String },

    #[error("IO error during extraction: {0}")]
    Io(#[from] io::Error),
}

/// Extension of the last path component including the period, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

pub fn is_supported_archive(path: &Path) -> bool {
    SUPPORTED_FILE_TYPES.contains(&extension_of(path).as_str())
}

/// Strips one archive extension. Paths without one come back unchanged.
pub fn strip_zip_ext(path: &str) -> String {
    let ext = extension_of(Path::new(path));
    if SUPPORTED_FILE_TYPES.contains(&ext.as_str()) && path.ends_with(&ext) {
        path[..path.len() - ext.len()].to_string()
    } else {
        path.to_string()
    }
}

/// Strips archive extensions until none is left.
pub fn strip_all_zip_exts(path: &str) -> String {
    let mut current = path.to_string();
    loop {
        let stripped = strip_zip_ext(&current);
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    seven_zip_program: String,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            seven_zip_program: "7z".to_string(),
        }
    }
}

impl Extractor {
    pub fn new(seven_zip_program: impl Into<String>) -> Self {
        Self {
            seven_zip_program: seven_zip_program.into(),
        }
    }

    pub fn seven_zip_program(&self) -> &str {
        &self.seven_zip_program
    }

    /// Unpacks `src` into `dest/<basename without its archive extension>`.
    ///
    /// The source archive is never modified. Nested archives are unpacked
    /// lazily as the returned iterator is consumed, and every yielded file
    /// carries the modification time of `src`.
    ///
    /// # Panics
    ///
    /// Panics if `src` is missing, is not a file or has an unsupported
    /// extension.
    pub fn recursive_unzip(&self, src: &Path, dest: &Path) -> Result<ExtractedFiles, UnzipError> {
        assert!(src.exists(), "Source does not exist: {}", src.display());
        assert!(src.is_file(), "Source should be a file: {}", src.display());
        assert!(
            is_supported_archive(src),
            "Invalid extension: {}",
            src.display()
        );
        let src = absolute(src)?;
        let dest = absolute(dest)?;
        fs::create_dir_all(&dest)?;

        let archive_mtime = fs::metadata(&src)
            .map(|m| FileTime::from_last_modification_time(&m))
            .map_err(|source| {
                warn!("Get mod time failed, skipping zipped file: {}", src.display());
                UnzipError::ModTime {
                    path: src.clone(),
                    source,
                }
            })?;

        let output = self.unpack_one(&src, &dest)?;
        Ok(ExtractedFiles::new(output, archive_mtime, self.clone()))
    }

    /// Unpacks a single archive layer and returns the path it produced.
    fn unpack_one(&self, src: &Path, dest: &Path) -> Result<PathBuf, UnzipError> {
        let basename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = dest.join(strip_zip_ext(&basename));

        if fs::symlink_metadata(&output).is_ok() {
            warn!("This path was already unzipped: {}", output.display());
            return Err(UnzipError::AlreadyUnpacked(output));
        }

        debug!("Unpacking: {}", src.display());
        let result = match extension_of(src).as_str() {
            ".zip" => extract::extract_zip(src, dest, &output),
            ".tar" => extract::extract_tar(src, &output, false),
            ".tgz" => extract::extract_tar(src, &output, true),
            ".gz" => extract::extract_gz(src, &output),
            ".7z" => extract::extract_7z(&self.seven_zip_program, src, &output),
            other => Err(UnzipError::Corrupt {
                archive: src.to_path_buf(),
                reason: format!("unsupported extension {other:?}"),
            }),
        };

        if let Err(err) = result {
            tracing::error!("Error while unpacking {}: {}", src.display(), err);
            remove_partial_output(&output);
            return Err(err);
        }
        Ok(output)
    }
}

/// Unpacks `src` into `dest` with the default 7z program name.
pub fn recursive_unzip(src: &Path, dest: &Path) -> Result<ExtractedFiles, UnzipError> {
    Extractor::default().recursive_unzip(src, dest)
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

fn remove_partial_output(output: &Path) {
    let Ok(metadata) = fs::symlink_metadata(output) else {
        return;
    };
    let removed = if metadata.is_dir() {
        crate::platform::delete_directory(output)
    } else {
        crate::platform::delete_file(output)
    };
    if let Err(err) = removed {
        warn!("Could not remove partial output {}: {}", output.display(), err);
    }
}

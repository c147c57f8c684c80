use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use flate2::read::{GzDecoder, MultiGzDecoder};
use tracing::debug;

use super::UnzipError;

fn corrupt(archive: &Path, reason: impl ToString) -> UnzipError {
    UnzipError::Corrupt {
        archive: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Extracts a zip into `output`. A zip that holds nothing but an entry of the
/// same name as the output (`d.tar.zip` holding `d.tar`) is flattened so the
/// entry itself ends up at `output`.
pub(super) fn extract_zip(src: &Path, dest: &Path, output: &Path) -> Result<(), UnzipError> {
    fs::create_dir_all(output)?;

    let file = File::open(src)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(src, e))?;
    archive.extract(output).map_err(|e| corrupt(src, e))?;

    let Some(output_name) = output.file_name() else {
        return Ok(());
    };
    let children: Vec<_> = fs::read_dir(output)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect();

    if children.len() == 1 && children[0] == output_name {
        let lone_child = output.join(output_name);
        let mut temp_name = output_name.to_os_string();
        temp_name.push(".zip.zip.zip");
        let temp = dest.join(temp_name);

        debug!("Hoisting lone zip entry {}", lone_child.display());
        fs::rename(&lone_child, &temp)?;
        fs::remove_dir_all(output)?;
        fs::rename(&temp, output)?;
    }
    Ok(())
}

/// Extracts a tar (gzip-compressed when `gzipped`) into `output`. Stored
/// permissions are not applied.
pub(super) fn extract_tar(src: &Path, output: &Path, gzipped: bool) -> Result<(), UnzipError> {
    fs::create_dir_all(output)?;

    let file = BufReader::new(File::open(src)?);
    let unpacked = if gzipped {
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.set_preserve_permissions(false);
        archive.unpack(output)
    } else {
        let mut archive = tar::Archive::new(file);
        archive.set_preserve_permissions(false);
        archive.unpack(output)
    };
    unpacked.map_err(|e| corrupt(src, e))
}

/// Decompresses a single gzip stream into the file `output`.
pub(super) fn extract_gz(src: &Path, output: &Path) -> Result<(), UnzipError> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(src)?));
    let mut out = File::create(output)?;
    io::copy(&mut decoder, &mut out).map_err(|e| corrupt(src, e))?;
    Ok(())
}

/// Runs the external 7z program. A throwaway password is always passed so an
/// encrypted archive fails immediately instead of prompting.
pub(super) fn extract_7z(program: &str, src: &Path, output: &Path) -> Result<(), UnzipError> {
    fs::create_dir_all(output)?;

    let mut out_flag = std::ffi::OsString::from("-o");
    out_flag.push(output);

    let result = Command::new(program)
        .arg("x")
        .arg("-y")
        .arg(out_flag)
        .arg("-pfoo")
        .arg("--")
        .arg(src)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| UnzipError::Tool {
            program: program.to_string(),
            archive: src.to_path_buf(),
            reason: e.to_string(),
        })?;

    if result.status.success() {
        Ok(())
    } else {
        Err(UnzipError::Tool {
            program: program.to_string(),
            archive: src.to_path_buf(),
            reason: format!(
                "{}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ),
        })
    }
}

//! Zip bundle of a multi-chunk job's artifacts.
//!
//! The archive holds each chunk file under its own file name, deflated, in
//! chunk order. It is written next to the chunks as `<base>_all.zip` with the
//! same temp-file-then-rename discipline as the chunk files.

use crate::error::JobError;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// `<base>_all.zip`
pub fn bundle_name(base: &str) -> String {
    format!("{base}_all.zip")
}

/// Pack `files` into a zip archive at `path`.
///
/// Runs on the blocking pool; compression is CPU-bound.
pub async fn write_bundle(path: &Path, files: &[PathBuf]) -> Result<(), JobError> {
    let target = path.to_path_buf();
    let files = files.to_vec();
    let joined = tokio::task::spawn_blocking(move || write_bundle_blocking(&target, &files)).await;

    let fail = |source: io::Error| JobError::ArtifactWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    match joined {
        Ok(result) => result.map_err(fail)?,
        Err(e) => return Err(JobError::Internal(format!("bundle task failed: {e}"))),
    }
    info!("Bundle saved to {}", path.display());
    Ok(())
}

fn write_bundle_blocking(path: &Path, files: &[PathBuf]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("zip.tmp");
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(File::create(&tmp_path)?);
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name")
            })?;
        let bytes = std::fs::read(file)?;
        debug!("Bundling {} ({} bytes)", name, bytes.len());
        zip.start_file(name, options).map_err(io::Error::other)?;
        zip.write_all(&bytes)?;
    }
    zip.finish().map_err(io::Error::other)?;

    std::fs::rename(&tmp_path, path)
}

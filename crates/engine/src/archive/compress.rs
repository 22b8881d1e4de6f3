//! Zip creation.
//!
//! The archive is assembled in a temporary file and published to the target
//! only after every source has been written, so a failed or cancelled job
//! never leaves a partial archive behind.

use std::io::{Seek, Write};
use std::path::Path;
use std::sync::Arc;

use fmcore_common::{parent_path, VfsError, VfsResult};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipWriter};

use super::walk::Walk;
use super::{map_zip_error, zip_time};
use crate::backend::copy_buffered;
use crate::router::FileBackendRouter;

/// Summary of a finished compression job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressReport {
    pub files: usize,
    pub directories: usize,
    /// Uncompressed bytes read from sources.
    pub bytes: u64,
}

pub(crate) fn compress(
    router: &Arc<FileBackendRouter>,
    sources: &[String],
    target: &str,
    password: Option<&str>,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> VfsResult<CompressReport> {
    if sources.is_empty() {
        return Err(VfsError::InvalidPath("nothing to compress".to_string()));
    }

    // A local target is built next to itself so publishing is a rename.
    let local_target = router.writable_local_path(target);
    let mut spool = match local_target.as_deref().and_then(Path::parent) {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    let spool_path = spool.path().to_string_lossy().into_owned();

    let report = write_archive(
        router,
        sources,
        target,
        &spool_path,
        spool.as_file_mut(),
        password,
        buffer_size,
        cancel,
    )?;

    if cancel.is_cancelled() {
        return Err(VfsError::Cancelled);
    }
    match local_target {
        Some(path) => {
            spool.as_file().sync_all()?;
            spool.persist(&path).map_err(|e| VfsError::from(e.error))?;
        }
        None => publish(router, spool, target, buffer_size)?,
    }

    info!(
        target = %target,
        files = report.files,
        directories = report.directories,
        encrypted = password.is_some(),
        "Archive created"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn write_archive(
    router: &Arc<FileBackendRouter>,
    sources: &[String],
    target: &str,
    spool_path: &str,
    out: &mut std::fs::File,
    password: Option<&str>,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> VfsResult<CompressReport> {
    let mut writer = ZipWriter::new(out);
    // Directory entries carry no data and are never encrypted.
    let dir_options = SimpleFileOptions::default();
    let mut file_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    if let Some(pass) = password {
        file_options = file_options.with_aes_encryption(AesMode::Aes256, pass);
    }

    let mut report = CompressReport::default();
    for item in Walk::new(router.clone(), sources, true, cancel.clone()) {
        let item = item?;
        if item.entry.path == target || item.entry.path == spool_path {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }

        let time = zip_time(item.entry.modified_millis);
        if item.entry.is_directory {
            let mut options = dir_options;
            if let Some(time) = time {
                options = options.last_modified_time(time);
            }
            // Only data-bearing entries are AES-marked; a folder has nothing to seal.
            writer
                .add_directory(format!("{}/", item.relative), options)
                .map_err(map_zip_error)?;
            report.directories += 1;
        } else {
            let mut options = file_options;
            if let Some(time) = time {
                options = options.last_modified_time(time);
            }
            writer
                .start_file(item.relative.as_str(), options)
                .map_err(map_zip_error)?;
            let mut reader = router.open_read(&item.entry.path)?;
            let copied = copy_buffered(&mut reader, &mut writer, buffer_size, || {
                cancel.is_cancelled()
            })?;
            report.files += 1;
            report.bytes += copied;
        }
        debug!(name = %item.relative, "archived");
    }

    writer.finish().map_err(map_zip_error)?;
    Ok(report)
}

/// Stream a finished spool to a non-local target.
fn publish(
    router: &FileBackendRouter,
    mut spool: NamedTempFile,
    target: &str,
    buffer_size: usize,
) -> VfsResult<()> {
    let result = (|| -> VfsResult<()> {
        if let Some(parent) = parent_path(target) {
            if !router.exists(parent)? {
                return Err(VfsError::NotFound(parent.to_string()));
            }
        }
        spool.rewind()?;
        let mut out = router.open_write(target)?;
        copy_buffered(spool.as_file_mut(), &mut out, buffer_size, || false)?;
        out.flush()?;
        out.finish()
    })();

    if let Err(e) = &result {
        warn!(target = %target, error = %e, "Publishing archive failed");
        if router.exists(target).unwrap_or(false) {
            if let Err(e) = router.delete_path(target) {
                warn!(target = %target, error = %e, "Could not remove partial archive");
            }
        }
    }
    result
}

//! Zip compression, extraction and browsing over the backend router.
//!
//! Sources and destinations are router paths, so an archive can be built
//! from local files and written to a remote share, or extracted from a root
//! path onto an SD card, without backend-specific code.

pub mod compress;
pub mod extract;
pub mod listing;
pub mod sanitize;
pub mod walk;

use std::sync::Arc;

use fmcore_common::{VfsError, VfsResult};
use tokio_util::sync::CancellationToken;
use zip::result::ZipError;
use zip::DateTime;

use crate::clock::CivilTime;
use crate::router::FileBackendRouter;

pub use compress::CompressReport;
pub use extract::{ArchiveSource, ExtractReport, ExtractState, Extraction};
pub use listing::{ArchiveIndex, IndexedEntry};
pub use walk::{Walk, WalkItem};

/// Default streaming buffer for archive entries (8KB).
pub const DEFAULT_ARCHIVE_BUFFER: usize = 8 * 1024;

/// Entry point for archive jobs.
#[derive(Clone)]
pub struct ArchiveEngine {
    router: Arc<FileBackendRouter>,
    buffer_size: usize,
}

impl ArchiveEngine {
    /// Create an engine streaming through `buffer_size` byte chunks.
    pub fn new(router: Arc<FileBackendRouter>, buffer_size: usize) -> Self {
        Self {
            router,
            buffer_size: buffer_size.max(1),
        }
    }

    /// The router archives are read from and written to.
    pub fn router(&self) -> &Arc<FileBackendRouter> {
        &self.router
    }

    /// Compress `sources` into a zip at `target`.
    pub fn compress(
        &self,
        sources: &[String],
        target: &str,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> VfsResult<CompressReport> {
        compress::compress(
            &self.router,
            sources,
            target,
            password,
            self.buffer_size,
            cancel,
        )
    }

    /// Prepare a resumable extraction of `source` under `destination`.
    pub fn extraction(&self, source: ArchiveSource, destination: &str) -> Extraction {
        Extraction::new(self.router.clone(), source, destination, self.buffer_size)
    }

    /// Extract an archive in one call.
    pub fn extract(
        &self,
        archive: &str,
        destination: &str,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> VfsResult<ExtractReport> {
        let mut job = self.extraction(ArchiveSource::Path(archive.to_string()), destination);
        if let Some(password) = password {
            job.supply_password(password);
        }
        job.run(cancel)
    }

    /// Index an archive for browsing.
    pub fn index(&self, archive: &str) -> VfsResult<ArchiveIndex> {
        ArchiveIndex::build(self.router.open_read_seekable(archive)?)
    }

    /// Walk `sources` breadth-first.
    pub fn walk(&self, sources: &[String], cancel: CancellationToken) -> Walk {
        Walk::new(self.router.clone(), sources, true, cancel)
    }
}

/// Map a zip error onto the shared taxonomy.
pub(crate) fn map_zip_error(error: ZipError) -> VfsError {
    match error {
        ZipError::UnsupportedArchive(detail) if detail == ZipError::PASSWORD_REQUIRED => {
            VfsError::NeedPassword
        }
        ZipError::InvalidPassword => VfsError::WrongPassword,
        ZipError::Io(e) => e.into(),
        ZipError::FileNotFound => VfsError::NotFound("archive entry".to_string()),
        other => VfsError::CorruptArchive(other.to_string()),
    }
}

/// Map a failure to open an archive. Unreadable structure is corruption,
/// not an I/O fault of the backend.
pub(crate) fn map_open_error(error: ZipError) -> VfsError {
    match map_zip_error(error) {
        VfsError::Io(msg) => VfsError::CorruptArchive(msg),
        other => other,
    }
}

/// Zip timestamp for a millisecond mtime. Zip dates cover 1980 to 2107.
pub(crate) fn zip_time(modified_millis: i64) -> Option<DateTime> {
    let c = CivilTime::from_millis(modified_millis);
    let year = u16::try_from(c.year).ok()?;
    DateTime::from_date_and_time(
        year,
        c.month as u8,
        c.day as u8,
        c.hour as u8,
        c.minute as u8,
        c.second as u8,
    )
    .ok()
}

/// Millisecond mtime for a zip timestamp.
pub(crate) fn zip_millis(time: DateTime) -> Option<i64> {
    CivilTime::new(
        i64::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )
    .map(|c| c.to_millis())
}

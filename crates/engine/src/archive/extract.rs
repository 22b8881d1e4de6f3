//! Resumable zip extraction.
//!
//! An [`Extraction`] moves through
//! `Idle -> ReadingHeader -> (NeedPassword <-> ReadingHeader) -> Extracting -> Done | Failed`.
//! Password prompts do not lose progress: after [`Extraction::supply_password`]
//! the next [`Extraction::run`] resumes at the entry that asked for it.

use std::collections::HashSet;
use std::sync::Arc;

use fmcore_common::{join_path, parent_path, VfsError, VfsResult};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::sanitize::{archive_stem, resolve_entry_target};
use super::{map_open_error, map_zip_error, zip_millis};
use crate::backend::{copy_buffered, ReadSeek};
use crate::router::FileBackendRouter;

/// Where the archive bytes come from.
pub enum ArchiveSource {
    /// A router path.
    Path(String),
    /// A raw content stream, with the file name used to derive the output folder.
    Stream {
        name: String,
        reader: Box<dyn ReadSeek>,
    },
}

impl ArchiveSource {
    fn name(&self) -> &str {
        match self {
            ArchiveSource::Path(path) => path,
            ArchiveSource::Stream { name, .. } => name,
        }
    }
}

/// Extraction progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractState {
    Idle,
    ReadingHeader,
    NeedPassword,
    Extracting,
    Done,
    Failed,
}

/// Summary of an extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    /// Folder the archive was extracted into.
    pub root: String,
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// Entry names skipped because they would escape `root`.
    pub skipped: Vec<String>,
}

/// One extraction job.
pub struct Extraction {
    router: Arc<FileBackendRouter>,
    source: Option<ArchiveSource>,
    archive: Option<ZipArchive<Box<dyn ReadSeek>>>,
    password: Option<String>,
    state: ExtractState,
    failure: Option<VfsError>,
    next_index: usize,
    created: HashSet<String>,
    buffer_size: usize,
    report: ExtractReport,
}

impl Extraction {
    /// Prepare extraction of `source` into `<destination>/<archive stem>`.
    pub fn new(
        router: Arc<FileBackendRouter>,
        source: ArchiveSource,
        destination: &str,
        buffer_size: usize,
    ) -> Self {
        let root = join_path(destination, archive_stem(source.name()));
        Self {
            router,
            source: Some(source),
            archive: None,
            password: None,
            state: ExtractState::Idle,
            failure: None,
            next_index: 0,
            created: HashSet::new(),
            buffer_size: buffer_size.max(1),
            report: ExtractReport {
                root,
                ..ExtractReport::default()
            },
        }
    }

    /// Current state.
    pub fn state(&self) -> ExtractState {
        self.state
    }

    /// Progress so far.
    pub fn report(&self) -> &ExtractReport {
        &self.report
    }

    /// Set or replace the password. A job waiting for one goes back to
    /// reading headers.
    pub fn supply_password(&mut self, password: &str) {
        self.password = Some(password.to_string());
        if self.state == ExtractState::NeedPassword {
            self.state = ExtractState::ReadingHeader;
        }
    }

    /// Run until done, a password is needed, or a failure.
    ///
    /// `NeedPassword` and `WrongPassword` leave the job resumable. Any other
    /// error is final and is returned again by later calls.
    pub fn run(&mut self, cancel: &CancellationToken) -> VfsResult<ExtractReport> {
        match self.state {
            ExtractState::Done => return Ok(self.report.clone()),
            ExtractState::Failed => {
                return Err(self.failure.clone().unwrap_or_else(|| {
                    VfsError::CorruptArchive("extraction already failed".to_string())
                }))
            }
            ExtractState::NeedPassword if self.password.is_none() => {
                return Err(VfsError::NeedPassword)
            }
            _ => {}
        }

        let result = self.drive(cancel);
        match &result {
            Ok(_) => {
                self.state = ExtractState::Done;
                info!(
                    root = %self.report.root,
                    files = self.report.files,
                    directories = self.report.directories,
                    skipped = self.report.skipped.len(),
                    "Archive extracted"
                );
            }
            Err(VfsError::NeedPassword) | Err(VfsError::WrongPassword) => {
                self.state = ExtractState::NeedPassword;
            }
            Err(e) => {
                warn!(root = %self.report.root, error = %e, "Extraction failed");
                self.state = ExtractState::Failed;
                self.failure = Some(e.clone());
            }
        }
        result.map(|_| self.report.clone())
    }

    fn open(&mut self) -> VfsResult<()> {
        if self.archive.is_some() {
            return Ok(());
        }
        let reader = match self.source.take() {
            Some(ArchiveSource::Path(path)) => self.router.open_read_seekable(&path)?,
            Some(ArchiveSource::Stream { reader, .. }) => reader,
            None => return Err(VfsError::CorruptArchive("archive source consumed".to_string())),
        };
        let archive = ZipArchive::new(reader).map_err(map_open_error)?;
        debug!(entries = archive.len(), "Archive opened");
        self.archive = Some(archive);
        Ok(())
    }

    fn ensure_dir(&mut self, path: &str) -> VfsResult<()> {
        if self.created.contains(path) {
            return Ok(());
        }
        self.router.mkdir(path)?;
        self.created.insert(path.to_string());
        Ok(())
    }

    fn drive(&mut self, cancel: &CancellationToken) -> VfsResult<()> {
        self.state = ExtractState::ReadingHeader;
        self.open()?;
        let root = self.report.root.clone();
        self.ensure_dir(&root)?;

        let Some(mut archive) = self.archive.take() else {
            return Err(VfsError::CorruptArchive("archive not open".to_string()));
        };
        let result = self.extract_entries(&mut archive, &root, cancel);
        self.archive = Some(archive);
        result
    }

    fn extract_entries(
        &mut self,
        archive: &mut ZipArchive<Box<dyn ReadSeek>>,
        root: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<()> {
        while self.next_index < archive.len() {
            if cancel.is_cancelled() {
                return Err(VfsError::Cancelled);
            }
            let index = self.next_index;

            let mut entry = match &self.password {
                Some(pass) => archive.by_index_decrypt(index, pass.as_bytes()),
                None => archive.by_index(index),
            }
            .map_err(map_zip_error)?;
            self.state = ExtractState::Extracting;

            let name = entry.name().to_string();
            let target = match resolve_entry_target(root, &name) {
                Ok(target) => target,
                Err(_) => {
                    warn!(entry = %name, "Skipping entry outside extraction root");
                    self.report.skipped.push(name);
                    self.next_index += 1;
                    continue;
                }
            };

            if entry.is_dir() {
                self.ensure_dir(&target)?;
                self.report.directories += 1;
            } else {
                if let Some(parent) = parent_path(&target) {
                    self.ensure_dir(parent)?;
                }
                let mut out = self.router.open_write(&target)?;
                let copied = copy_buffered(&mut entry, &mut out, self.buffer_size, || {
                    cancel.is_cancelled()
                })?;
                out.finish()?;

                if let Some(millis) = entry.last_modified().and_then(zip_millis) {
                    if let Err(e) = self.router.set_modified(&target, millis) {
                        debug!(path = %target, error = %e, "mtime not applied");
                    }
                }
                self.report.files += 1;
                self.report.bytes += copied;
            }
            debug!(entry = %name, "extracted");
            self.next_index += 1;
        }
        Ok(())
    }
}

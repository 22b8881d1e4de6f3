//! End-to-end archive tests.
//!
//! These tests verify complete flows through the router:
//! - Compress then extract, locally and onto a remote share
//! - Zip-slip entries are skipped
//! - Password prompts resume an extraction
//! - Browsing an archive without extracting it

use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex};

use fmcore_common::{join_path, PathClassifier, RemoteDescriptor, VfsError};
use fmcore_engine::remote::smb::MemoryShareState;
use fmcore_engine::{
    ArchiveEngine, ArchiveSource, ExtractState, FileBackendRouter, MemoryConnector, RemoteStore,
    SessionRegistry, SessionTimeouts, SmbConnector, DEFAULT_ARCHIVE_BUFFER,
};
use fmcore_vault::{CredentialVault, KeychainBackend, MemoryKeychain};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// An engine rooted at a temporary "SD card".
fn create_engine() -> (ArchiveEngine, TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let sd = temp_dir.path().to_string_lossy().into_owned();
    let router = FileBackendRouter::new(PathClassifier::new(temp_dir.path(), Vec::new(), Vec::new()));
    (
        ArchiveEngine::new(Arc::new(router), DEFAULT_ARCHIVE_BUFFER),
        temp_dir,
        sd,
    )
}

/// An engine that also reaches one in-memory remote share.
fn create_remote_engine() -> (
    ArchiveEngine,
    TempDir,
    String,
    RemoteDescriptor,
    Arc<Mutex<MemoryShareState>>,
) {
    let temp_dir = TempDir::new().unwrap();
    let sd = temp_dir.path().to_string_lossy().into_owned();

    let store = Arc::new(RemoteStore::new(temp_dir.path().join("remotes.json")));
    let remote = RemoteDescriptor::new_smb("NAS", "nas.local", "media");
    store.add(remote.clone()).unwrap();

    let connector = MemoryConnector::new("", "");
    let share = connector.state();
    let connector: Arc<dyn SmbConnector> = Arc::new(connector);
    let keychain: Arc<dyn KeychainBackend> = Arc::new(MemoryKeychain::new());
    let sessions = SessionRegistry::new(
        store,
        Some(connector),
        Arc::new(CredentialVault::new(keychain)),
        SessionTimeouts::default(),
    );

    let router = FileBackendRouter::new(PathClassifier::new(temp_dir.path(), Vec::new(), Vec::new()))
        .with_sessions(Arc::new(sessions));
    (
        ArchiveEngine::new(Arc::new(router), DEFAULT_ARCHIVE_BUFFER),
        temp_dir,
        sd,
        remote,
        share,
    )
}

/// Lay out `docs/a.txt`, `docs/sub/b.txt` and `readme.txt` under `base`.
fn create_sources(base: &str) {
    let base = Path::new(base);
    fs::create_dir_all(base.join("docs/sub")).unwrap();
    fs::write(base.join("docs/a.txt"), "alpha").unwrap();
    fs::write(base.join("docs/sub/b.txt"), "bravo").unwrap();
    fs::write(base.join("readme.txt"), "read me").unwrap();
}

fn write_raw_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Archive reader that cancels `cancel` once a read starts inside `window`.
struct CancelWithin {
    inner: Cursor<Vec<u8>>,
    cancel: CancellationToken,
    window: Range<u64>,
}

impl Read for CancelWithin {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.window.contains(&self.inner.position()) {
            self.cancel.cancel();
        }
        self.inner.read(buf)
    }
}

impl Seek for CancelWithin {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

// =============================================================================
// Compress / Extract Tests
// =============================================================================

#[test]
fn test_compress_then_extract_into_named_folder() {
    let (engine, _temp_dir, sd) = create_engine();
    create_sources(&sd);
    let cancel = CancellationToken::new();

    let archive = join_path(&sd, "out.zip");
    let report = engine
        .compress(
            &[join_path(&sd, "docs"), join_path(&sd, "readme.txt")],
            &archive,
            None,
            &cancel,
        )
        .unwrap();
    assert_eq!(report.files, 3);
    assert_eq!(report.directories, 2);
    assert_eq!(report.bytes, 17);

    let extracted = join_path(&sd, "extracted");
    fs::create_dir(&extracted).unwrap();
    let report = engine.extract(&archive, &extracted, None, &cancel).unwrap();

    let root = Path::new(&extracted).join("out");
    assert_eq!(report.root, root.to_string_lossy());
    assert_eq!(report.files, 3);
    assert!(report.skipped.is_empty());
    assert_eq!(fs::read_to_string(root.join("docs/a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(root.join("docs/sub/b.txt")).unwrap(), "bravo");
    assert_eq!(fs::read_to_string(root.join("readme.txt")).unwrap(), "read me");
}

#[test]
fn test_compress_into_source_folder_skips_itself() {
    let (engine, _temp_dir, sd) = create_engine();
    create_sources(&sd);

    let archive = join_path(&sd, "docs/self.zip");
    let report = engine
        .compress(
            &[join_path(&sd, "docs")],
            &archive,
            None,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(report.files, 2);

    let index = engine.index(&archive).unwrap();
    assert!(index.entries().iter().all(|e| !e.entry.name.ends_with(".zip")));
}

#[test]
fn test_cancelled_compress_leaves_no_archive() {
    let (engine, _temp_dir, sd) = create_engine();
    create_sources(&sd);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let archive = join_path(&sd, "out.zip");
    let result = engine.compress(&[join_path(&sd, "docs")], &archive, None, &cancel);

    assert!(matches!(result, Err(VfsError::Cancelled)));
    assert!(!Path::new(&archive).exists());
    // Only the sources remain; no spool files.
    let names: Vec<String> = fs::read_dir(&sd)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
}

#[test]
fn test_missing_source_fails() {
    let (engine, _temp_dir, sd) = create_engine();
    let archive = join_path(&sd, "out.zip");
    let result = engine.compress(
        &[join_path(&sd, "nope")],
        &archive,
        None,
        &CancellationToken::new(),
    );
    assert!(matches!(result, Err(VfsError::NotFound(_))));
    assert!(!Path::new(&archive).exists());
}

#[test]
fn test_deep_tree_round_trip() {
    let (engine, _temp_dir, sd) = create_engine();
    let mut deep = Path::new(&sd).join("deep");
    for _ in 0..200 {
        deep.push("d");
    }
    fs::create_dir_all(&deep).unwrap();
    fs::write(deep.join("leaf.txt"), "bottom").unwrap();

    let cancel = CancellationToken::new();
    let archive = join_path(&sd, "deep.zip");
    let report = engine
        .compress(&[join_path(&sd, "deep")], &archive, None, &cancel)
        .unwrap();
    assert_eq!(report.directories, 201);
    assert_eq!(report.files, 1);

    let out = join_path(&sd, "out");
    fs::create_dir(&out).unwrap();
    engine.extract(&archive, &out, None, &cancel).unwrap();

    let mut expected = Path::new(&out).join("deep").join("deep");
    for _ in 0..200 {
        expected.push("d");
    }
    assert_eq!(fs::read_to_string(expected.join("leaf.txt")).unwrap(), "bottom");
}

// =============================================================================
// Extraction Safety Tests
// =============================================================================

#[test]
fn test_zip_slip_entries_are_skipped() {
    let (engine, _temp_dir, sd) = create_engine();
    let archive = Path::new(&sd).join("slip.zip");
    write_raw_zip(
        &archive,
        &[
            ("../../evil.txt", &b"pwned"[..]),
            ("a/../../evil2.txt", &b"pwned"[..]),
            ("good.txt", &b"fine"[..]),
        ],
    );

    let dest = join_path(&sd, "dest");
    fs::create_dir(&dest).unwrap();
    let report = engine
        .extract(
            &archive.to_string_lossy(),
            &dest,
            None,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.skipped, vec!["../../evil.txt", "a/../../evil2.txt"]);
    assert_eq!(
        fs::read_to_string(Path::new(&dest).join("slip/good.txt")).unwrap(),
        "fine"
    );
    assert!(!Path::new(&sd).join("evil.txt").exists());
    assert!(!Path::new(&dest).join("evil.txt").exists());
}

#[test]
fn test_corrupt_archive_fails() {
    let (engine, _temp_dir, sd) = create_engine();
    let archive = join_path(&sd, "broken.zip");
    fs::write(&archive, "this is not a zip file").unwrap();

    let mut job = engine.extraction(ArchiveSource::Path(archive), &sd);
    let result = job.run(&CancellationToken::new());
    assert!(matches!(result, Err(VfsError::CorruptArchive(_))));
    assert_eq!(job.state(), ExtractState::Failed);
}

#[test]
fn test_cancelled_extraction_stops_between_chunks() {
    let (engine, _temp_dir, sd) = create_engine();

    // Stored entries keep `big.bin` contiguous, ahead of the central directory.
    let big = vec![0x5Au8; 2 * 1024 * 1024];
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in [("a.txt", &b"alpha"[..]), ("big.bin", &big[..]), ("c.txt", &b"charlie"[..])] {
        writer.start_file(name, stored).unwrap();
        writer.write_all(data).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();
    assert_eq!(ZipArchive::new(Cursor::new(bytes.clone())).unwrap().len(), 3);

    let cancel = CancellationToken::new();
    let reader = CancelWithin {
        inner: Cursor::new(bytes),
        cancel: cancel.clone(),
        window: 512 * 1024..1536 * 1024,
    };
    let mut job = engine.extraction(
        ArchiveSource::Stream {
            name: "bundle.zip".to_string(),
            reader: Box::new(reader),
        },
        &sd,
    );

    assert!(matches!(job.run(&cancel), Err(VfsError::Cancelled)));
    assert!(cancel.is_cancelled());
    assert_eq!(job.state(), ExtractState::Failed);
    assert_eq!(job.report().files, 1);
    assert_eq!(job.report().bytes, 5);

    let root = Path::new(&sd).join("bundle");
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "alpha");
    assert!(!root.join("big.bin").exists());
    assert!(!root.join("c.txt").exists());
    let leftovers: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("a.txt")]);

    // A finished job keeps reporting why it stopped.
    assert!(matches!(
        job.run(&CancellationToken::new()),
        Err(VfsError::Cancelled)
    ));
}

// =============================================================================
// Password Tests
// =============================================================================

#[test]
fn test_password_prompt_resumes_extraction() {
    let (engine, _temp_dir, sd) = create_engine();
    create_sources(&sd);
    let cancel = CancellationToken::new();

    let archive = join_path(&sd, "secret.zip");
    engine
        .compress(&[join_path(&sd, "docs")], &archive, Some("hunter2"), &cancel)
        .unwrap();
    assert!(engine.index(&archive).unwrap().is_encrypted());
    {
        let mut raw = ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
        for i in 0..raw.len() {
            let entry = raw.by_index_raw(i).unwrap();
            assert_eq!(entry.encrypted(), !entry.is_dir(), "{}", entry.name());
        }
    }

    let out = join_path(&sd, "out");
    fs::create_dir(&out).unwrap();
    let mut job = engine.extraction(ArchiveSource::Path(archive), &out);
    assert_eq!(job.state(), ExtractState::Idle);

    assert!(matches!(job.run(&cancel), Err(VfsError::NeedPassword)));
    assert_eq!(job.state(), ExtractState::NeedPassword);

    job.supply_password("wrong");
    assert!(matches!(job.run(&cancel), Err(VfsError::WrongPassword)));
    assert_eq!(job.state(), ExtractState::NeedPassword);

    job.supply_password("hunter2");
    let report = job.run(&cancel).unwrap();
    assert_eq!(job.state(), ExtractState::Done);
    assert_eq!(report.files, 2);

    let root = Path::new(&out).join("secret");
    assert_eq!(fs::read_to_string(root.join("docs/a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(root.join("docs/sub/b.txt")).unwrap(), "bravo");
}

// =============================================================================
// Browsing and Streams
// =============================================================================

#[test]
fn test_index_lists_virtual_folders() {
    let (engine, _temp_dir, sd) = create_engine();
    create_sources(&sd);
    let archive = join_path(&sd, "out.zip");
    engine
        .compress(
            &[join_path(&sd, "docs"), join_path(&sd, "readme.txt")],
            &archive,
            None,
            &CancellationToken::new(),
        )
        .unwrap();

    let index = engine.index(&archive).unwrap();
    assert!(!index.is_encrypted());
    let top: Vec<String> = index.list("").into_iter().map(|e| e.name).collect();
    assert_eq!(top, vec!["docs", "readme.txt"]);

    let docs = index.list("docs");
    assert_eq!(docs[0].name, "sub");
    assert_eq!(docs[0].child_count, 1);
    assert_eq!(docs[1].name, "a.txt");
    assert_eq!(docs[1].size, 5);
}

#[test]
fn test_extract_from_raw_stream() {
    let (engine, _temp_dir, sd) = create_engine();
    let archive = Path::new(&sd).join("download.bin");
    write_raw_zip(&archive, &[("photo.jpg", &b"jpeg"[..])]);

    let reader = fs::File::open(&archive).unwrap();
    let mut job = engine.extraction(
        ArchiveSource::Stream {
            name: "holiday.zip".to_string(),
            reader: Box::new(reader),
        },
        &sd,
    );
    let report = job.run(&CancellationToken::new()).unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(
        fs::read(Path::new(&sd).join("holiday/photo.jpg")).unwrap(),
        b"jpeg"
    );
}

// =============================================================================
// Remote Share Tests
// =============================================================================

#[test]
fn test_archive_to_and_from_remote_share() {
    let (engine, _temp_dir, sd, remote, share) = create_remote_engine();
    create_sources(&sd);
    let cancel = CancellationToken::new();

    let remote_archive = remote.id.path_for("backup.zip");
    let report = engine
        .compress(&[join_path(&sd, "docs")], &remote_archive, None, &cancel)
        .unwrap();
    assert_eq!(report.files, 2);
    assert!(share.lock().unwrap().file("backup.zip").is_some());

    let out = join_path(&sd, "restored");
    fs::create_dir(&out).unwrap();
    engine.extract(&remote_archive, &out, None, &cancel).unwrap();
    assert_eq!(
        fs::read_to_string(Path::new(&out).join("backup/docs/sub/b.txt")).unwrap(),
        "bravo"
    );

    // And back onto the share.
    let local_archive = join_path(&sd, "local.zip");
    engine
        .compress(&[join_path(&sd, "readme.txt")], &local_archive, None, &cancel)
        .unwrap();
    engine
        .extract(&local_archive, &remote.base_path(), None, &cancel)
        .unwrap();
    assert_eq!(
        share.lock().unwrap().file("local/readme.txt").unwrap(),
        b"read me"
    );
}

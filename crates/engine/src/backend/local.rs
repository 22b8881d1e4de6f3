//! Direct filesystem backend.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fmcore_common::{join_path, sort_entries, BackendKind, Entry, VfsError, VfsResult};
use tempfile::NamedTempFile;

use super::{FileBackend, ReadSeek, WriteStream};

/// Backend for paths the process can reach with plain filesystem calls.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    /// Create a local backend.
    pub fn new() -> Self {
        Self
    }

    fn entry_for(path: &str, name: String, metadata: &fs::Metadata) -> Entry {
        let modified = system_time_to_millis(metadata.modified().unwrap_or(UNIX_EPOCH));
        if metadata.is_dir() {
            Entry::directory(path, name, modified)
        } else {
            Entry::file(path, name, metadata.len(), modified)
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Inverse of [`system_time_to_millis`].
pub fn millis_to_system_time(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

/// Write stream that stages into a sibling temp file and renames on finish.
pub struct LocalWriteStream {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl LocalWriteStream {
    /// Stage a write to `destination`. The parent directory must exist.
    pub fn create(destination: &Path) -> VfsResult<Self> {
        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(VfsError::NotFound(format!(
                "parent directory does not exist: {}",
                parent.display()
            )));
        }
        let temp = NamedTempFile::new_in(parent)?;
        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }
}

impl Write for LocalWriteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.temp.flush()
    }
}

impl WriteStream for LocalWriteStream {
    fn finish(mut self: Box<Self>) -> VfsResult<()> {
        self.temp.flush()?;
        let this = *self;
        this.temp
            .persist(&this.destination)
            .map_err(|e| VfsError::from(e.error))?;
        Ok(())
    }
}

impl FileBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn list(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(VfsError::InvalidPath(format!("not a directory: {}", path)));
        }

        let mut results = Vec::new();
        for entry_result in fs::read_dir(path)? {
            let entry = match entry_result {
                Ok(e) => e,
                Err(_) => continue,
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }

            // Follow symlinks so links to directories browse like directories.
            let metadata = match fs::metadata(entry.path()).or_else(|_| entry.metadata()) {
                Ok(m) => m,
                Err(_) => continue,
            };

            let child_path = join_path(path, &name);
            results.push(Self::entry_for(&child_path, name, &metadata));
        }

        sort_entries(&mut results);
        Ok(results)
    }

    fn stat(&self, path: &str) -> VfsResult<Entry> {
        let metadata = fs::metadata(path)?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        Ok(Self::entry_for(path, name, &metadata))
    }

    fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn open_read_seekable(&self, path: &str) -> VfsResult<Box<dyn ReadSeek>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteStream>> {
        if Path::new(path).is_dir() {
            return Err(VfsError::InvalidPath(format!("is a directory: {}", path)));
        }
        Ok(Box::new(LocalWriteStream::create(Path::new(path))?))
    }

    fn mkdir(&self, path: &str) -> VfsResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> VfsResult<()> {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        if Path::new(to).exists() {
            return Err(VfsError::PermissionDenied(format!("target exists: {}", to)));
        }
        fs::rename(from, to)?;
        Ok(())
    }

    fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64> {
        let count = fs::read_dir(path)?
            .filter_map(Result::ok)
            .filter(|e| include_hidden || !e.file_name().to_string_lossy().starts_with('.'))
            .count();
        Ok(count as i64)
    }

    fn exists(&self, path: &str) -> VfsResult<bool> {
        Ok(Path::new(path).exists())
    }

    fn set_modified(&self, path: &str, modified_millis: i64) -> VfsResult<bool> {
        let file = fs::File::open(path)?;
        file.set_modified(millis_to_system_time(modified_millis))?;
        Ok(true)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        Some(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_structure(dir: &Path) {
        fs::create_dir(dir.join("subdir")).unwrap();
        fs::create_dir(dir.join("subdir").join("nested")).unwrap();
        fs::write(dir.join("subdir").join("inner.txt"), "inner").unwrap();
        fs::write(dir.join("file1.txt"), "content1").unwrap();
        fs::write(dir.join("File2.txt"), "content22").unwrap();
        fs::write(dir.join(".hidden"), "secret").unwrap();
    }

    fn root(dir: &TempDir) -> String {
        dir.path().to_string_lossy().to_string()
    }

    #[test]
    fn test_list_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());

        let entries = LocalBackend::new().list(&root(&temp_dir), false).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["subdir", "file1.txt", "File2.txt"]);

        let subdir = &entries[0];
        assert!(subdir.is_directory);
        assert_eq!(subdir.path, format!("{}/subdir", root(&temp_dir)));
        assert_eq!(subdir.child_count, fmcore_common::CHILD_COUNT_UNKNOWN);
        assert_eq!(entries[2].size, 9);
    }

    #[test]
    fn test_list_directory_with_hidden() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());

        let entries = LocalBackend::new().list(&root(&temp_dir), true).unwrap();
        assert!(entries.iter().any(|e| e.name == ".hidden"));
    }

    #[test]
    fn test_list_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let file = format!("{}/file1.txt", root(&temp_dir));

        let result = LocalBackend::new().list(&file, false);
        assert!(matches!(result, Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn test_list_missing() {
        let result = LocalBackend::new().list("/definitely/not/here/fmcore", false);
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_child_counts() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let backend = LocalBackend::new();

        assert_eq!(backend.child_count(&root(&temp_dir), false).unwrap(), 3);
        assert_eq!(backend.child_count(&root(&temp_dir), true).unwrap(), 4);

        let mut entries = backend.list(&root(&temp_dir), false).unwrap();
        backend.fill_child_counts(&mut entries, false);
        assert_eq!(entries[0].child_count, 2);
        assert_eq!(entries[1].child_count, fmcore_common::CHILD_COUNT_UNKNOWABLE);
    }

    #[test]
    fn test_write_is_invisible_until_finish() {
        let temp_dir = TempDir::new().unwrap();
        let target = format!("{}/out.bin", root(&temp_dir));
        let backend = LocalBackend::new();

        let mut stream = backend.open_write(&target).unwrap();
        stream.write_all(b"payload").unwrap();
        assert!(!backend.exists(&target).unwrap());
        stream.finish().unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn test_dropped_write_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let target = format!("{}/out.bin", root(&temp_dir));

        {
            let mut stream = LocalBackend::new().open_write(&target).unwrap();
            stream.write_all(b"partial").unwrap();
        }

        assert!(!Path::new(&target).exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_requires_parent() {
        let temp_dir = TempDir::new().unwrap();
        let target = format!("{}/missing/out.bin", root(&temp_dir));
        assert!(matches!(
            LocalBackend::new().open_write(&target),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_mkdir_delete_rename() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let nested = format!("{}/a/b/c", root(&temp_dir));

        backend.mkdir(&nested).unwrap();
        backend.mkdir(&nested).unwrap();
        assert!(backend.stat(&nested).unwrap().is_directory);

        let from = format!("{}/a", root(&temp_dir));
        let to = format!("{}/z", root(&temp_dir));
        backend.rename(&from, &to).unwrap();
        assert!(!backend.exists(&from).unwrap());

        backend.delete(&to).unwrap();
        assert!(!backend.exists(&to).unwrap());
    }

    #[test]
    fn test_rename_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let from = format!("{}/file1.txt", root(&temp_dir));
        let to = format!("{}/File2.txt", root(&temp_dir));

        assert!(LocalBackend::new().rename(&from, &to).is_err());
        assert_eq!(fs::read_to_string(&to).unwrap(), "content22");
    }

    #[test]
    fn test_set_modified() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let file = format!("{}/file1.txt", root(&temp_dir));
        let backend = LocalBackend::new();

        assert!(backend.set_modified(&file, 1_500_000_000_000).unwrap());
        assert_eq!(backend.stat(&file).unwrap().modified_millis, 1_500_000_000_000);
    }

    #[test]
    fn test_millis_conversion() {
        assert_eq!(system_time_to_millis(millis_to_system_time(1234)), 1234);
        assert_eq!(system_time_to_millis(millis_to_system_time(-5000)), -5000);
    }
}

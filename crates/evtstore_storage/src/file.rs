//! File-based storage backend for container members.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// Each container member (a data stream, a table, the metadata block) lives
/// in its own file. Readers open members with [`FileBackend::open_read_only`]
/// and get positional reads; stream writers create a fresh temporary file
/// with [`FileBackend::create`] and rename it into place once complete.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use evtstore_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("event_data.000001.tmp")).unwrap();
/// backend.append(&[4, 0, 0, 0]).unwrap();
/// backend.append(b"data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    read_only: bool,
}

impl FileBackend {
    /// Opens an existing file for positional reads only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    /// Creates a new, empty file, truncating any previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::from_file(path, file, false)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            read_only,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether appends are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }

        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("event_data.000001.tmp");

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
        assert!(!backend.is_read_only());
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("member.bin");

        let mut backend = FileBackend::create(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(&backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("member.bin");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("member.bin");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(&backend.read_all().unwrap(), b"persistent data");
    }

    #[test]
    fn file_create_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("member.bin");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"stale").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn file_read_only_rejects_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("member.bin");
        FileBackend::create(&path).unwrap();

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert!(backend.is_read_only());
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn file_read_only_missing_fails() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_read_only(&dir.path().join("absent"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn file_empty_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("member.bin");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"x").unwrap();

        let offset = backend.append(b"").unwrap();
        assert_eq!(offset, 1);
        assert_eq!(backend.size().unwrap(), 1);
    }
}

//! Length-prefixed data streams.
//!
//! ```text
//! +------+-----------------+------+-...-+
//! | size | serialized data | size | ... |
//! +------+-----------------+------+-...-+
//! ```
//!
//! `size` is a little-endian u32. Backends support positional reads, so a
//! reader repositions in constant time instead of reopening and skipping.

use crate::dir::ContainerDir;
use crate::error::{CoreError, CoreResult};
use evtstore_storage::{FileBackend, StorageBackend};
use std::fs;
use tracing::warn;

/// Size of the length prefix of an entry.
pub const ENTRY_HEADER_SIZE: u64 = 4;

/// Largest entry payload accepted when reading or writing.
pub const MAXIMUM_ENTRY_SIZE: usize = 40 * 1024 * 1024;

/// Reader over one data stream member.
pub struct DataStream {
    name: String,
    backend: Box<dyn StorageBackend>,
    size: u64,
    offset: u64,
    entry_index: u32,
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("entry_index", &self.entry_index)
            .finish_non_exhaustive()
    }
}

impl DataStream {
    /// Creates a reader over `backend`, positioned at the first entry.
    pub fn new(name: impl Into<String>, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            name: name.into(),
            backend,
            size,
            offset: 0,
            entry_index: 0,
        })
    }

    /// Opens the committed member `name` of a container.
    ///
    /// # Errors
    ///
    /// Returns `MissingStream` if the member does not exist.
    pub fn open(dir: &ContainerDir, name: &str) -> CoreResult<Self> {
        if !dir.has_member(name) {
            return Err(CoreError::missing_stream(name));
        }
        let backend = FileBackend::open_read_only(&dir.member_path(name))?;
        Self::new(name, Box::new(backend))
    }

    /// Returns the member name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of the entry the next read returns.
    #[must_use]
    pub fn entry_index(&self) -> u32 {
        self.entry_index
    }

    /// Returns the byte offset of the next entry.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the size of the stream in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads the next entry, or `None` at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns `MalformedStream` if the length prefix is truncated or above
    /// [`MAXIMUM_ENTRY_SIZE`], or the payload is truncated.
    pub fn read_entry(&mut self) -> CoreResult<Option<Vec<u8>>> {
        if self.offset >= self.size {
            return Ok(None);
        }

        let remaining = self.size - self.offset;
        if remaining < ENTRY_HEADER_SIZE {
            return Err(CoreError::malformed_stream(
                &self.name,
                format!("truncated entry size at offset {}", self.offset),
            ));
        }

        let header = self.backend.read_at(self.offset, ENTRY_HEADER_SIZE as usize)?;
        let entry_size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if entry_size > MAXIMUM_ENTRY_SIZE {
            return Err(CoreError::malformed_stream(
                &self.name,
                format!(
                    "entry size {entry_size} at offset {} out of bounds",
                    self.offset
                ),
            ));
        }
        if (entry_size as u64) > remaining - ENTRY_HEADER_SIZE {
            return Err(CoreError::malformed_stream(
                &self.name,
                format!("truncated entry at offset {}", self.offset),
            ));
        }

        let data = self
            .backend
            .read_at(self.offset + ENTRY_HEADER_SIZE, entry_size)?;
        self.offset += ENTRY_HEADER_SIZE + entry_size as u64;
        self.entry_index += 1;

        Ok(Some(data))
    }

    /// Positions the reader at entry `entry_index`, which starts at byte
    /// `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedStream` if `offset` lies beyond the end of the
    /// stream.
    pub fn seek_entry_at_offset(&mut self, entry_index: u32, offset: u64) -> CoreResult<()> {
        if offset > self.size {
            return Err(CoreError::malformed_stream(
                &self.name,
                format!(
                    "offset {offset} of entry {entry_index} beyond stream size {}",
                    self.size
                ),
            ));
        }
        self.offset = offset;
        self.entry_index = entry_index;
        Ok(())
    }

    /// Reads the whole stream as one unframed payload.
    ///
    /// Used for legacy analysis reports, which have no length prefix.
    ///
    /// # Errors
    ///
    /// Returns `MalformedStream` if the stream is larger than `maximum_size`.
    pub fn read_unframed(&mut self, maximum_size: usize) -> CoreResult<Vec<u8>> {
        if self.size > maximum_size as u64 {
            return Err(CoreError::malformed_stream(
                &self.name,
                format!("payload of {} bytes out of bounds", self.size),
            ));
        }
        let data = self.backend.read_all()?;
        self.offset = self.size;
        self.entry_index = 1;
        Ok(data)
    }
}

/// Writer for one new data stream member.
///
/// Entries are written to `<name>.tmp`; [`DataStreamWriter::finalize`]
/// renames it to `<name>`. Dropping an unfinalized writer removes the
/// temporary file, so a partial stream is never committed.
#[derive(Debug)]
pub struct DataStreamWriter {
    dir: ContainerDir,
    name: String,
    backend: Option<FileBackend>,
    offset: u64,
}

impl DataStreamWriter {
    /// Creates the temporary member for stream `name`.
    pub fn initialize(dir: &ContainerDir, name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let backend = FileBackend::create(&dir.temp_member_path(&name))?;
        Ok(Self {
            dir: dir.clone(),
            name,
            backend: Some(backend),
            offset: 0,
        })
    }

    /// Returns the member name the stream is committed under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the offset the next entry is written at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends an entry and returns the offset following it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the entry is larger than
    /// [`MAXIMUM_ENTRY_SIZE`] or the writer was already finalized.
    pub fn write_entry(&mut self, data: &[u8]) -> CoreResult<u64> {
        if data.len() > MAXIMUM_ENTRY_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "entry of {} bytes exceeds maximum entry size {MAXIMUM_ENTRY_SIZE}",
                data.len()
            )));
        }
        let backend = self.backend.as_mut().ok_or_else(|| {
            CoreError::invalid_operation(format!("stream {} is not open for writing", self.name))
        })?;

        // Bounded by MAXIMUM_ENTRY_SIZE above.
        let size = data.len() as u32;
        backend.append(&size.to_le_bytes())?;
        backend.append(data)?;
        self.offset += ENTRY_HEADER_SIZE + data.len() as u64;

        Ok(self.offset)
    }

    /// Syncs the temporary member, commits it and returns its size.
    pub fn finalize(mut self) -> CoreResult<u64> {
        let mut backend = self.backend.take().ok_or_else(|| {
            CoreError::invalid_operation(format!("stream {} is not open for writing", self.name))
        })?;
        let size = backend.size()?;

        let result = backend
            .flush()
            .and_then(|()| backend.sync())
            .map_err(CoreError::from);
        drop(backend);

        if let Err(err) = result.and_then(|()| self.dir.commit_member(&self.name)) {
            self.remove_temp();
            return Err(err);
        }
        Ok(size)
    }

    /// Discards the temporary member.
    pub fn abort(mut self) {
        self.backend = None;
        self.remove_temp();
    }

    fn remove_temp(&self) {
        let path = self.dir.temp_member_path(&self.name);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "unable to remove aborted stream");
            }
        }
    }
}

impl Drop for DataStreamWriter {
    fn drop(&mut self) {
        if self.backend.take().is_some() {
            self.remove_temp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evtstore_storage::InMemoryBackend;
    use tempfile::tempdir;

    fn framed(entries: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        for entry in entries {
            data.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            data.extend_from_slice(entry);
        }
        data
    }

    fn memory_stream(data: Vec<u8>) -> DataStream {
        DataStream::new("event_data.000001", Box::new(InMemoryBackend::with_data(data))).unwrap()
    }

    #[test]
    fn read_entries_in_order() {
        let mut stream = memory_stream(framed(&[b"one", b"", b"three"]));

        assert_eq!(stream.read_entry().unwrap().unwrap(), b"one");
        assert_eq!(stream.read_entry().unwrap().unwrap(), b"");
        assert_eq!(stream.entry_index(), 2);
        assert_eq!(stream.read_entry().unwrap().unwrap(), b"three");
        assert!(stream.read_entry().unwrap().is_none());
        assert!(stream.read_entry().unwrap().is_none());
    }

    #[test]
    fn empty_stream_has_no_entries() {
        let mut stream = memory_stream(Vec::new());
        assert!(stream.read_entry().unwrap().is_none());
    }

    #[test]
    fn truncated_size_is_malformed() {
        let mut stream = memory_stream(vec![1, 0]);
        assert!(matches!(
            stream.read_entry(),
            Err(CoreError::MalformedStream { .. })
        ));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let mut data = framed(&[b"complete"]);
        data.truncate(data.len() - 1);
        let mut stream = memory_stream(data);
        assert!(matches!(
            stream.read_entry(),
            Err(CoreError::MalformedStream { .. })
        ));
    }

    #[test]
    fn oversized_length_is_malformed() {
        let data = ((MAXIMUM_ENTRY_SIZE + 1) as u32).to_le_bytes().to_vec();
        let mut stream = memory_stream(data);
        assert!(matches!(
            stream.read_entry(),
            Err(CoreError::MalformedStream { .. })
        ));
    }

    #[test]
    fn seek_backwards_and_forwards() {
        let mut stream = memory_stream(framed(&[b"aa", b"bbb", b"c"]));
        while stream.read_entry().unwrap().is_some() {}

        stream.seek_entry_at_offset(1, 6).unwrap();
        assert_eq!(stream.read_entry().unwrap().unwrap(), b"bbb");
        assert_eq!(stream.entry_index(), 2);

        stream.seek_entry_at_offset(0, 0).unwrap();
        assert_eq!(stream.read_entry().unwrap().unwrap(), b"aa");

        assert!(stream.seek_entry_at_offset(9, 100).is_err());
    }

    #[test]
    fn writer_commits_on_finalize() {
        let dir = tempdir().unwrap();
        let container = ContainerDir::open(dir.path(), true).unwrap();

        let mut writer = DataStreamWriter::initialize(&container, "error_data.000001").unwrap();
        assert_eq!(writer.write_entry(b"first").unwrap(), 9);
        assert_eq!(writer.write_entry(b"second").unwrap(), 19);
        assert!(!container.has_member("error_data.000001"));

        assert_eq!(writer.finalize().unwrap(), 19);
        assert!(container.has_member("error_data.000001"));
        assert!(!container.temp_member_path("error_data.000001").exists());

        let mut stream = DataStream::open(&container, "error_data.000001").unwrap();
        assert_eq!(stream.read_entry().unwrap().unwrap(), b"first");
        assert_eq!(stream.read_entry().unwrap().unwrap(), b"second");
    }

    #[test]
    fn abort_and_drop_leave_nothing_behind() {
        let dir = tempdir().unwrap();
        let container = ContainerDir::open(dir.path(), true).unwrap();

        let mut writer = DataStreamWriter::initialize(&container, "event_data.000001").unwrap();
        writer.write_entry(b"partial").unwrap();
        writer.abort();

        {
            let mut writer =
                DataStreamWriter::initialize(&container, "event_data.000002").unwrap();
            writer.write_entry(b"partial").unwrap();
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn open_missing_member_fails() {
        let dir = tempdir().unwrap();
        let container = ContainerDir::open(dir.path(), true).unwrap();
        assert!(matches!(
            DataStream::open(&container, "event_data.000001"),
            Err(CoreError::MissingStream { .. })
        ));
    }

    #[test]
    fn unframed_payload() {
        let mut stream = memory_stream(b"legacy report".to_vec());
        assert_eq!(stream.read_unframed(1024).unwrap(), b"legacy report");

        let mut stream = memory_stream(vec![0; 16]);
        assert!(stream.read_unframed(8).is_err());
    }
}

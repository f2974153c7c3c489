//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store backing one container member.
///
/// # Invariants
///
/// - `append` returns the offset where the data starts
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - `size` is the offset the next `append` will write to
/// - `sync` makes appended data and file metadata durable
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For container members on disk
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns the offset where it
    /// was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes down to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Reads the whole store into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined or the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("store of {size} bytes does not fit in memory"),
            ))
        })?;
        self.read_at(0, len)
    }
}

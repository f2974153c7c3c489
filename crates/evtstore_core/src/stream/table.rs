//! Fixed-width tables paired with data streams.
//!
//! An offset table is an array of little-endian u32 byte offsets, a
//! timestamp table an array of little-endian i64 microsecond timestamps.
//! Entry `i` of either table describes entry `i` of the paired data stream.

use crate::dir::ContainerDir;
use crate::error::{CoreError, CoreResult};

/// A value stored in a fixed-width table.
pub trait TableValue: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Appends the little-endian encoding of `self`.
    fn encode_into(self, buf: &mut Vec<u8>);

    /// Decodes a value from exactly [`Self::WIDTH`] bytes.
    fn decode(bytes: &[u8]) -> Self;
}

impl TableValue for u32 {
    const WIDTH: usize = 4;

    fn encode_into(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Self::from_le_bytes(raw)
    }
}

impl TableValue for i64 {
    const WIDTH: usize = 8;

    fn encode_into(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Self::from_le_bytes(raw)
    }
}

/// An in-memory copy of a table member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table<V> {
    name: String,
    values: Vec<V>,
}

/// Offsets of the entries of a data stream.
pub type OffsetTable = Table<u32>;

/// Timestamps of the entries of an event data stream.
pub type TimestampTable = Table<i64>;

impl<V: TableValue> Table<V> {
    /// Creates an empty table that will be written as member `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Returns the member name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends an entry.
    pub fn push(&mut self, value: V) {
        self.values.push(value);
    }

    /// Returns entry `index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if there is no such entry.
    pub fn get(&self, index: usize) -> CoreResult<V> {
        self.values
            .get(index)
            .copied()
            .ok_or(CoreError::IndexOutOfBounds {
                index,
                len: self.values.len(),
            })
    }

    /// Returns all entries.
    #[must_use]
    pub fn values(&self) -> &[V] {
        &self.values
    }

    /// Encodes the table.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.values.len() * V::WIDTH);
        for value in &self.values {
            value.encode_into(&mut buf);
        }
        buf
    }

    /// Decodes a table member.
    ///
    /// # Errors
    ///
    /// Returns `MalformedStream` if the data is not a whole number of
    /// entries.
    pub fn decode(name: impl Into<String>, data: &[u8]) -> CoreResult<Self> {
        let name = name.into();
        if data.len() % V::WIDTH != 0 {
            return Err(CoreError::malformed_stream(
                name,
                format!(
                    "table size {} is not a multiple of the entry size {}",
                    data.len(),
                    V::WIDTH
                ),
            ));
        }
        let values = data.chunks_exact(V::WIDTH).map(V::decode).collect();
        Ok(Self { name, values })
    }

    /// Reads table member `name` of a container.
    ///
    /// # Errors
    ///
    /// Returns `MissingStream` if the member does not exist.
    pub fn read(dir: &ContainerDir, name: &str) -> CoreResult<Self> {
        let data = dir
            .read_member(name)?
            .ok_or_else(|| CoreError::missing_stream(name))?;
        Self::decode(name, &data)
    }

    /// Writes the table as a committed member of a container.
    pub fn write(&self, dir: &ContainerDir) -> CoreResult<()> {
        dir.write_member(&self.name, &self.encode())
    }
}

impl Table<i64> {
    /// Returns the index of the first timestamp at or after `timestamp`.
    ///
    /// Timestamps within one stream are non-decreasing, so this is a binary
    /// search. Returns `len()` when every timestamp is earlier.
    #[must_use]
    pub fn first_index_at_or_after(&self, timestamp: i64) -> usize {
        self.values.partition_point(|value| *value < timestamp)
    }

    /// Returns the last timestamp in the table.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.values.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn offset_table_encoding() {
        let mut table = OffsetTable::new("event_index.000001");
        table.push(0);
        table.push(0x0102_0304);

        let data = table.encode();
        assert_eq!(data, vec![0, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(OffsetTable::decode("event_index.000001", &data).unwrap(), table);
    }

    #[test]
    fn lookup_out_of_bounds() {
        let mut table = TimestampTable::new("event_timestamps.000001");
        table.push(-5);
        assert_eq!(table.get(0).unwrap(), -5);
        assert!(matches!(
            table.get(1),
            Err(CoreError::IndexOutOfBounds { index: 1, len: 1 })
        ));
    }

    #[test]
    fn partial_entry_is_malformed() {
        let result = TimestampTable::decode("event_timestamps.000001", &[0; 12]);
        assert!(matches!(result, Err(CoreError::MalformedStream { .. })));
    }

    #[test]
    fn range_start_search() {
        let mut table = TimestampTable::new("event_timestamps.000001");
        for timestamp in [10, 20, 20, 20, 30] {
            table.push(timestamp);
        }

        assert_eq!(table.first_index_at_or_after(i64::MIN), 0);
        assert_eq!(table.first_index_at_or_after(10), 0);
        assert_eq!(table.first_index_at_or_after(11), 1);
        assert_eq!(table.first_index_at_or_after(20), 1);
        assert_eq!(table.first_index_at_or_after(25), 4);
        assert_eq!(table.first_index_at_or_after(31), 5);
        assert_eq!(table.last_timestamp(), Some(30));
    }

    #[test]
    fn write_and_read_member() {
        let dir = tempdir().unwrap();
        let container = ContainerDir::open(dir.path(), true).unwrap();

        let mut table = OffsetTable::new("event_source_index.000002");
        table.push(0);
        table.push(17);
        table.write(&container).unwrap();

        let read = OffsetTable::read(&container, "event_source_index.000002").unwrap();
        assert_eq!(read.values(), &[0, 17]);

        assert!(matches!(
            OffsetTable::read(&container, "event_source_index.000003"),
            Err(CoreError::MissingStream { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn range_start_matches_linear_scan(
            mut timestamps in proptest::collection::vec(-50i64..50, 0..64),
            probe in -60i64..60,
        ) {
            timestamps.sort_unstable();
            let mut table = TimestampTable::new("event_timestamps.000001");
            for timestamp in &timestamps {
                table.push(*timestamp);
            }

            let expected = timestamps
                .iter()
                .position(|timestamp| *timestamp >= probe)
                .unwrap_or(timestamps.len());
            proptest::prop_assert_eq!(table.first_index_at_or_after(probe), expected);
        }
    }
}

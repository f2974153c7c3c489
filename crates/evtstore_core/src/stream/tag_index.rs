//! Event tag index tables.
//!
//! Each entry locates one tag record in the paired tag data stream:
//!
//! ```text
//! numeric: tag_type=1 (u8) | offset (u32) | store_number (u32) | store_index (u32)
//! uuid:    tag_type=2 (u8) | offset (u32) | length (u8) | uuid (length bytes)
//! ```
//!
//! All integers are little-endian.

use crate::containers::EventIdentifier;
use crate::dir::ContainerDir;
use crate::error::{CoreError, CoreResult};

const TAG_TYPE_NUMERIC: u8 = 1;
const TAG_TYPE_UUID: u8 = 2;

/// One entry of a tag index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexEntry {
    /// Offset of the tag record in the tag data stream.
    pub offset: u32,
    /// The tagged event.
    pub identifier: EventIdentifier,
}

/// An in-memory copy of a tag index member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexTable {
    name: String,
    entries: Vec<TagIndexEntry>,
}

impl TagIndexTable {
    /// Creates an empty table that will be written as member `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Returns the member name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entries in write order.
    #[must_use]
    pub fn entries(&self) -> &[TagIndexEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry.
    pub fn push(&mut self, offset: u32, identifier: EventIdentifier) {
        self.entries.push(TagIndexEntry { offset, identifier });
    }

    /// Encodes the table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a UUID is longer than 255 bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        for entry in &self.entries {
            match &entry.identifier {
                EventIdentifier::Position {
                    store_number,
                    store_index,
                } => {
                    buf.push(TAG_TYPE_NUMERIC);
                    buf.extend_from_slice(&entry.offset.to_le_bytes());
                    buf.extend_from_slice(&store_number.to_le_bytes());
                    buf.extend_from_slice(&store_index.to_le_bytes());
                }
                EventIdentifier::Uuid(uuid) => {
                    let len = u8::try_from(uuid.len()).map_err(|_| {
                        CoreError::invalid_operation(format!(
                            "event uuid of {} bytes is too long to index",
                            uuid.len()
                        ))
                    })?;
                    buf.push(TAG_TYPE_UUID);
                    buf.extend_from_slice(&entry.offset.to_le_bytes());
                    buf.push(len);
                    buf.extend_from_slice(uuid.as_bytes());
                }
            }
        }
        Ok(buf)
    }

    /// Decodes a tag index member.
    ///
    /// # Errors
    ///
    /// Returns `MalformedStream` on an unknown tag type, a truncated entry
    /// or a UUID that is not UTF-8.
    pub fn decode(name: impl Into<String>, data: &[u8]) -> CoreResult<Self> {
        let name = name.into();
        let mut entries = Vec::new();
        let mut cursor = Cursor {
            name: &name,
            data,
            pos: 0,
        };

        while !cursor.is_at_end() {
            let tag_type = cursor.u8()?;
            let offset = cursor.u32()?;
            let identifier = match tag_type {
                TAG_TYPE_NUMERIC => EventIdentifier::Position {
                    store_number: cursor.u32()?,
                    store_index: cursor.u32()?,
                },
                TAG_TYPE_UUID => {
                    let len = usize::from(cursor.u8()?);
                    let bytes = cursor.take(len)?;
                    let uuid = std::str::from_utf8(bytes).map_err(|_| {
                        CoreError::malformed_stream(&name, "event uuid is not valid UTF-8")
                    })?;
                    EventIdentifier::Uuid(uuid.to_string())
                }
                other => {
                    return Err(CoreError::malformed_stream(
                        &name,
                        format!("unsupported tag type {other}"),
                    ));
                }
            };
            entries.push(TagIndexEntry { offset, identifier });
        }

        Ok(Self { name, entries })
    }

    /// Reads tag index member `name` of a container.
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
        dir.write_member(&self.name, &self.encode()?)
    }
}

struct Cursor<'a> {
    name: &'a str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(CoreError::malformed_stream(
                self.name,
                format!("truncated tag index entry at offset {}", self.pos),
            ));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

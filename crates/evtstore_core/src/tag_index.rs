//! In-memory index of stored event tags.

use crate::containers::EventIdentifier;
use crate::dir::ContainerDir;
use crate::error::CoreResult;
use crate::layout::{Layout, StreamKind};
use crate::stream::TagIndexTable;
use std::collections::HashMap;
use tracing::debug;

/// Location of a stored tag record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagLocation {
    /// Tag data stream holding the record.
    pub stream_number: u32,
    /// Offset of the record in that stream.
    pub offset: u32,
}

/// Maps event identifiers to the location of their most recent tag.
///
/// Built lazily on first lookup from the tag index members of the streams
/// below the container's next tag stream number. Tag writes invalidate it;
/// it is never patched incrementally.
#[derive(Debug, Default)]
pub struct EventTagIndex {
    locations: Option<HashMap<EventIdentifier, TagLocation>>,
}

impl EventTagIndex {
    /// Creates an index that is not built yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the index is built.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.locations.is_some()
    }

    /// Discards the index so the next lookup rebuilds it.
    pub fn invalidate(&mut self) {
        self.locations = None;
    }

    /// Builds the index from tag streams `1..next_stream_number` if needed.
    /// Later tag streams, and later entries within a stream, take
    /// precedence.
    pub fn ensure_built(
        &mut self,
        dir: &ContainerDir,
        layout: Layout,
        next_stream_number: u32,
    ) -> CoreResult<()> {
        if self.locations.is_some() {
            return Ok(());
        }

        let mut locations = HashMap::new();
        let stream_numbers = dir.stream_numbers(layout, StreamKind::EventTagIndex)?;
        for stream_number in stream_numbers
            .into_iter()
            .filter(|number| *number < next_stream_number)
        {
            let name = layout.stream_name(StreamKind::EventTagIndex, stream_number);
            let table = TagIndexTable::read(dir, &name)?;
            for entry in table.entries() {
                locations.insert(
                    entry.identifier.clone(),
                    TagLocation {
                        stream_number,
                        offset: entry.offset,
                    },
                );
            }
        }

        debug!(entries = locations.len(), "built event tag index");
        self.locations = Some(locations);
        Ok(())
    }

    /// Returns the location of the tag stored under exactly `identifier`.
    pub fn get(
        &mut self,
        dir: &ContainerDir,
        layout: Layout,
        next_stream_number: u32,
        identifier: &EventIdentifier,
    ) -> CoreResult<Option<TagLocation>> {
        self.ensure_built(dir, layout, next_stream_number)?;
        Ok(self
            .locations
            .as_ref()
            .and_then(|locations| locations.get(identifier).copied()))
    }

    /// Looks up the tag of an event by position first, then by UUID.
    pub fn lookup(
        &mut self,
        dir: &ContainerDir,
        layout: Layout,
        next_stream_number: u32,
        store_number: u32,
        store_index: u32,
        uuid: Option<&str>,
    ) -> CoreResult<Option<TagLocation>> {
        self.ensure_built(dir, layout, next_stream_number)?;
        let Some(locations) = self.locations.as_ref() else {
            return Ok(None);
        };

        let position = EventIdentifier::Position {
            store_number,
            store_index,
        };
        if let Some(location) = locations.get(&position) {
            return Ok(Some(*location));
        }
        Ok(uuid.and_then(|uuid| {
            locations
                .get(&EventIdentifier::Uuid(uuid.to_string()))
                .copied()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn container_with_tags() -> (tempfile::TempDir, ContainerDir) {
        let temp = tempdir().unwrap();
        let dir = ContainerDir::open(temp.path(), true).unwrap();
        let layout = Layout::default();

        let mut first = TagIndexTable::new(layout.stream_name(StreamKind::EventTagIndex, 1));
        first.push(
            0,
            EventIdentifier::Position {
                store_number: 1,
                store_index: 0,
            },
        );
        first.push(30, EventIdentifier::Uuid("uuid-a".to_string()));
        first.write(&dir).unwrap();

        let mut second = TagIndexTable::new(layout.stream_name(StreamKind::EventTagIndex, 2));
        second.push(12, EventIdentifier::Uuid("uuid-a".to_string()));
        second.write(&dir).unwrap();

        (temp, dir)
    }

    #[test]
    fn lookup_prefers_position_then_uuid() {
        let (_temp, dir) = container_with_tags();
        let mut index = EventTagIndex::new();
        let layout = Layout::default();

        let found = index.lookup(&dir, layout, 4, 1, 0, Some("uuid-a")).unwrap();
        assert_eq!(
            found,
            Some(TagLocation {
                stream_number: 1,
                offset: 0
            })
        );

        let found = index.lookup(&dir, layout, 4, 4, 4, Some("uuid-a")).unwrap();
        assert_eq!(
            found,
            Some(TagLocation {
                stream_number: 2,
                offset: 12
            })
        );

        assert_eq!(index.lookup(&dir, layout, 4, 9, 9, None).unwrap(), None);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let (_temp, dir) = container_with_tags();
        let layout = Layout::default();
        let mut index = EventTagIndex::new();
        assert!(!index.is_built());

        index.ensure_built(&dir, layout, 4).unwrap();
        assert!(index.is_built());

        let mut third = TagIndexTable::new(layout.stream_name(StreamKind::EventTagIndex, 3));
        third.push(
            0,
            EventIdentifier::Position {
                store_number: 9,
                store_index: 9,
            },
        );
        third.write(&dir).unwrap();
        assert_eq!(index.lookup(&dir, layout, 4, 9, 9, None).unwrap(), None);

        index.invalidate();
        assert!(index.lookup(&dir, layout, 4, 9, 9, None).unwrap().is_some());
    }

    #[test]
    fn streams_past_the_limit_are_ignored() {
        let (_temp, dir) = container_with_tags();
        let layout = Layout::default();
        let mut index = EventTagIndex::new();

        let found = index.lookup(&dir, layout, 2, 4, 4, Some("uuid-a")).unwrap();
        assert_eq!(
            found,
            Some(TagLocation {
                stream_number: 1,
                offset: 30
            })
        );

        index.invalidate();
        assert_eq!(index.lookup(&dir, layout, 1, 1, 0, None).unwrap(), None);
    }
}

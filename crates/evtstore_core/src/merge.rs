//! Chronological merge of event streams.
//!
//! Every event stream is sorted by timestamp, but streams are not ordered
//! relative to each other. [`MergeReader`] keeps a min-heap holding, per
//! stream, the run of events sharing the stream's next timestamp, and yields
//! events ordered by `(timestamp, stream_number, entry_index)`. A stream is
//! refilled only once its whole run has been popped, so at most one run plus
//! one read-ahead event per stream is held in memory.

use crate::cache::TableCache;
use crate::containers::Event;
use crate::dir::ContainerDir;
use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, StreamKind};
use crate::serializer::SerializationFormat;
use crate::stream::{DataStream, OffsetTable, TimestampTable};
use crate::types::TimeRange;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Access to the committed event streams of a container.
#[derive(Debug)]
pub struct EventStreams {
    dir: ContainerDir,
    layout: Layout,
    format: SerializationFormat,
    offset_tables: TableCache<OffsetTable>,
    timestamp_tables: TableCache<TimestampTable>,
    streams: HashMap<u32, DataStream>,
}

impl EventStreams {
    /// Creates stream access with table caches of `cached_tables` entries.
    #[must_use]
    pub fn new(
        dir: ContainerDir,
        layout: Layout,
        format: SerializationFormat,
        cached_tables: usize,
    ) -> Self {
        Self {
            dir,
            layout,
            format,
            offset_tables: TableCache::new(cached_tables),
            timestamp_tables: TableCache::new(cached_tables),
            streams: HashMap::new(),
        }
    }

    /// Returns the offset table of an event stream.
    pub fn offset_table(&mut self, stream_number: u32) -> CoreResult<Arc<OffsetTable>> {
        let name = self.layout.stream_name(StreamKind::EventIndex, stream_number);
        let dir = &self.dir;
        self.offset_tables
            .get_or_try_insert(stream_number, || OffsetTable::read(dir, &name))
    }

    /// Returns the timestamp table of an event stream, or `None` if the
    /// stream has no timestamp table.
    pub fn timestamp_table(
        &mut self,
        stream_number: u32,
    ) -> CoreResult<Option<Arc<TimestampTable>>> {
        let name = self
            .layout
            .stream_name(StreamKind::EventTimestamps, stream_number);
        if !self.timestamp_tables.contains(stream_number) && !self.dir.has_member(&name) {
            return Ok(None);
        }
        let dir = &self.dir;
        self.timestamp_tables
            .get_or_try_insert(stream_number, || TimestampTable::read(dir, &name))
            .map(Some)
    }

    fn stream(&mut self, stream_number: u32) -> CoreResult<&mut DataStream> {
        if !self.streams.contains_key(&stream_number) {
            let name = self.layout.stream_name(StreamKind::EventData, stream_number);
            let stream = DataStream::open(&self.dir, &name)?;
            self.streams.insert(stream_number, stream);
        }
        self.streams.get_mut(&stream_number).ok_or_else(|| {
            CoreError::missing_stream(self.layout.stream_name(StreamKind::EventData, stream_number))
        })
    }

    /// Positions event stream `stream_number` at entry `entry_index`.
    ///
    /// Without an offset table the stream is left at its first entry.
    pub fn seek(&mut self, stream_number: u32, entry_index: u32) -> CoreResult<()> {
        let index_name = self.layout.stream_name(StreamKind::EventIndex, stream_number);
        if !self.offset_tables.contains(stream_number) && !self.dir.has_member(&index_name) {
            debug!(stream = stream_number, "no offset table, reading from start");
            return self.stream(stream_number)?.seek_entry_at_offset(0, 0);
        }
        let table = self.offset_table(stream_number)?;
        let offset = table.get(entry_index as usize)?;
        self.stream(stream_number)?
            .seek_entry_at_offset(entry_index, u64::from(offset))
    }

    /// Reads the next event of a stream, with its read-side identity set.
    pub fn read_next(&mut self, stream_number: u32) -> CoreResult<Option<Event>> {
        let format = self.format;
        let stream = self.stream(stream_number)?;
        let entry_index = stream.entry_index();
        let Some(data) = stream.read_entry()? else {
            return Ok(None);
        };
        let mut event: Event = format.deserialize(&data)?;
        event.store_number = Some(stream_number);
        event.store_index = Some(entry_index);
        Ok(Some(event))
    }

    /// Reads entry `entry_index` of a stream.
    pub fn read_at(&mut self, stream_number: u32, entry_index: u32) -> CoreResult<Option<Event>> {
        self.seek(stream_number, entry_index)?;
        self.read_next(stream_number)
    }

    /// Closes every open data stream.
    pub fn close_streams(&mut self) {
        self.streams.clear();
    }
}

#[derive(Debug)]
struct MergeEntry {
    timestamp: i64,
    stream_number: u32,
    entry_index: u32,
    event: Event,
}

impl MergeEntry {
    fn new(stream_number: u32, event: Event) -> Self {
        Self {
            timestamp: event.timestamp,
            stream_number,
            entry_index: event.store_index.unwrap_or_default(),
            event,
        }
    }

    fn key(&self) -> (i64, u32, u32) {
        (self.timestamp, self.stream_number, self.entry_index)
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// K-way merge over the event streams of one container.
#[derive(Debug)]
pub struct MergeReader {
    heap: BinaryHeap<Reverse<MergeEntry>>,
    time_range: Option<TimeRange>,
    // Heap entries per stream.
    pending: HashMap<u32, usize>,
    // First event past each stream's current run.
    lookahead: HashMap<u32, Event>,
}

impl MergeReader {
    /// Seeds the heap from event streams `1..next_stream_number`.
    ///
    /// # Errors
    ///
    /// Returns `MissingStream` if a data stream in that range is absent.
    pub fn initialize(
        streams: &mut EventStreams,
        next_stream_number: u32,
        time_range: Option<TimeRange>,
    ) -> CoreResult<Self> {
        let mut reader = Self {
            heap: BinaryHeap::new(),
            time_range,
            pending: HashMap::new(),
            lookahead: HashMap::new(),
        };

        for stream_number in 1..next_stream_number {
            let mut start_index = 0;
            if let Some(range) = time_range {
                if let Some(table) = streams.timestamp_table(stream_number)? {
                    match table.last_timestamp() {
                        None => continue,
                        Some(last) if last < range.start_timestamp => continue,
                        Some(_) => {}
                    }
                    start_index = table.first_index_at_or_after(range.start_timestamp);
                }
            }

            if start_index > 0 {
                let entry_index = u32::try_from(start_index).map_err(|_| {
                    CoreError::IndexOutOfBounds {
                        index: start_index,
                        len: u32::MAX as usize,
                    }
                })?;
                streams.seek(stream_number, entry_index)?;
            }
            reader.fill(streams, stream_number)?;
        }

        debug!(
            streams = next_stream_number.saturating_sub(1),
            seeded = reader.heap.len(),
            "initialized merge reader"
        );
        Ok(reader)
    }

    /// Returns the next event of a stream within the time range, taking the
    /// read-ahead event first.
    fn next_in_range(
        &mut self,
        streams: &mut EventStreams,
        stream_number: u32,
    ) -> CoreResult<Option<Event>> {
        loop {
            let event = match self.lookahead.remove(&stream_number) {
                Some(event) => event,
                None => match streams.read_next(stream_number)? {
                    Some(event) => event,
                    None => return Ok(None),
                },
            };
            if let Some(range) = self.time_range {
                if event.timestamp < range.start_timestamp {
                    continue;
                }
                if event.timestamp > range.end_timestamp {
                    return Ok(None);
                }
            }
            return Ok(Some(event));
        }
    }

    /// Pushes the next run of equal-timestamp events of a stream. The first
    /// event with a different timestamp is kept aside for the next run.
    fn fill(&mut self, streams: &mut EventStreams, stream_number: u32) -> CoreResult<()> {
        let Some(first) = self.next_in_range(streams, stream_number)? else {
            self.pending.remove(&stream_number);
            return Ok(());
        };

        let timestamp = first.timestamp;
        self.heap.push(Reverse(MergeEntry::new(stream_number, first)));
        let mut run_length = 1;

        while let Some(event) = streams.read_next(stream_number)? {
            if event.timestamp != timestamp {
                self.lookahead.insert(stream_number, event);
                break;
            }
            self.heap.push(Reverse(MergeEntry::new(stream_number, event)));
            run_length += 1;
        }
        self.pending.insert(stream_number, run_length);
        Ok(())
    }

    /// Returns the next event in chronological order, or `None` once every
    /// stream is drained or the range end is passed.
    pub fn next_event(&mut self, streams: &mut EventStreams) -> CoreResult<Option<Event>> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(range) = self.time_range {
            if entry.timestamp > range.end_timestamp {
                self.heap.clear();
                self.pending.clear();
                self.lookahead.clear();
                return Ok(None);
            }
        }

        let run_drained = match self.pending.get_mut(&entry.stream_number) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        };
        if run_drained {
            self.fill(streams, entry.stream_number)?;
        }
        Ok(Some(entry.event))
    }

    /// Number of events held in memory: heap entries plus read-ahead
    /// events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.heap.len() + self.lookahead.len()
    }
}

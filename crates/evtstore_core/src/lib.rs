//! # evtstore core
//!
//! Storage containers for time-stamped forensic event records.
//!
//! A container is a directory of numbered members: length-prefixed data
//! streams, with offset and timestamp tables paired to them, written by
//! many workers and replayed in global chronological order.
//!
//! This crate provides:
//! - Record containers and their serialization ([`Event`], [`EventTag`], ...)
//! - Length-prefixed data streams and fixed-width tables
//! - Write buffers flushed to new streams past a size threshold
//! - A k-way merge reader yielding events by `(timestamp, stream, index)`
//! - An event tag index keyed by event position or UUID
//! - [`StorageReader`] and [`StorageWriter`], including the task storage
//!   protocol that merges per-worker task containers into a session
//!
//! ## Example
//!
//! ```rust,no_run
//! use evtstore_core::{Config, Event, Session, StorageReader, StorageWriter};
//! use std::path::Path;
//!
//! let path = Path::new("case.evtstore");
//! let mut writer = StorageWriter::open_session(Session::new(), path, Config::default())?;
//! writer.write_session_start()?;
//! writer.add_event(&Event::new(1_465_000_000_000_000, "fs:stat"))?;
//! writer.write_session_completion()?;
//! writer.close()?;
//!
//! let mut reader = StorageReader::open(path)?;
//! for event in reader.get_events(None)? {
//!     let event = event?;
//!     println!("{} {}", event.timestamp, event.data_type);
//! }
//! # Ok::<(), evtstore_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod cache;
mod config;
mod containers;
mod dir;
mod error;
mod iter;
mod layout;
mod merge;
mod metadata;
mod reader;
mod serializer;
mod storage_file;
mod stream;
mod tag_index;
mod types;
mod writer;

pub use buffer::{
    ContainersList, OrderedBuffer, SerializedEventsHeap, SerializedTagsHeap, TagSortKey,
};
pub use cache::TableCache;
pub use config::{Config, DEFAULT_CACHED_TABLES, MAXIMUM_BUFFER_SIZE};
pub use containers::{
    current_timestamp, AnalysisReport, AttributeContainer, AttributeValue, Event,
    EventIdentifier, EventSource, EventTag, ExtractionError, Session, SessionCompletion,
    SessionRecord, SessionStart, Task, TaskCompletion, TaskStart,
};
pub use dir::{ContainerDir, WorkingCopy};
pub use error::{CoreError, CoreResult};
pub use iter::{ContainerIter, MAXIMUM_LEGACY_REPORT_SIZE};
pub use layout::{
    Layout, StreamKind, LEGACY_SERIALIZER_MEMBER, METADATA_MEMBER, TEMP_SUFFIX,
};
pub use merge::{EventStreams, MergeReader};
pub use metadata::{StorageMetadata, METADATA_SECTION};
pub use reader::StorageReader;
pub use serializer::SerializationFormat;
pub use storage_file::{Events, StorageFile};
pub use stream::{
    DataStream, DataStreamWriter, OffsetTable, Table, TableValue, TagIndexEntry,
    TagIndexTable, TimestampTable, ENTRY_HEADER_SIZE, MAXIMUM_ENTRY_SIZE,
};
pub use tag_index::{EventTagIndex, TagLocation};
pub use types::{
    StorageType, TimeRange, COMPATIBLE_FORMAT_VERSION, FORMAT_VERSION, LEGACY_FORMAT_VERSION,
};
pub use writer::{StorageWriter, WriterCounters, TASK_STORAGE_EXTENSION};

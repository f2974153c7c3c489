//! The storage file: one container opened for reading or writing.

use crate::buffer::{ContainersList, SerializedEventsHeap, SerializedTagsHeap, TagSortKey};
use crate::cache::TableCache;
use crate::config::Config;
use crate::containers::{
    AnalysisReport, AttributeContainer, Event, EventSource, EventTag, ExtractionError,
    SessionCompletion, SessionRecord, SessionStart, TaskCompletion, TaskStart,
};
use crate::dir::{ContainerDir, WorkingCopy};
use crate::error::{CoreError, CoreResult};
use crate::iter::{read_marker, ContainerIter};
use crate::layout::{Layout, StreamKind, LEGACY_SERIALIZER_MEMBER, METADATA_MEMBER};
use crate::merge::{EventStreams, MergeReader};
use crate::metadata::StorageMetadata;
use crate::serializer::SerializationFormat;
use crate::stream::{DataStream, DataStreamWriter, OffsetTable, TagIndexTable, TimestampTable};
use crate::tag_index::{EventTagIndex, TagLocation};
use crate::types::{StorageType, TimeRange, FORMAT_VERSION, LEGACY_FORMAT_VERSION};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// A container of event records.
///
/// A storage file is created closed and is opened either read-only or for
/// writing. Writes are buffered in memory and flushed to new numbered
/// streams when a buffer passes the configured size, and on
/// [`StorageFile::flush`] and [`StorageFile::close`]. Reads only see
/// flushed streams.
///
/// A container opened for writing is modified in a hidden working copy and
/// moved back to its path on a successful close. If the final flush fails,
/// the working copy is left in place.
///
/// # Example
///
/// ```rust,no_run
/// use evtstore_core::{Config, Event, StorageFile, StorageType};
/// use std::path::Path;
///
/// let mut storage = StorageFile::new(Config::default(), StorageType::Session)?;
/// storage.open(Path::new("case.evtstore"), false)?;
/// storage.add_event(&Event::new(1_465_000_000_000_000, "fs:stat"))?;
/// storage.close()?;
///
/// storage.open(Path::new("case.evtstore"), true)?;
/// for event in storage.get_events(None)? {
///     println!("{}", event?.timestamp);
/// }
/// # Ok::<(), evtstore_core::CoreError>(())
/// ```
#[derive(Debug)]
pub struct StorageFile {
    config: Config,
    storage_type: StorageType,
    open: Option<OpenStorage>,
}

impl StorageFile {
    /// Creates a closed storage file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is out of range.
    pub fn new(config: Config, storage_type: StorageType) -> CoreResult<Self> {
        Ok(Self {
            config: config.validate()?,
            storage_type,
            open: None,
        })
    }

    /// Returns the storage type. For a container opened read-only this is
    /// the type recorded in the container.
    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a container is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Whether the open container is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.open.as_ref().is_some_and(|storage| storage.read_only)
    }

    /// Format version of the open container.
    #[must_use]
    pub fn format_version(&self) -> Option<i64> {
        self.open.as_ref().map(|storage| storage.format_version)
    }

    /// Serialization format of the open container.
    #[must_use]
    pub fn serialization_format(&self) -> Option<SerializationFormat> {
        self.open.as_ref().map(|storage| storage.format)
    }

    /// Path the open container is read from or written to.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.open.as_ref().map(|storage| storage.dir.path())
    }

    /// Path a container opened for writing is moved back to on close.
    #[must_use]
    pub fn committed_path(&self) -> Option<&Path> {
        self.open
            .as_ref()
            .and_then(|storage| storage.working_copy.as_ref())
            .map(WorkingCopy::final_path)
    }

    /// Opens the container at `path`.
    ///
    /// Opening for writing creates the container if it does not exist.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if a container is already open, or when opening
    ///   for writing a container of another storage type, an older format
    ///   version or the legacy layout
    /// - `ContainerNotFound` when opening a missing container read-only
    /// - `UnsupportedFormatVersion` / `UnsupportedSerialization` /
    ///   `InvalidFormat` for unreadable metadata
    pub fn open(&mut self, path: &Path, read_only: bool) -> CoreResult<()> {
        if self.open.is_some() {
            return Err(CoreError::invalid_operation("storage file already opened"));
        }

        let storage = if read_only {
            OpenStorage::open_read(path, &self.config)?
        } else {
            OpenStorage::open_write(path, &self.config, self.storage_type)?
        };
        if read_only {
            self.storage_type = storage.storage_type;
        }

        debug!(
            path = %path.display(),
            read_only,
            storage_type = %storage.storage_type,
            format_version = storage.format_version,
            "opened storage file"
        );
        self.open = Some(storage);
        Ok(())
    }

    /// Flushes every buffer and closes the container.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no container is open. If the final
    /// flush fails the container is closed without being moved back from
    /// its working copy and the flush error is returned.
    pub fn close(&mut self) -> CoreResult<()> {
        let mut storage = self
            .open
            .take()
            .ok_or_else(|| CoreError::invalid_operation("storage file not opened"))?;

        if !storage.read_only {
            storage.flush_all()?;
        }
        storage.event_streams.close_streams();
        storage.tag_streams.clear();

        if let Some(working_copy) = storage.working_copy.take() {
            let path = working_copy.commit()?;
            debug!(path = %path.display(), "closed storage file");
        }
        Ok(())
    }

    /// Flushes every non-empty buffer to new streams.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.writable()?.flush_all()
    }

    fn storage(&self) -> CoreResult<&OpenStorage> {
        self.open
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("storage file not opened"))
    }

    fn storage_mut(&mut self) -> CoreResult<&mut OpenStorage> {
        self.open
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("storage file not opened"))
    }

    fn writable(&mut self) -> CoreResult<&mut OpenStorage> {
        let storage = self.storage_mut()?;
        if storage.read_only {
            return Err(CoreError::invalid_operation(
                "storage file opened in read-only mode",
            ));
        }
        Ok(storage)
    }

    /// Adds an event.
    pub fn add_event(&mut self, event: &Event) -> CoreResult<()> {
        self.writable()?.add_event(event)
    }

    /// Adds an event source, stamped with the current storage session.
    pub fn add_event_source(&mut self, event_source: &EventSource) -> CoreResult<()> {
        self.writable()?.add_event_source(event_source)
    }

    /// Adds an extraction error, stamped with the current storage session.
    pub fn add_error(&mut self, error: &ExtractionError) -> CoreResult<()> {
        self.writable()?.add_error(error)
    }

    /// Adds an event tag.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the tag identifies no event.
    pub fn add_event_tag(&mut self, event_tag: &EventTag) -> CoreResult<()> {
        self.writable()?.add_event_tag(event_tag)
    }

    /// Adds a batch of event tags.
    ///
    /// Each tag is merged with the tag already stored for its event, the tag
    /// buffer is flushed and the tag index is invalidated.
    pub fn add_event_tags(&mut self, event_tags: &[EventTag]) -> CoreResult<()> {
        self.writable()?.add_event_tags(event_tags)
    }

    /// Adds an analysis report.
    pub fn add_analysis_report(&mut self, analysis_report: &AnalysisReport) -> CoreResult<()> {
        self.writable()?.add_analysis_report(analysis_report)
    }

    /// Returns the events in chronological order, optionally limited to an
    /// inclusive time range. Every event carries its tag, if any.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if events were already read since the
    /// container was opened.
    pub fn get_events(&mut self, time_range: Option<TimeRange>) -> CoreResult<Events<'_>> {
        let storage = self.storage_mut()?;
        match storage.merge {
            MergeState::NotStarted => {}
            MergeState::Active(_) | MergeState::Exhausted => {
                return Err(CoreError::invalid_operation(
                    "events can only be read once per open",
                ));
            }
        }
        let reader = MergeReader::initialize(
            &mut storage.event_streams,
            storage.next_event_stream,
            time_range,
        );
        storage.merge = match reader {
            Ok(reader) => MergeState::Active(reader),
            Err(err) => {
                storage.merge = MergeState::Exhausted;
                return Err(err);
            }
        };
        Ok(Events { storage })
    }

    /// Returns the event sources in stream order.
    pub fn get_event_sources(&self) -> CoreResult<ContainerIter<'_, EventSource>> {
        Ok(self.storage()?.iter(StreamKind::EventSourceData))
    }

    /// Returns the extraction errors in stream order.
    pub fn get_errors(&self) -> CoreResult<ContainerIter<'_, ExtractionError>> {
        Ok(self.storage()?.iter(StreamKind::ErrorData))
    }

    /// Returns the event tags in stream order.
    pub fn get_event_tags(&self) -> CoreResult<ContainerIter<'_, EventTag>> {
        Ok(self.storage()?.iter(StreamKind::EventTagData))
    }

    /// Returns the analysis reports in stream order.
    pub fn get_analysis_reports(&self) -> CoreResult<ContainerIter<'_, AnalysisReport>> {
        Ok(self.storage()?.iter(StreamKind::AnalysisReportData))
    }

    /// Returns every session start with its completion, if the session was
    /// completed.
    pub fn get_sessions(
        &self,
    ) -> CoreResult<impl Iterator<Item = CoreResult<SessionRecord>> + '_> {
        let storage = self.storage()?;
        let numbers = storage
            .dir
            .stream_numbers(storage.layout, StreamKind::SessionStart)?;
        Ok(numbers
            .into_iter()
            .map(move |number| storage.read_session(number)))
    }

    /// Returns the tag stored for an event, looked up by position first and
    /// then by UUID.
    pub fn get_event_tag(
        &mut self,
        store_number: u32,
        store_index: u32,
        uuid: Option<&str>,
    ) -> CoreResult<Option<EventTag>> {
        self.storage_mut()?
            .get_event_tag(store_number, store_index, uuid)
    }

    /// Returns the event source at `index`, counting flushed streams first
    /// and then the unflushed buffer.
    pub fn get_event_source_by_index(&mut self, index: usize) -> CoreResult<Option<EventSource>> {
        self.storage_mut()?.get_event_source_by_index(index)
    }

    /// Number of event sources, flushed and buffered.
    pub fn get_number_of_event_sources(&mut self) -> CoreResult<usize> {
        self.storage_mut()?.get_number_of_event_sources()
    }

    /// Whether the container holds event tags.
    pub fn has_event_tags(&self) -> CoreResult<bool> {
        let storage = self.storage()?;
        Ok(storage.next_event_tag_stream > 1 || !storage.event_tags.is_empty())
    }

    /// Whether the container holds analysis reports.
    pub fn has_analysis_reports(&self) -> CoreResult<bool> {
        let storage = self.storage()?;
        Ok(storage.next_analysis_report_stream > 1 || !storage.analysis_reports.is_empty())
    }

    /// Writes the start marker of a new session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` on a task container or if the marker
    /// already exists.
    pub fn write_session_start(&mut self, session_start: &SessionStart) -> CoreResult<()> {
        let storage = self.writable()?;
        storage.require_storage_type(StorageType::Session)?;
        let number = storage.last_session + 1;
        storage.write_marker(StreamKind::SessionStart, number, session_start)?;
        storage.last_session = number;
        Ok(())
    }

    /// Writes the completion marker of the current session.
    pub fn write_session_completion(
        &mut self,
        session_completion: &SessionCompletion,
    ) -> CoreResult<()> {
        let storage = self.writable()?;
        storage.require_storage_type(StorageType::Session)?;
        if storage.last_session == 0 {
            return Err(CoreError::invalid_operation("no session started"));
        }
        let number = storage.last_session;
        storage.write_marker(StreamKind::SessionCompletion, number, session_completion)
    }

    /// Writes the start marker of a new task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` on a session container or if the marker
    /// already exists.
    pub fn write_task_start(&mut self, task_start: &TaskStart) -> CoreResult<()> {
        let storage = self.writable()?;
        storage.require_storage_type(StorageType::Task)?;
        let number = storage.last_task + 1;
        storage.write_marker(StreamKind::TaskStart, number, task_start)?;
        storage.last_task = number;
        Ok(())
    }

    /// Writes the completion marker of the current task.
    pub fn write_task_completion(&mut self, task_completion: &TaskCompletion) -> CoreResult<()> {
        let storage = self.writable()?;
        storage.require_storage_type(StorageType::Task)?;
        if storage.last_task == 0 {
            return Err(CoreError::invalid_operation("no task started"));
        }
        let number = storage.last_task;
        storage.write_marker(StreamKind::TaskCompletion, number, task_completion)
    }
}

impl Drop for StorageFile {
    fn drop(&mut self) {
        if self.open.is_some() {
            if let Err(err) = self.close() {
                warn!(error = %err, "unable to close storage file");
            }
        }
    }
}

/// Events in chronological order; see [`StorageFile::get_events`].
#[derive(Debug)]
pub struct Events<'a> {
    storage: &'a mut OpenStorage,
}

impl Iterator for Events<'_> {
    type Item = CoreResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.storage.next_event().transpose()
    }
}

#[derive(Debug)]
enum MergeState {
    NotStarted,
    Active(MergeReader),
    Exhausted,
}

#[derive(Debug)]
struct OpenStorage {
    dir: ContainerDir,
    working_copy: Option<WorkingCopy>,
    read_only: bool,
    format_version: i64,
    layout: Layout,
    format: SerializationFormat,
    storage_type: StorageType,
    maximum_buffer_size: usize,

    next_error_stream: u32,
    next_event_stream: u32,
    next_event_source_stream: u32,
    next_event_tag_stream: u32,
    next_analysis_report_stream: u32,
    last_session: u32,
    last_task: u32,

    errors: ContainersList,
    event_sources: ContainersList,
    analysis_reports: ContainersList,
    events: SerializedEventsHeap,
    event_tags: SerializedTagsHeap,

    event_streams: EventStreams,
    event_source_offset_tables: TableCache<OffsetTable>,
    tag_index: EventTagIndex,
    tag_streams: HashMap<u32, DataStream>,
    merge: MergeState,
}

impl OpenStorage {
    fn open_read(path: &Path, config: &Config) -> CoreResult<Self> {
        let dir = ContainerDir::open(path, false)?;
        let metadata = match read_metadata(&dir)? {
            Some(metadata) => metadata,
            None => {
                warn!(path = %path.display(), "storage file does not contain a metadata stream");
                StorageMetadata::new(config.serialization_format, StorageType::Session)
            }
        };
        Self::from_parts(dir, None, true, &metadata, config)
    }

    fn open_write(path: &Path, config: &Config, storage_type: StorageType) -> CoreResult<Self> {
        let working_copy = WorkingCopy::create(path)?;
        match Self::prepare_write(working_copy.path(), config, storage_type) {
            Ok(mut storage) => {
                storage.working_copy = Some(working_copy);
                Ok(storage)
            }
            Err(err) => {
                if let Err(restore) = working_copy.commit() {
                    warn!(path = %path.display(), error = %restore, "unable to restore container");
                }
                Err(err)
            }
        }
    }

    fn prepare_write(
        working_path: &Path,
        config: &Config,
        storage_type: StorageType,
    ) -> CoreResult<Self> {
        let dir = ContainerDir::open(working_path, true)?;
        let metadata = match read_metadata(&dir)? {
            Some(metadata) => {
                if metadata.format_version == LEGACY_FORMAT_VERSION {
                    return Err(CoreError::invalid_operation(
                        "legacy storage files can only be opened read-only",
                    ));
                }
                if metadata.format_version != FORMAT_VERSION {
                    return Err(CoreError::invalid_operation(format!(
                        "unable to append to storage file of format version {}",
                        metadata.format_version
                    )));
                }
                if metadata.storage_type != storage_type {
                    return Err(CoreError::invalid_operation(format!(
                        "storage file is a {} container, not a {storage_type} container",
                        metadata.storage_type
                    )));
                }
                metadata
            }
            None => {
                let metadata = StorageMetadata::new(config.serialization_format, storage_type);
                dir.write_member(METADATA_MEMBER, &metadata.encode())?;
                metadata
            }
        };
        Self::from_parts(dir, None, false, &metadata, config)
    }

    fn from_parts(
        dir: ContainerDir,
        working_copy: Option<WorkingCopy>,
        read_only: bool,
        metadata: &StorageMetadata,
        config: &Config,
    ) -> CoreResult<Self> {
        let layout = Layout::for_version(metadata.format_version);
        let last = |kind| dir.last_stream_number(layout, kind);

        let last_session_start = last(StreamKind::SessionStart)?;
        if last_session_start != last(StreamKind::SessionCompletion)? {
            warn!(path = %dir.path().display(), "detected unclosed session");
        }
        let last_task_start = last(StreamKind::TaskStart)?;
        if last_task_start != last(StreamKind::TaskCompletion)? {
            warn!(path = %dir.path().display(), "detected unclosed task");
        }

        Ok(Self {
            next_error_stream: last(StreamKind::ErrorData)? + 1,
            next_event_stream: last(StreamKind::EventData)? + 1,
            next_event_source_stream: last(StreamKind::EventSourceData)? + 1,
            next_event_tag_stream: last(StreamKind::EventTagData)? + 1,
            next_analysis_report_stream: last(StreamKind::AnalysisReportData)? + 1,
            last_session: last_session_start,
            last_task: last_task_start,

            event_streams: EventStreams::new(
                dir.clone(),
                layout,
                metadata.serialization_format,
                config.maximum_cached_tables,
            ),
            event_source_offset_tables: TableCache::new(config.maximum_cached_tables),
            dir,
            working_copy,
            read_only,
            format_version: metadata.format_version,
            layout,
            format: metadata.serialization_format,
            storage_type: metadata.storage_type,
            maximum_buffer_size: config.maximum_buffer_size,

            errors: ContainersList::new(),
            event_sources: ContainersList::new(),
            analysis_reports: ContainersList::new(),
            events: SerializedEventsHeap::new(),
            event_tags: SerializedTagsHeap::new(),

            tag_index: EventTagIndex::new(),
            tag_streams: HashMap::new(),
            merge: MergeState::NotStarted,
        })
    }

    fn require_storage_type(&self, storage_type: StorageType) -> CoreResult<()> {
        if self.storage_type != storage_type {
            return Err(CoreError::invalid_operation(format!(
                "operation requires a {storage_type} storage file, not a {} storage file",
                self.storage_type
            )));
        }
        Ok(())
    }

    fn iter<T: AttributeContainer>(&self, kind: StreamKind) -> ContainerIter<'_, T> {
        let end = match kind {
            StreamKind::EventSourceData => self.next_event_source_stream,
            StreamKind::ErrorData => self.next_error_stream,
            StreamKind::EventTagData => self.next_event_tag_stream,
            StreamKind::AnalysisReportData => self.next_analysis_report_stream,
            _ => self.next_event_stream,
        };
        ContainerIter::new(&self.dir, self.layout, self.format, kind, end)
    }

    fn add_event(&mut self, event: &Event) -> CoreResult<()> {
        let data = self.format.serialize(event)?;
        self.events.push(event.timestamp, data);
        if self.events.data_size() > self.maximum_buffer_size {
            self.flush_events()?;
        }
        Ok(())
    }

    fn add_event_source(&mut self, event_source: &EventSource) -> CoreResult<()> {
        let mut event_source = event_source.clone();
        event_source.storage_session = Some(self.last_session);
        let data = self.format.serialize(&event_source)?;
        self.event_sources.push(data);
        if self.event_sources.data_size() > self.maximum_buffer_size {
            self.flush_event_sources()?;
        }
        Ok(())
    }

    fn add_error(&mut self, error: &ExtractionError) -> CoreResult<()> {
        let mut error = error.clone();
        error.storage_session = Some(self.last_session);
        let data = self.format.serialize(&error)?;
        self.errors.push(data);
        if self.errors.data_size() > self.maximum_buffer_size {
            self.flush_errors()?;
        }
        Ok(())
    }

    fn add_event_tag(&mut self, event_tag: &EventTag) -> CoreResult<()> {
        let key = tag_sort_key(event_tag)?;
        let data = self.format.serialize(event_tag)?;
        self.event_tags.push(key, data);
        if self.event_tags.data_size() > self.maximum_buffer_size {
            self.flush_event_tags()?;
        }
        Ok(())
    }

    fn add_event_tags(&mut self, event_tags: &[EventTag]) -> CoreResult<()> {
        let mut serialized = Vec::with_capacity(event_tags.len());
        for event_tag in event_tags {
            let key = tag_sort_key(event_tag)?;
            let Some(identifier) = key.identifier() else {
                continue;
            };
            let merged = match self.tag_index.get(
                &self.dir,
                self.layout,
                self.next_event_tag_stream,
                &identifier,
            )? {
                Some(location) => {
                    let mut stored = self.read_event_tag(location)?;
                    stored.add_labels(event_tag.labels.iter().cloned());
                    if let Some(comment) = &event_tag.comment {
                        stored.add_comment(comment);
                    }
                    stored.event_uuid.clone_from(&event_tag.event_uuid);
                    stored.store_number = event_tag.store_number;
                    stored.store_index = event_tag.store_index;
                    stored
                }
                None => event_tag.clone(),
            };
            serialized.push((key, self.format.serialize(&merged)?));
        }

        for (key, data) in serialized {
            self.event_tags.push(key, data);
        }
        self.flush_event_tags()
    }

    fn add_analysis_report(&mut self, analysis_report: &AnalysisReport) -> CoreResult<()> {
        let data = self.format.serialize(analysis_report)?;
        self.analysis_reports.push(data);
        if self.analysis_reports.data_size() > self.maximum_buffer_size {
            self.flush_analysis_reports()?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> CoreResult<()> {
        self.flush_errors()?;
        self.flush_events()?;
        self.flush_event_sources()?;
        self.flush_event_tags()?;
        self.flush_analysis_reports()
    }

    fn flush_errors(&mut self) -> CoreResult<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let number = self.next_error_stream;
        let result = write_list_stream(
            &self.dir,
            self.layout,
            (StreamKind::ErrorData, None),
            number,
            &mut self.errors,
        );
        if result.is_err() {
            self.errors.empty();
        }
        result?;
        self.next_error_stream += 1;
        debug!(stream = number, "flushed extraction errors");
        Ok(())
    }

    fn flush_event_sources(&mut self) -> CoreResult<()> {
        if self.event_sources.is_empty() {
            return Ok(());
        }
        let number = self.next_event_source_stream;
        let result = write_list_stream(
            &self.dir,
            self.layout,
            (StreamKind::EventSourceData, Some(StreamKind::EventSourceIndex)),
            number,
            &mut self.event_sources,
        );
        if result.is_err() {
            self.event_sources.empty();
        }
        result?;
        self.next_event_source_stream += 1;
        debug!(stream = number, "flushed event sources");
        Ok(())
    }

    fn flush_analysis_reports(&mut self) -> CoreResult<()> {
        if self.analysis_reports.is_empty() {
            return Ok(());
        }
        let number = self.next_analysis_report_stream;
        let result = write_list_stream(
            &self.dir,
            self.layout,
            (StreamKind::AnalysisReportData, None),
            number,
            &mut self.analysis_reports,
        );
        if result.is_err() {
            self.analysis_reports.empty();
        }
        result?;
        self.next_analysis_report_stream += 1;
        debug!(stream = number, "flushed analysis reports");
        Ok(())
    }

    fn flush_events(&mut self) -> CoreResult<()> {
        if self.events.is_empty() {
            return Ok(());
        }
        let number = self.next_event_stream;
        let data_name = self.layout.stream_name(StreamKind::EventData, number);
        let result = write_event_stream(&self.dir, self.layout, number, &mut self.events);
        if result.is_err() {
            self.events.empty();
        }
        result.map_err(|err| CoreError::write_aborted(data_name, err))?;
        self.next_event_stream += 1;
        debug!(stream = number, "flushed events");
        Ok(())
    }

    fn flush_event_tags(&mut self) -> CoreResult<()> {
        if self.event_tags.is_empty() {
            return Ok(());
        }
        let number = self.next_event_tag_stream;
        let data_name = self.layout.stream_name(StreamKind::EventTagData, number);
        let result = write_tag_stream(&self.dir, self.layout, number, &mut self.event_tags);
        self.tag_index.invalidate();
        if result.is_err() {
            self.event_tags.empty();
        }
        result.map_err(|err| CoreError::write_aborted(data_name, err))?;
        self.next_event_tag_stream += 1;
        debug!(stream = number, "flushed event tags");
        Ok(())
    }

    fn write_marker<T: AttributeContainer>(
        &mut self,
        kind: StreamKind,
        number: u32,
        marker: &T,
    ) -> CoreResult<()> {
        let name = self.layout.stream_name(kind, number);
        if self.dir.has_member(&name) {
            return Err(CoreError::invalid_operation(format!(
                "{} marker {name} already exists",
                T::CONTAINER_TYPE
            )));
        }
        let data = self.format.serialize(marker)?;

        let write = || -> CoreResult<()> {
            let mut writer = DataStreamWriter::initialize(&self.dir, name.clone())?;
            writer.write_entry(&data)?;
            writer.finalize()?;
            Ok(())
        };
        write().map_err(|err| CoreError::write_aborted(name.clone(), err))
    }

    fn read_session(&self, number: u32) -> CoreResult<SessionRecord> {
        let start_name = self.layout.stream_name(StreamKind::SessionStart, number);
        let start = read_marker(&self.dir, self.format, &start_name)?;

        let completion_name = self.layout.stream_name(StreamKind::SessionCompletion, number);
        let completion = if self.dir.has_member(&completion_name) {
            Some(read_marker(&self.dir, self.format, &completion_name)?)
        } else {
            None
        };
        Ok((start, completion))
    }

    fn next_event(&mut self) -> CoreResult<Option<Event>> {
        let MergeState::Active(reader) = &mut self.merge else {
            return Ok(None);
        };
        let mut event = match reader.next_event(&mut self.event_streams) {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.merge = MergeState::Exhausted;
                self.event_streams.close_streams();
                return Ok(None);
            }
            Err(err) => {
                self.merge = MergeState::Exhausted;
                self.event_streams.close_streams();
                return Err(err);
            }
        };

        if let (Some(store_number), Some(store_index)) = (event.store_number, event.store_index) {
            match self.get_event_tag(store_number, store_index, Some(&event.uuid)) {
                Ok(tag) => event.tag = tag,
                Err(err) => {
                    self.merge = MergeState::Exhausted;
                    return Err(err);
                }
            }
        }
        Ok(Some(event))
    }

    fn get_event_tag(
        &mut self,
        store_number: u32,
        store_index: u32,
        uuid: Option<&str>,
    ) -> CoreResult<Option<EventTag>> {
        let location = self.tag_index.lookup(
            &self.dir,
            self.layout,
            self.next_event_tag_stream,
            store_number,
            store_index,
            uuid,
        )?;
        location
            .map(|location| self.read_event_tag(location))
            .transpose()
    }

    fn read_event_tag(&mut self, location: TagLocation) -> CoreResult<EventTag> {
        let name = self
            .layout
            .stream_name(StreamKind::EventTagData, location.stream_number);
        let stream = match self.tag_streams.entry(location.stream_number) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(DataStream::open(&self.dir, &name)?),
        };
        stream.seek_entry_at_offset(0, u64::from(location.offset))?;
        let data = stream.read_entry()?.ok_or_else(|| {
            CoreError::malformed_stream(&name, format!("no tag at offset {}", location.offset))
        })?;
        self.format.deserialize(&data)
    }

    fn event_source_offset_table(
        &mut self,
        stream_number: u32,
    ) -> CoreResult<std::sync::Arc<OffsetTable>> {
        let name = self
            .layout
            .stream_name(StreamKind::EventSourceIndex, stream_number);
        let dir = &self.dir;
        self.event_source_offset_tables
            .get_or_try_insert(stream_number, || OffsetTable::read(dir, &name))
    }

    fn get_event_source_by_index(&mut self, index: usize) -> CoreResult<Option<EventSource>> {
        let mut remaining = index;
        for stream_number in 1..self.next_event_source_stream {
            let table = self.event_source_offset_table(stream_number)?;
            if remaining >= table.len() {
                remaining -= table.len();
                continue;
            }

            let offset = table.get(remaining)?;
            let entry_index = u32::try_from(remaining).map_err(|_| CoreError::IndexOutOfBounds {
                index: remaining,
                len: table.len(),
            })?;
            let name = self
                .layout
                .stream_name(StreamKind::EventSourceData, stream_number);
            let mut stream = DataStream::open(&self.dir, &name)?;
            stream.seek_entry_at_offset(entry_index, u64::from(offset))?;
            let data = stream.read_entry()?.ok_or_else(|| {
                CoreError::malformed_stream(&name, format!("no entry at offset {offset}"))
            })?;
            return self.format.deserialize(&data).map(Some);
        }

        self.event_sources
            .get_by_index(remaining)
            .map(|data| self.format.deserialize(data))
            .transpose()
    }

    fn get_number_of_event_sources(&mut self) -> CoreResult<usize> {
        let mut count = self.event_sources.len();
        for stream_number in 1..self.next_event_source_stream {
            count += self.event_source_offset_table(stream_number)?.len();
        }
        Ok(count)
    }
}

fn read_metadata(dir: &ContainerDir) -> CoreResult<Option<StorageMetadata>> {
    if let Some(data) = dir.read_member(METADATA_MEMBER)? {
        let metadata = StorageMetadata::decode(&data)?;
        metadata.check_format_version()?;
        return Ok(Some(metadata));
    }

    let Some(data) = dir.read_member(LEGACY_SERIALIZER_MEMBER)? else {
        return Ok(None);
    };
    let format: SerializationFormat = String::from_utf8_lossy(&data).trim().parse()?;
    Ok(Some(StorageMetadata {
        format_version: LEGACY_FORMAT_VERSION,
        serialization_format: format,
        storage_type: StorageType::Session,
    }))
}

fn tag_sort_key(event_tag: &EventTag) -> CoreResult<TagSortKey> {
    event_tag
        .identifier()
        .map(|identifier| TagSortKey::from(&identifier))
        .ok_or_else(|| CoreError::invalid_operation("event tag does not identify an event"))
}

fn entry_offset(writer: &DataStreamWriter) -> CoreResult<u32> {
    u32::try_from(writer.offset()).map_err(|_| {
        CoreError::invalid_operation(format!(
            "stream {} exceeds the addressable offset range",
            writer.name()
        ))
    })
}

/// Commits the `tables` of a stream and then its data stream.
///
/// If any commit fails the tables already committed are removed again and
/// the temporary data member is discarded, so the stream is either complete
/// or absent.
fn commit_stream(
    dir: &ContainerDir,
    writer: DataStreamWriter,
    tables: Vec<(String, Vec<u8>)>,
) -> CoreResult<()> {
    let mut committed = Vec::with_capacity(tables.len());
    let commit = || -> CoreResult<()> {
        for (name, data) in &tables {
            dir.write_member(name, data)?;
            committed.push(name.as_str());
        }
        writer.finalize()?;
        Ok(())
    };
    let result = commit();

    if result.is_err() {
        for name in committed {
            if let Err(err) = dir.remove_member(name) {
                warn!(member = name, error = %err, "unable to remove table of aborted stream");
            }
        }
    }
    result
}

/// Drains `list` into a new data stream and, if `kinds.1` is set, its
/// offset table.
fn write_list_stream(
    dir: &ContainerDir,
    layout: Layout,
    kinds: (StreamKind, Option<StreamKind>),
    number: u32,
    list: &mut ContainersList,
) -> CoreResult<()> {
    let (data_kind, index_kind) = kinds;
    let data_name = layout.stream_name(data_kind, number);

    let write = |list: &mut ContainersList| -> CoreResult<()> {
        let mut writer = DataStreamWriter::initialize(dir, data_name.clone())?;
        let mut offsets = index_kind.map(|kind| OffsetTable::new(layout.stream_name(kind, number)));
        while let Some(data) = list.pop() {
            if let Some(offsets) = offsets.as_mut() {
                offsets.push(entry_offset(&writer)?);
            }
            writer.write_entry(&data)?;
        }
        let tables = offsets
            .map(|offsets| vec![(offsets.name().to_string(), offsets.encode())])
            .unwrap_or_default();
        commit_stream(dir, writer, tables)
    };
    write(list).map_err(|err| CoreError::write_aborted(data_name.clone(), err))
}

fn write_event_stream(
    dir: &ContainerDir,
    layout: Layout,
    number: u32,
    events: &mut SerializedEventsHeap,
) -> CoreResult<()> {
    let mut writer =
        DataStreamWriter::initialize(dir, layout.stream_name(StreamKind::EventData, number))?;
    let mut offsets = OffsetTable::new(layout.stream_name(StreamKind::EventIndex, number));
    let mut timestamps =
        TimestampTable::new(layout.stream_name(StreamKind::EventTimestamps, number));

    while let Some((timestamp, data)) = events.pop() {
        offsets.push(entry_offset(&writer)?);
        timestamps.push(timestamp);
        writer.write_entry(&data)?;
    }

    let tables = vec![
        (offsets.name().to_string(), offsets.encode()),
        (timestamps.name().to_string(), timestamps.encode()),
    ];
    commit_stream(dir, writer, tables)
}

fn write_tag_stream(
    dir: &ContainerDir,
    layout: Layout,
    number: u32,
    event_tags: &mut SerializedTagsHeap,
) -> CoreResult<()> {
    let mut writer =
        DataStreamWriter::initialize(dir, layout.stream_name(StreamKind::EventTagData, number))?;
    let mut index = TagIndexTable::new(layout.stream_name(StreamKind::EventTagIndex, number));

    while let Some((key, data)) = event_tags.pop() {
        let identifier = key
            .identifier()
            .ok_or_else(|| CoreError::invalid_operation("event tag does not identify an event"))?;
        index.push(entry_offset(&writer)?, identifier);
        writer.write_entry(&data)?;
    }

    let tables = vec![(index.name().to_string(), index.encode()?)];
    commit_stream(dir, writer, tables)
}

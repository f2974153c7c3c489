//! Read-only access to a container.

use crate::config::Config;
use crate::containers::{AnalysisReport, EventSource, EventTag, ExtractionError, SessionRecord};
use crate::error::CoreResult;
use crate::iter::ContainerIter;
use crate::serializer::SerializationFormat;
use crate::storage_file::{Events, StorageFile};
use crate::types::{StorageType, TimeRange};
use std::path::Path;

/// A container opened read-only.
///
/// Every sequence can be drained once per open; reopen the container to
/// read it again.
#[derive(Debug)]
pub struct StorageReader {
    storage: StorageFile,
}

impl StorageReader {
    /// Opens the container at `path` with the default configuration.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the container at `path`.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let mut storage = StorageFile::new(config, StorageType::Session)?;
        storage.open(path, true)?;
        Ok(Self { storage })
    }

    /// Storage type recorded in the container.
    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        self.storage.storage_type()
    }

    /// Format version of the container.
    #[must_use]
    pub fn format_version(&self) -> Option<i64> {
        self.storage.format_version()
    }

    /// Serialization format of the container.
    #[must_use]
    pub fn serialization_format(&self) -> Option<SerializationFormat> {
        self.storage.serialization_format()
    }

    /// See [`StorageFile::get_events`].
    pub fn get_events(&mut self, time_range: Option<TimeRange>) -> CoreResult<Events<'_>> {
        self.storage.get_events(time_range)
    }

    /// Event sources in stream order.
    pub fn get_event_sources(&self) -> CoreResult<ContainerIter<'_, EventSource>> {
        self.storage.get_event_sources()
    }

    /// Extraction errors in stream order.
    pub fn get_errors(&self) -> CoreResult<ContainerIter<'_, ExtractionError>> {
        self.storage.get_errors()
    }

    /// Event tags in stream order.
    pub fn get_event_tags(&self) -> CoreResult<ContainerIter<'_, EventTag>> {
        self.storage.get_event_tags()
    }

    /// Analysis reports in stream order.
    pub fn get_analysis_reports(&self) -> CoreResult<ContainerIter<'_, AnalysisReport>> {
        self.storage.get_analysis_reports()
    }

    /// Session starts with their completions.
    pub fn get_sessions(
        &self,
    ) -> CoreResult<impl Iterator<Item = CoreResult<SessionRecord>> + '_> {
        self.storage.get_sessions()
    }

    /// See [`StorageFile::get_event_tag`].
    pub fn get_event_tag(
        &mut self,
        store_number: u32,
        store_index: u32,
        uuid: Option<&str>,
    ) -> CoreResult<Option<EventTag>> {
        self.storage.get_event_tag(store_number, store_index, uuid)
    }

    /// Event source at `index`.
    pub fn get_event_source_by_index(&mut self, index: usize) -> CoreResult<Option<EventSource>> {
        self.storage.get_event_source_by_index(index)
    }

    /// Number of event sources.
    pub fn get_number_of_event_sources(&mut self) -> CoreResult<usize> {
        self.storage.get_number_of_event_sources()
    }

    /// Whether the container holds event tags.
    pub fn has_event_tags(&self) -> CoreResult<bool> {
        self.storage.has_event_tags()
    }

    /// Whether the container holds analysis reports.
    pub fn has_analysis_reports(&self) -> CoreResult<bool> {
        self.storage.has_analysis_reports()
    }

    /// Closes the container.
    pub fn close(mut self) -> CoreResult<()> {
        self.storage.close()
    }
}

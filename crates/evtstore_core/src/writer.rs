//! Session and task writers, and the task storage protocol.
//!
//! A session writer owns the aggregate container of a processing run. Workers
//! get their own task writer from [`StorageWriter::create_task_storage`],
//! each backed by an exclusive container in a scratch directory next to the
//! session container. A finished task container is handed off with
//! [`StorageWriter::prepare_merge_task_storage`] and replayed into the
//! session container by [`StorageWriter::merge_task_storage`], one task at a
//! time.

use crate::config::Config;
use crate::containers::{
    AnalysisReport, Event, EventSource, EventTag, ExtractionError, Session, Task,
};
use crate::error::{CoreError, CoreResult};
use crate::reader::StorageReader;
use crate::storage_file::StorageFile;
use crate::types::StorageType;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// File name extension of task containers.
pub const TASK_STORAGE_EXTENSION: &str = "evtstore";

const MERGE_DIRECTORY: &str = "merge";

/// Counts of the records added through a writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterCounters {
    /// Events added.
    pub events: u64,
    /// Event sources added.
    pub event_sources: u64,
    /// Extraction errors added.
    pub errors: u64,
    /// Event tags added.
    pub event_tags: u64,
    /// Analysis reports added.
    pub analysis_reports: u64,
    /// Events per parser; events without a parser count as `N/A`.
    pub parsers: BTreeMap<String, u64>,
    /// Event tags per label.
    pub labels: BTreeMap<String, u64>,
    /// Analysis reports per plugin.
    pub plugins: BTreeMap<String, u64>,
}

impl WriterCounters {
    fn count_event(&mut self, event: &Event) {
        self.events += 1;
        let parser = event.parser.as_deref().unwrap_or("N/A");
        *self.parsers.entry(parser.to_string()).or_default() += 1;
    }

    fn count_event_tag(&mut self, event_tag: &EventTag) {
        self.event_tags += 1;
        for label in &event_tag.labels {
            *self.labels.entry(label.clone()).or_default() += 1;
        }
    }

    fn count_analysis_report(&mut self, analysis_report: &AnalysisReport) {
        self.analysis_reports += 1;
        *self
            .plugins
            .entry(analysis_report.plugin_name.clone())
            .or_default() += 1;
    }
}

#[derive(Debug, Clone)]
struct TaskStorageDirs {
    task_dir: PathBuf,
    merge_dir: PathBuf,
}

/// Writer for a session or task container.
#[derive(Debug)]
pub struct StorageWriter {
    storage: StorageFile,
    path: PathBuf,
    config: Config,
    session: Session,
    task: Option<Task>,
    counters: WriterCounters,
    event_source_index: usize,
    task_storage: Option<TaskStorageDirs>,
}

impl StorageWriter {
    /// Opens the session container at `path` for writing, creating it if
    /// needed.
    pub fn open_session(session: Session, path: &Path, config: Config) -> CoreResult<Self> {
        Self::open(session, None, path, config)
    }

    /// Opens the task container at `path` for writing, creating it if
    /// needed.
    pub fn open_task(
        session: Session,
        task: Task,
        path: &Path,
        config: Config,
    ) -> CoreResult<Self> {
        Self::open(session, Some(task), path, config)
    }

    fn open(session: Session, task: Option<Task>, path: &Path, config: Config) -> CoreResult<Self> {
        let storage_type = if task.is_some() {
            StorageType::Task
        } else {
            StorageType::Session
        };
        let mut storage = StorageFile::new(config.clone(), storage_type)?;
        storage.open(path, false)?;
        let event_source_index = storage.get_number_of_event_sources()?;

        Ok(Self {
            storage,
            path: path.to_path_buf(),
            config,
            session,
            task,
            counters: WriterCounters::default(),
            event_source_index,
            task_storage: None,
        })
    }

    /// Storage type of the container.
    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        self.storage.storage_type()
    }

    /// Path of the container.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The session being written.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The task being written, for a task writer.
    #[must_use]
    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    /// Counts of the records added through this writer.
    #[must_use]
    pub fn counters(&self) -> &WriterCounters {
        &self.counters
    }

    /// Adds an event.
    pub fn add_event(&mut self, event: &Event) -> CoreResult<()> {
        self.storage.add_event(event)?;
        self.counters.count_event(event);
        Ok(())
    }

    /// Adds an event source.
    pub fn add_event_source(&mut self, event_source: &EventSource) -> CoreResult<()> {
        self.storage.add_event_source(event_source)?;
        self.counters.event_sources += 1;
        Ok(())
    }

    /// Adds an extraction error.
    pub fn add_error(&mut self, error: &ExtractionError) -> CoreResult<()> {
        self.storage.add_error(error)?;
        self.counters.errors += 1;
        Ok(())
    }

    /// Adds an event tag.
    pub fn add_event_tag(&mut self, event_tag: &EventTag) -> CoreResult<()> {
        self.storage.add_event_tag(event_tag)?;
        self.counters.count_event_tag(event_tag);
        Ok(())
    }

    /// Adds event tags, merging each with the tag already stored for its
    /// event.
    pub fn add_event_tags(&mut self, event_tags: &[EventTag]) -> CoreResult<()> {
        self.storage.add_event_tags(event_tags)?;
        for event_tag in event_tags {
            self.counters.count_event_tag(event_tag);
        }
        Ok(())
    }

    /// Adds an analysis report after adding the event tags it carries.
    pub fn add_analysis_report(&mut self, analysis_report: &AnalysisReport) -> CoreResult<()> {
        if !analysis_report.event_tags.is_empty() {
            self.add_event_tags(&analysis_report.event_tags)?;
        }
        self.storage.add_analysis_report(analysis_report)?;
        self.counters.count_analysis_report(analysis_report);
        Ok(())
    }

    /// Returns the next event source not yet handed out, including sources
    /// added since the container was opened.
    pub fn get_next_event_source(&mut self) -> CoreResult<Option<EventSource>> {
        let event_source = self
            .storage
            .get_event_source_by_index(self.event_source_index)?;
        if event_source.is_some() {
            self.event_source_index += 1;
        }
        Ok(event_source)
    }

    /// Flushes every buffer to new streams.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.storage.flush()
    }

    /// Writes the start marker of the session.
    pub fn write_session_start(&mut self) -> CoreResult<()> {
        let session_start = self.session.create_session_start();
        self.storage.write_session_start(&session_start)
    }

    /// Writes the completion marker of the session.
    pub fn write_session_completion(&mut self) -> CoreResult<()> {
        let session_completion = self.session.create_session_completion();
        self.storage.write_session_completion(&session_completion)
    }

    /// Writes the start marker of the task.
    pub fn write_task_start(&mut self) -> CoreResult<()> {
        let task = self.require_task()?;
        let task_start = task.create_task_start();
        self.storage.write_task_start(&task_start)
    }

    /// Writes the completion marker of the task.
    pub fn write_task_completion(&mut self) -> CoreResult<()> {
        let task = self.require_task()?;
        let task_completion = task.create_task_completion();
        self.storage.write_task_completion(&task_completion)
    }

    /// Marks the session or task as aborted; the completion marker records
    /// it.
    pub fn set_aborted(&mut self, aborted: bool) {
        match self.task.as_mut() {
            Some(task) => task.aborted = aborted,
            None => self.session.aborted = aborted,
        }
    }

    fn require_task(&self) -> CoreResult<&Task> {
        self.task
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("operation requires a task storage writer"))
    }

    fn require_session_writer(&self) -> CoreResult<()> {
        if self.task.is_some() {
            return Err(CoreError::invalid_operation(
                "task storage is only supported by session storage writers",
            ));
        }
        Ok(())
    }

    fn task_storage_dirs(&self) -> CoreResult<&TaskStorageDirs> {
        self.require_session_writer()?;
        self.task_storage
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("task storage not started"))
    }

    fn task_file_name(task: &Task) -> String {
        format!("{}.{TASK_STORAGE_EXTENSION}", task.identifier)
    }

    /// Creates the scratch directory for task containers, with its `merge`
    /// subdirectory, next to the session container.
    pub fn start_task_storage(&mut self) -> CoreResult<()> {
        self.require_session_writer()?;
        if self.task_storage.is_some() {
            return Err(CoreError::invalid_operation("task storage already started"));
        }

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let task_dir = parent.join(format!(".{name}.tasks.{}", Uuid::new_v4().simple()));
        let merge_dir = task_dir.join(MERGE_DIRECTORY);
        fs::create_dir_all(&merge_dir)?;

        debug!(path = %task_dir.display(), "started task storage");
        self.task_storage = Some(TaskStorageDirs {
            task_dir,
            merge_dir,
        });
        Ok(())
    }

    /// Path the container of `task` is written to.
    pub fn task_storage_path(&self, task: &Task) -> CoreResult<PathBuf> {
        Ok(self
            .task_storage_dirs()?
            .task_dir
            .join(Self::task_file_name(task)))
    }

    /// Path the container of `task` is merged from.
    pub fn merge_task_storage_path(&self, task: &Task) -> CoreResult<PathBuf> {
        Ok(self
            .task_storage_dirs()?
            .merge_dir
            .join(Self::task_file_name(task)))
    }

    /// Creates a task writer for `task` in the scratch directory.
    pub fn create_task_storage(&self, task: Task) -> CoreResult<StorageWriter> {
        let path = self.task_storage_path(&task)?;
        debug!(task = %task.identifier, path = %path.display(), "creating task storage");
        Self::open_task(self.session.clone(), task, &path, self.config.clone())
    }

    /// Moves the closed container of `task` into the `merge` directory,
    /// signalling that it is ready to be merged.
    pub fn prepare_merge_task_storage(&self, task: &Task) -> CoreResult<()> {
        let source = self.task_storage_path(task)?;
        let target = self.merge_task_storage_path(task)?;
        if !source.exists() {
            return Err(CoreError::invalid_operation(format!(
                "task storage {} does not exist",
                source.display()
            )));
        }
        fs::rename(&source, &target)?;
        debug!(task = %task.identifier, "task storage ready for merge");
        Ok(())
    }

    /// Whether the container of `task` is in the `merge` directory.
    pub fn check_task_storage_ready_for_merge(&self, task: &Task) -> CoreResult<bool> {
        Ok(self.merge_task_storage_path(task)?.exists())
    }

    /// Replays every record of the prepared container of `task` into this
    /// container and deletes the task container.
    ///
    /// Returns `false` if the task container is not ready for merge. Event
    /// tags are replayed as stored, so tags that identify their event by
    /// position keep the task container's positions.
    pub fn merge_task_storage(&mut self, task: &Task) -> CoreResult<bool> {
        let path = self.merge_task_storage_path(task)?;
        if !path.exists() {
            return Ok(false);
        }

        let mut reader = StorageReader::open_with_config(&path, self.config.clone())?;
        if reader.storage_type() != StorageType::Task {
            return Err(CoreError::invalid_operation(format!(
                "{} is not a task storage file",
                path.display()
            )));
        }

        for error in reader.get_errors()? {
            self.add_error(&error?)?;
        }
        for event in reader.get_events(None)? {
            self.add_event(&event?)?;
        }
        for event_source in reader.get_event_sources()? {
            self.add_event_source(&event_source?)?;
        }
        for event_tag in reader.get_event_tags()? {
            self.add_event_tag(&event_tag?)?;
        }
        for analysis_report in reader.get_analysis_reports()? {
            let analysis_report = analysis_report?;
            self.storage.add_analysis_report(&analysis_report)?;
            self.counters.count_analysis_report(&analysis_report);
        }
        reader.close()?;

        fs::remove_dir_all(&path)?;
        debug!(task = %task.identifier, "merged task storage");
        Ok(true)
    }

    /// Removes the scratch directories. Without `abort` they must be
    /// empty; with `abort` they are removed with everything in them.
    pub fn stop_task_storage(&mut self, abort: bool) -> CoreResult<()> {
        let dirs = self.task_storage_dirs()?.clone();

        if abort {
            if dirs.task_dir.exists() {
                fs::remove_dir_all(&dirs.task_dir)?;
            }
        } else {
            if dirs.merge_dir.exists() {
                fs::remove_dir(&dirs.merge_dir)?;
            }
            if dirs.task_dir.exists() {
                fs::remove_dir(&dirs.task_dir)?;
            }
        }

        debug!(path = %dirs.task_dir.display(), abort, "stopped task storage");
        self.task_storage = None;
        Ok(())
    }

    /// Flushes and closes the container.
    pub fn close(mut self) -> CoreResult<()> {
        if let Some(dirs) = &self.task_storage {
            warn!(path = %dirs.task_dir.display(), "closing with task storage still started");
        }
        self.storage.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session_writer(path: &Path) -> StorageWriter {
        StorageWriter::open_session(Session::new(), path, Config::default()).unwrap()
    }

    #[test]
    fn counters_track_added_records() {
        let dir = tempdir().unwrap();
        let mut writer = session_writer(&dir.path().join("case.evtstore"));

        let mut event = Event::new(1, "test:event");
        event.parser = Some("filestat".to_string());
        writer.add_event(&event).unwrap();
        writer.add_event(&Event::new(2, "test:event")).unwrap();

        let mut tag = EventTag::for_uuid(event.uuid.clone());
        tag.add_label("interesting");
        let mut report = AnalysisReport::new("tagging");
        report.event_tags.push(tag);
        writer.add_analysis_report(&report).unwrap();

        let counters = writer.counters();
        assert_eq!(counters.events, 2);
        assert_eq!(counters.parsers["filestat"], 1);
        assert_eq!(counters.parsers["N/A"], 1);
        assert_eq!(counters.event_tags, 1);
        assert_eq!(counters.labels["interesting"], 1);
        assert_eq!(counters.plugins["tagging"], 1);
        writer.close().unwrap();
    }

    #[test]
    fn next_event_source_starts_after_existing_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case.evtstore");

        let mut writer = session_writer(&path);
        writer
            .add_event_source(&EventSource::new("file_entry", "/old"))
            .unwrap();
        writer.close().unwrap();

        let mut writer = session_writer(&path);
        assert!(writer.get_next_event_source().unwrap().is_none());
        writer
            .add_event_source(&EventSource::new("file_entry", "/new"))
            .unwrap();
        let next = writer.get_next_event_source().unwrap().unwrap();
        assert_eq!(next.path_spec, "/new");
        assert!(writer.get_next_event_source().unwrap().is_none());
        writer.close().unwrap();
    }

    #[test]
    fn task_protocol_requires_session_writer() {
        let dir = tempdir().unwrap();
        let task = Task::new("session");
        let mut writer = StorageWriter::open_task(
            Session::new(),
            task.clone(),
            &dir.path().join("task.evtstore"),
            Config::default(),
        )
        .unwrap();

        assert!(matches!(
            writer.start_task_storage(),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            writer.check_task_storage_ready_for_merge(&task),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(writer.write_session_start().is_err());
        writer.write_task_start().unwrap();
        writer.write_task_completion().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn task_storage_lifecycle() {
        let dir = tempdir().unwrap();
        let mut writer = session_writer(&dir.path().join("case.evtstore"));
        let task = Task::new(writer.session().identifier.clone());

        assert!(writer.create_task_storage(task.clone()).is_err());
        writer.start_task_storage().unwrap();
        assert!(matches!(
            writer.start_task_storage(),
            Err(CoreError::InvalidOperation { .. })
        ));

        let mut task_writer = writer.create_task_storage(task.clone()).unwrap();
        task_writer.write_task_start().unwrap();
        for timestamp in [5, 3, 4, 1, 2] {
            task_writer
                .add_event(&Event::new(timestamp, "test:event"))
                .unwrap();
        }
        task_writer.write_task_completion().unwrap();
        task_writer.close().unwrap();

        assert!(!writer.check_task_storage_ready_for_merge(&task).unwrap());
        writer.prepare_merge_task_storage(&task).unwrap();
        assert!(writer.check_task_storage_ready_for_merge(&task).unwrap());

        assert!(writer.merge_task_storage(&task).unwrap());
        assert!(!writer.check_task_storage_ready_for_merge(&task).unwrap());
        assert!(!writer.merge_task_storage(&task).unwrap());
        assert_eq!(writer.counters().events, 5);

        writer.stop_task_storage(false).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn stop_without_abort_requires_empty_scratch() {
        let dir = tempdir().unwrap();
        let mut writer = session_writer(&dir.path().join("case.evtstore"));
        writer.start_task_storage().unwrap();

        let task = Task::new(writer.session().identifier.clone());
        writer
            .create_task_storage(task.clone())
            .unwrap()
            .close()
            .unwrap();
        writer.prepare_merge_task_storage(&task).unwrap();

        assert!(writer.stop_task_storage(false).is_err());
        writer.stop_task_storage(true).unwrap();
        assert!(writer.check_task_storage_ready_for_merge(&task).is_err());
        writer.close().unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}

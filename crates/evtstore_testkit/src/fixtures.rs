//! Test fixtures and container helpers.
//!
//! Provides temporary containers and record builders for common test
//! scenarios.

use evtstore_core::{
    Config, Event, EventTag, Session, StorageReader, StorageWriter, TimeRange,
};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;

/// Data type of events built by [`event`].
pub const TEST_DATA_TYPE: &str = "test:event";

/// Parser name of events built by [`event`].
pub const TEST_PARSER: &str = "test_parser";

static LOGGING: Once = Once::new();

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Builds an event at `timestamp`.
pub fn event(timestamp: i64) -> Event {
    let mut event = Event::new(timestamp, TEST_DATA_TYPE);
    event.parser = Some(TEST_PARSER.to_string());
    event
}

/// Builds a tag with `labels` for the event at a stream position.
pub fn position_tag(store_number: u32, store_index: u32, labels: &[&str]) -> EventTag {
    let mut tag = EventTag::for_position(store_number, store_index);
    tag.add_labels(labels.iter().copied());
    tag
}

/// Builds a tag with `labels` for the event with `uuid`.
pub fn uuid_tag(uuid: &str, labels: &[&str]) -> EventTag {
    let mut tag = EventTag::for_uuid(uuid);
    tag.add_labels(labels.iter().copied());
    tag
}

/// A container path inside a temporary directory that is removed on drop.
pub struct TestContainer {
    path: PathBuf,
    config: Config,
    session: Session,
    temp_dir: TempDir,
}

impl TestContainer {
    /// Creates a container path with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a container path whose writers and readers use `config`.
    pub fn with_config(config: Config) -> Self {
        init_test_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            path: temp_dir.path().join("case.evtstore"),
            config,
            session: Session::new(),
            temp_dir,
        }
    }

    /// Path of the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the container.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Configuration used for writers and readers.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session written by [`TestContainer::session_writer`].
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Opens the container with a session writer.
    pub fn session_writer(&self) -> StorageWriter {
        StorageWriter::open_session(self.session.clone(), &self.path, self.config.clone())
            .expect("Failed to open session writer")
    }

    /// Opens the container read-only.
    pub fn reader(&self) -> StorageReader {
        StorageReader::open_with_config(&self.path, self.config.clone())
            .expect("Failed to open storage reader")
    }

    /// Writes one event per timestamp in a single writer session.
    pub fn write_events(&self, timestamps: &[i64]) -> Vec<Event> {
        let events: Vec<Event> = timestamps.iter().map(|timestamp| event(*timestamp)).collect();
        self.write(&events);
        events
    }

    /// Writes `events` in a single writer session.
    pub fn write(&self, events: &[Event]) {
        let mut writer = self.session_writer();
        for event in events {
            writer.add_event(event).expect("Failed to add event");
        }
        writer.close().expect("Failed to close writer");
    }

    /// Reads every event, optionally limited to a time range.
    pub fn read_events(&self, time_range: Option<TimeRange>) -> Vec<Event> {
        let mut reader = self.reader();
        let events = reader
            .get_events(time_range)
            .expect("Failed to read events")
            .collect::<Result<Vec<_>, _>>()
            .expect("Failed to read event");
        reader.close().expect("Failed to close reader");
        events
    }

    /// Reads the timestamps of every event, optionally limited to a time
    /// range.
    pub fn read_timestamps(&self, time_range: Option<TimeRange>) -> Vec<i64> {
        self.read_events(time_range)
            .iter()
            .map(|event| event.timestamp)
            .collect()
    }

    /// Names of the container's members, sorted.
    pub fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.path)
            .expect("Failed to list container")
            .map(|entry| {
                entry
                    .expect("Failed to read directory entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }
}

impl Default for TestContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let container = TestContainer::new();
        container.write_events(&[50, 10, 30]);
        assert_eq!(container.read_timestamps(None), vec![10, 30, 50]);
        assert!(container.members().contains(&"metadata.txt".to_string()));
    }

    #[test]
    fn tag_builders() {
        let tag = position_tag(1, 0, &["a", "b", "a"]);
        assert_eq!(tag.labels, vec!["a", "b"]);
        assert_eq!(uuid_tag("x", &[]).event_uuid.as_deref(), Some("x"));
    }
}

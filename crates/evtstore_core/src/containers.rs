//! Attribute containers stored in an evtstore container.
//!
//! These are the records produced by extraction workers. The storage engine
//! only needs to serialize them, read an event's timestamp and identify the
//! event a tag refers to; everything else is carried through untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A serializable record kind.
pub trait AttributeContainer: Serialize + DeserializeOwned {
    /// Name of the record kind, used in diagnostics.
    const CONTAINER_TYPE: &'static str;
}

/// Returns the current time in microseconds since the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
        })
}

/// Value of a free-form event attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    List(Vec<AttributeValue>),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Identifies the event an [`EventTag`] belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventIdentifier {
    /// Position of the event: event stream number and entry index.
    Position {
        /// Event stream number.
        store_number: u32,
        /// Entry index within that stream.
        store_index: u32,
    },
    /// The event's UUID.
    Uuid(String),
}

/// A time-stamped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Kind of event, e.g. `fs:stat`.
    pub data_type: String,
    /// Stable identifier usable for tagging.
    pub uuid: String,
    /// Parser that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    /// Parser specific attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Event stream the event was read from.
    #[serde(skip)]
    pub store_number: Option<u32>,
    /// Entry index within [`Event::store_number`].
    #[serde(skip)]
    pub store_index: Option<u32>,
    /// Tag resolved while reading.
    #[serde(skip)]
    pub tag: Option<EventTag>,
}

impl Event {
    /// Creates an event with a fresh UUID.
    #[must_use]
    pub fn new(timestamp: i64, data_type: impl Into<String>) -> Self {
        Self {
            timestamp,
            data_type: data_type.into(),
            uuid: Uuid::new_v4().to_string(),
            parser: None,
            attributes: BTreeMap::new(),
            store_number: None,
            store_index: None,
            tag: None,
        }
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

impl AttributeContainer for Event {
    const CONTAINER_TYPE: &'static str = "event";
}

/// Something events were extracted from, such as a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Kind of source, e.g. `file_entry`.
    pub data_type: String,
    /// Serialized path specification of the source.
    pub path_spec: String,
    /// File entry type, when the source is a file system entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_entry_type: Option<String>,
    /// Storage session the source was added in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_session: Option<u32>,
}

impl EventSource {
    /// Creates an event source.
    #[must_use]
    pub fn new(data_type: impl Into<String>, path_spec: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            path_spec: path_spec.into(),
            file_entry_type: None,
            storage_session: None,
        }
    }
}

impl AttributeContainer for EventSource {
    const CONTAINER_TYPE: &'static str = "event_source";
}

/// An error raised while extracting events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionError {
    /// Error message.
    pub message: String,
    /// Parser chain that raised the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_chain: Option<String>,
    /// Path specification of the data being parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_spec: Option<String>,
    /// Storage session the error was added in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_session: Option<u32>,
}

impl ExtractionError {
    /// Creates an extraction error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            parser_chain: None,
            path_spec: None,
            storage_session: None,
        }
    }
}

impl AttributeContainer for ExtractionError {
    const CONTAINER_TYPE: &'static str = "extraction_error";
}

/// Labels and a comment attached to one event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventTag {
    /// UUID of the tagged event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_uuid: Option<String>,
    /// Event stream number of the tagged event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_number: Option<u32>,
    /// Entry index of the tagged event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_index: Option<u32>,
    /// Labels, without duplicates.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl EventTag {
    /// Creates a tag for the event with the given UUID.
    #[must_use]
    pub fn for_uuid(event_uuid: impl Into<String>) -> Self {
        Self {
            event_uuid: Some(event_uuid.into()),
            ..Self::default()
        }
    }

    /// Creates a tag for the event at the given stream position.
    #[must_use]
    pub fn for_position(store_number: u32, store_index: u32) -> Self {
        Self {
            store_number: Some(store_number),
            store_index: Some(store_index),
            ..Self::default()
        }
    }

    /// Adds a label unless it is already present.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Adds several labels.
    pub fn add_labels<I, S>(&mut self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for label in labels {
            self.add_label(label);
        }
    }

    /// Appends to the comment.
    pub fn add_comment(&mut self, comment: &str) {
        self.comment.get_or_insert_with(String::new).push_str(comment);
    }

    /// Returns the identifier of the tagged event. A UUID takes precedence
    /// over a stream position.
    #[must_use]
    pub fn identifier(&self) -> Option<EventIdentifier> {
        if let Some(uuid) = &self.event_uuid {
            return Some(EventIdentifier::Uuid(uuid.clone()));
        }
        match (self.store_number, self.store_index) {
            (Some(store_number), Some(store_index)) => Some(EventIdentifier::Position {
                store_number,
                store_index,
            }),
            _ => None,
        }
    }
}

impl AttributeContainer for EventTag {
    const CONTAINER_TYPE: &'static str = "event_tag";
}

/// Output of an analysis plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Name of the plugin that compiled the report.
    pub plugin_name: String,
    /// Report text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// When the report was compiled, in microseconds since the Unix epoch.
    pub time_compiled: i64,
    /// Tags produced by the plugin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_tags: Vec<EventTag>,
}

impl AnalysisReport {
    /// Creates a report compiled now.
    #[must_use]
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            text: None,
            time_compiled: current_timestamp(),
            event_tags: Vec::new(),
        }
    }
}

impl AttributeContainer for AnalysisReport {
    const CONTAINER_TYPE: &'static str = "analysis_report";
}

/// Marks the start of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStart {
    /// Session identifier.
    pub identifier: String,
    /// Start time in microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Name of the producing program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Command line of the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

impl AttributeContainer for SessionStart {
    const CONTAINER_TYPE: &'static str = "session_start";
}

/// A session start paired with its completion, if one was written.
pub type SessionRecord = (SessionStart, Option<SessionCompletion>);

/// Marks the end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCompletion {
    /// Session identifier.
    pub identifier: String,
    /// Completion time in microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Whether the session was aborted.
    pub aborted: bool,
}

impl AttributeContainer for SessionCompletion {
    const CONTAINER_TYPE: &'static str = "session_completion";
}

/// Marks the start of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStart {
    /// Task identifier.
    pub identifier: String,
    /// Identifier of the owning session.
    pub session_identifier: String,
    /// Start time in microseconds since the Unix epoch.
    pub timestamp: i64,
}

impl AttributeContainer for TaskStart {
    const CONTAINER_TYPE: &'static str = "task_start";
}

/// Marks the end of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    /// Task identifier.
    pub identifier: String,
    /// Identifier of the owning session.
    pub session_identifier: String,
    /// Completion time in microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Whether the task was aborted.
    pub aborted: bool,
}

impl AttributeContainer for TaskCompletion {
    const CONTAINER_TYPE: &'static str = "task_completion";
}

/// A processing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identifier.
    pub identifier: String,
    /// Start time in microseconds since the Unix epoch.
    pub start_time: i64,
    /// Name of the producing program.
    pub product_name: Option<String>,
    /// Command line of the run.
    pub command_line: Option<String>,
    /// Whether the session was aborted.
    pub aborted: bool,
}

impl Session {
    /// Creates a session starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identifier: Uuid::new_v4().simple().to_string(),
            start_time: current_timestamp(),
            product_name: None,
            command_line: None,
            aborted: false,
        }
    }

    /// Builds the session start marker.
    #[must_use]
    pub fn create_session_start(&self) -> SessionStart {
        SessionStart {
            identifier: self.identifier.clone(),
            timestamp: self.start_time,
            product_name: self.product_name.clone(),
            command_line: self.command_line.clone(),
        }
    }

    /// Builds the session completion marker, stamped now.
    #[must_use]
    pub fn create_session_completion(&self) -> SessionCompletion {
        SessionCompletion {
            identifier: self.identifier.clone(),
            timestamp: current_timestamp(),
            aborted: self.aborted,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work executed by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Task identifier; also names the task's container file.
    pub identifier: String,
    /// Identifier of the owning session.
    pub session_identifier: String,
    /// Start time in microseconds since the Unix epoch.
    pub start_time: i64,
    /// Whether the task was aborted.
    pub aborted: bool,
}

impl Task {
    /// Creates a task of `session` starting now.
    #[must_use]
    pub fn new(session_identifier: impl Into<String>) -> Self {
        Self {
            identifier: Uuid::new_v4().simple().to_string(),
            session_identifier: session_identifier.into(),
            start_time: current_timestamp(),
            aborted: false,
        }
    }

    /// Builds the task start marker.
    #[must_use]
    pub fn create_task_start(&self) -> TaskStart {
        TaskStart {
            identifier: self.identifier.clone(),
            session_identifier: self.session_identifier.clone(),
            timestamp: self.start_time,
        }
    }

    /// Builds the task completion marker, stamped now.
    #[must_use]
    pub fn create_task_completion(&self) -> TaskCompletion {
        TaskCompletion {
            identifier: self.identifier.clone(),
            session_identifier: self.session_identifier.clone(),
            timestamp: current_timestamp(),
            aborted: self.aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_get_distinct_uuids() {
        let a = Event::new(1, "test:event");
        let b = Event::new(1, "test:event");
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn tag_identifier_prefers_uuid() {
        let mut tag = EventTag::for_position(1, 7);
        assert_eq!(
            tag.identifier(),
            Some(EventIdentifier::Position {
                store_number: 1,
                store_index: 7
            })
        );

        tag.event_uuid = Some("abc".to_string());
        assert_eq!(
            tag.identifier(),
            Some(EventIdentifier::Uuid("abc".to_string()))
        );

        assert_eq!(EventTag::default().identifier(), None);
    }

    #[test]
    fn tag_labels_are_deduplicated() {
        let mut tag = EventTag::for_uuid("abc");
        tag.add_labels(["malware", "browser"]);
        tag.add_label("malware");
        assert_eq!(tag.labels, vec!["malware", "browser"]);
    }

    #[test]
    fn tag_comments_are_appended() {
        let mut tag = EventTag::for_uuid("abc");
        tag.add_comment("first.");
        tag.add_comment(" second.");
        assert_eq!(tag.comment.as_deref(), Some("first. second."));
    }

    #[test]
    fn read_side_fields_are_not_serialized() {
        let mut event = Event::new(5, "test:event");
        event.store_number = Some(3);
        event.store_index = Some(9);
        event.tag = Some(EventTag::for_uuid(event.uuid.clone()));

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("store_number"));
        assert!(!json.contains("labels"));
    }

    #[test]
    fn session_and_task_markers() {
        let session = Session::new();
        let task = Task::new(session.identifier.clone());

        let start = task.create_task_start();
        assert_eq!(start.session_identifier, session.identifier);
        assert_eq!(task.create_task_completion().identifier, task.identifier);
        assert!(!session.create_session_completion().aborted);
    }
}

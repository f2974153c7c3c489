//! Member naming within a container.
//!
//! Every stream member is named `<prefix>.<NNNNNN>` where the number is the
//! zero-padded stream number of its kind. Containers up to format version
//! 20160501 used a different set of prefixes for the event, tag and report
//! streams; [`Layout`] hides that difference.

use crate::types::COMPATIBLE_FORMAT_VERSION;

/// Name of the metadata member.
pub const METADATA_MEMBER: &str = "metadata.txt";

/// Name of the serializer marker found in legacy containers.
pub const LEGACY_SERIALIZER_MEMBER: &str = "serializer.txt";

/// Suffix of members that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Kind of a numbered stream member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Serialized events.
    EventData,
    /// Offsets into an event data stream.
    EventIndex,
    /// Timestamps of the events in an event data stream.
    EventTimestamps,
    /// Serialized event sources.
    EventSourceData,
    /// Offsets into an event source data stream.
    EventSourceIndex,
    /// Serialized event tags.
    EventTagData,
    /// Tag index entries for an event tag data stream.
    EventTagIndex,
    /// Serialized extraction errors.
    ErrorData,
    /// Serialized analysis reports.
    AnalysisReportData,
    /// Session start marker.
    SessionStart,
    /// Session completion marker.
    SessionCompletion,
    /// Task start marker.
    TaskStart,
    /// Task completion marker.
    TaskCompletion,
}

impl StreamKind {
    /// All stream kinds.
    pub const ALL: [Self; 13] = [
        Self::EventData,
        Self::EventIndex,
        Self::EventTimestamps,
        Self::EventSourceData,
        Self::EventSourceIndex,
        Self::EventTagData,
        Self::EventTagIndex,
        Self::ErrorData,
        Self::AnalysisReportData,
        Self::SessionStart,
        Self::SessionCompletion,
        Self::TaskStart,
        Self::TaskCompletion,
    ];

    const fn prefix(self) -> &'static str {
        match self {
            Self::EventData => "event_data",
            Self::EventIndex => "event_index",
            Self::EventTimestamps => "event_timestamps",
            Self::EventSourceData => "event_source_data",
            Self::EventSourceIndex => "event_source_index",
            Self::EventTagData => "event_tag_data",
            Self::EventTagIndex => "event_tag_index",
            Self::ErrorData => "error_data",
            Self::AnalysisReportData => "analysis_report_data",
            Self::SessionStart => "session_start",
            Self::SessionCompletion => "session_completion",
            Self::TaskStart => "task_start",
            Self::TaskCompletion => "task_completion",
        }
    }

    const fn legacy_prefix(self) -> &'static str {
        match self {
            Self::EventData => "store_proto",
            Self::EventIndex => "store_index",
            Self::EventTimestamps => "store_timestamps",
            Self::EventTagData => "store_tagging",
            Self::EventTagIndex => "store_tag_index",
            Self::AnalysisReportData => "store_report",
            other => other.prefix(),
        }
    }
}

/// Stream naming for one format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    legacy: bool,
}

impl Layout {
    /// Returns the layout used by containers of `format_version`.
    #[must_use]
    pub const fn for_version(format_version: i64) -> Self {
        Self {
            legacy: format_version <= COMPATIBLE_FORMAT_VERSION,
        }
    }

    /// Whether this is the legacy layout.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        self.legacy
    }

    /// Returns the name prefix of `kind`, without the trailing dot.
    #[must_use]
    pub const fn prefix(self, kind: StreamKind) -> &'static str {
        if self.legacy {
            kind.legacy_prefix()
        } else {
            kind.prefix()
        }
    }

    /// Returns the member name of stream `number` of `kind`.
    #[must_use]
    pub fn stream_name(self, kind: StreamKind, number: u32) -> String {
        format!("{}.{number:06}", self.prefix(kind))
    }

    /// Parses a member name into its kind and stream number.
    ///
    /// Returns `None` for temporary members, non-stream members and names
    /// whose number does not parse.
    #[must_use]
    pub fn parse_stream_name(self, name: &str) -> Option<(StreamKind, u32)> {
        if name.ends_with(TEMP_SUFFIX) {
            return None;
        }
        let (prefix, number) = name.rsplit_once('.')?;
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let kind = StreamKind::ALL
            .into_iter()
            .find(|kind| self.prefix(*kind) == prefix)?;
        let number = number.parse().ok()?;
        Some((kind, number))
    }
}

/// Returns the temporary name a member is written under before commit.
#[must_use]
pub fn temp_member_name(name: &str) -> String {
    format!("{name}{TEMP_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FORMAT_VERSION;

    #[test]
    fn stream_names_are_zero_padded() {
        let layout = Layout::for_version(FORMAT_VERSION);
        assert_eq!(
            layout.stream_name(StreamKind::EventData, 1),
            "event_data.000001"
        );
        assert_eq!(
            layout.stream_name(StreamKind::EventSourceIndex, 123456),
            "event_source_index.123456"
        );
    }

    #[test]
    fn legacy_prefixes() {
        let layout = Layout::for_version(COMPATIBLE_FORMAT_VERSION);
        assert!(layout.is_legacy());
        assert_eq!(layout.stream_name(StreamKind::EventData, 2), "store_proto.000002");
        assert_eq!(layout.stream_name(StreamKind::ErrorData, 2), "error_data.000002");
        assert!(!Layout::for_version(COMPATIBLE_FORMAT_VERSION + 1).is_legacy());
    }

    #[test]
    fn parse_roundtrip_for_every_kind() {
        for layout in [Layout::for_version(FORMAT_VERSION), Layout::for_version(1)] {
            for kind in StreamKind::ALL {
                let name = layout.stream_name(kind, 42);
                assert_eq!(layout.parse_stream_name(&name), Some((kind, 42)));
            }
        }
    }

    #[test]
    fn parse_rejects_non_streams() {
        let layout = Layout::default();
        assert_eq!(layout.parse_stream_name(METADATA_MEMBER), None);
        assert_eq!(layout.parse_stream_name("event_data.000001.tmp"), None);
        assert_eq!(layout.parse_stream_name("event_data.x1"), None);
        assert_eq!(layout.parse_stream_name("event_data."), None);
        assert_eq!(layout.parse_stream_name("unknown.000001"), None);
        assert_eq!(layout.parse_stream_name("store_proto.000001"), None);
    }

    #[test]
    fn parse_does_not_confuse_similar_prefixes() {
        let layout = Layout::default();
        assert_eq!(
            layout.parse_stream_name("event_source_data.000003"),
            Some((StreamKind::EventSourceData, 3))
        );
        assert_eq!(
            layout.parse_stream_name("event_tag_index.000003"),
            Some((StreamKind::EventTagIndex, 3))
        );
    }
}

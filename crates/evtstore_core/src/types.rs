//! Core type definitions.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// Format version written into new containers.
pub const FORMAT_VERSION: i64 = 20160525;

/// Earliest declared format version that can still be read.
pub const COMPATIBLE_FORMAT_VERSION: i64 = 20160501;

/// Format version assumed for containers that predate `metadata.txt`.
pub const LEGACY_FORMAT_VERSION: i64 = 20160431;

/// Whether a container is the aggregate store of a run or a private
/// per-worker store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageType {
    /// Long-lived aggregate container for a processing run.
    #[default]
    Session,
    /// Short-lived container owned by one worker task.
    Task,
}

impl StorageType {
    /// Returns the name recorded in `metadata.txt`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "session" => Ok(Self::Session),
            "task" => Ok(Self::Task),
            other => Err(CoreError::invalid_format(format!(
                "unsupported storage type: {other}"
            ))),
        }
    }
}

/// Inclusive time range in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// First timestamp included.
    pub start_timestamp: i64,
    /// Last timestamp included.
    pub end_timestamp: i64,
}

impl TimeRange {
    /// Creates a time range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `start_timestamp` is after
    /// `end_timestamp`.
    pub fn new(start_timestamp: i64, end_timestamp: i64) -> CoreResult<Self> {
        if start_timestamp > end_timestamp {
            return Err(CoreError::invalid_operation(format!(
                "time range start {start_timestamp} is after end {end_timestamp}"
            )));
        }
        Ok(Self {
            start_timestamp,
            end_timestamp,
        })
    }

    /// Returns whether `timestamp` falls inside the range.
    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start_timestamp && timestamp <= self.end_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_type_roundtrip() {
        for storage_type in [StorageType::Session, StorageType::Task] {
            let parsed: StorageType = storage_type.as_str().parse().unwrap();
            assert_eq!(parsed, storage_type);
        }
        assert!("archive".parse::<StorageType>().is_err());
    }

    #[test]
    fn time_range_is_inclusive() {
        let range = TimeRange::new(10, 20).unwrap();
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }

    #[test]
    fn inverted_time_range_rejected() {
        assert!(TimeRange::new(5, 4).is_err());
        assert!(TimeRange::new(5, 5).is_ok());
    }
}

//! Error types for evtstore core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in container operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] evtstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A stream entry has an out-of-bounds length prefix or is truncated.
    #[error("malformed stream {stream}: {message}")]
    MalformedStream {
        /// Name of the stream.
        stream: String,
        /// Description of the problem.
        message: String,
    },

    /// An expected container member is absent.
    #[error("missing stream: {name}")]
    MissingStream {
        /// Name of the missing stream.
        name: String,
    },

    /// The container declares a format version this build cannot read.
    #[error("unsupported format version {version} (supported {minimum} to {maximum})")]
    UnsupportedFormatVersion {
        /// Declared format version.
        version: i64,
        /// Earliest readable version.
        minimum: i64,
        /// Latest known version.
        maximum: i64,
    },

    /// The container declares an unknown serialization format.
    #[error("unsupported serialization format: {format}")]
    UnsupportedSerialization {
        /// Declared serialization format.
        format: String,
    },

    /// The container metadata cannot be parsed.
    #[error("invalid container format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A flush failed; the temporary stream was removed before reporting.
    #[error("write of stream {stream} aborted: {source}")]
    WriteAborted {
        /// Name of the stream that was being written.
        stream: String,
        /// The error that interrupted the write.
        #[source]
        source: Box<CoreError>,
    },

    /// A table lookup was out of range.
    #[error("index {index} out of bounds for table of {len} entries")]
    IndexOutOfBounds {
        /// Requested entry index.
        index: usize,
        /// Number of entries in the table.
        len: usize,
    },

    /// The container path does not exist.
    #[error("container not found: {}", path.display())]
    ContainerNotFound {
        /// Path that was opened.
        path: PathBuf,
    },

    /// Configuration values are out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a malformed stream error.
    pub fn malformed_stream(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedStream {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Creates a missing stream error.
    pub fn missing_stream(name: impl Into<String>) -> Self {
        Self::MissingStream { name: name.into() }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps an error raised while writing `stream`.
    pub fn write_aborted(stream: impl Into<String>, source: CoreError) -> Self {
        Self::WriteAborted {
            stream: stream.into(),
            source: Box::new(source),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_aborted_keeps_source() {
        let err = CoreError::write_aborted(
            "event_data.000001",
            CoreError::serialization("bad record"),
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "serialization error: bad record");
        assert!(err.to_string().contains("event_data.000001"));
    }

    #[test]
    fn unsupported_version_message() {
        let err = CoreError::UnsupportedFormatVersion {
            version: 1,
            minimum: 20160501,
            maximum: 20160525,
        };
        assert_eq!(
            err.to_string(),
            "unsupported format version 1 (supported 20160501 to 20160525)"
        );
    }
}

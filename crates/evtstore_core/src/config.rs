//! Storage file configuration.

use crate::error::{CoreError, CoreResult};
use crate::serializer::SerializationFormat;

/// Flush threshold used when none is configured, and the largest one
/// accepted (196 MiB).
pub const MAXIMUM_BUFFER_SIZE: usize = 196 * 1024 * 1024;

/// Default number of offset or timestamp tables kept in memory per kind.
pub const DEFAULT_CACHED_TABLES: usize = 5;

/// Configuration for a storage file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Buffered serialized bytes per record kind before a flush is forced.
    /// Zero selects [`MAXIMUM_BUFFER_SIZE`].
    pub maximum_buffer_size: usize,

    /// Capacity of each table cache.
    pub maximum_cached_tables: usize,

    /// Serialization format for new containers.
    pub serialization_format: SerializationFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maximum_buffer_size: MAXIMUM_BUFFER_SIZE,
            maximum_cached_tables: DEFAULT_CACHED_TABLES,
            serialization_format: SerializationFormat::Json,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flush threshold.
    #[must_use]
    pub const fn maximum_buffer_size(mut self, size: usize) -> Self {
        self.maximum_buffer_size = size;
        self
    }

    /// Sets the table cache capacity.
    #[must_use]
    pub const fn maximum_cached_tables(mut self, count: usize) -> Self {
        self.maximum_cached_tables = count;
        self
    }

    /// Sets the serialization format for new containers.
    #[must_use]
    pub const fn serialization_format(mut self, format: SerializationFormat) -> Self {
        self.serialization_format = format;
        self
    }

    /// Checks bounds and resolves a zero buffer size to the default.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the buffer size exceeds
    /// [`MAXIMUM_BUFFER_SIZE`] or the cache capacity is zero.
    pub fn validate(mut self) -> CoreResult<Self> {
        if self.maximum_buffer_size > MAXIMUM_BUFFER_SIZE {
            return Err(CoreError::invalid_config(format!(
                "maximum buffer size {} exceeds limit {MAXIMUM_BUFFER_SIZE}",
                self.maximum_buffer_size
            )));
        }
        if self.maximum_buffer_size == 0 {
            self.maximum_buffer_size = MAXIMUM_BUFFER_SIZE;
        }
        if self.maximum_cached_tables == 0 {
            return Err(CoreError::invalid_config(
                "maximum cached tables must be at least 1",
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.maximum_buffer_size, MAXIMUM_BUFFER_SIZE);
        assert_eq!(config.maximum_cached_tables, DEFAULT_CACHED_TABLES);
        assert_eq!(config.serialization_format, SerializationFormat::Json);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .maximum_buffer_size(1024)
            .maximum_cached_tables(2)
            .serialization_format(SerializationFormat::Cbor);

        assert_eq!(config.maximum_buffer_size, 1024);
        assert_eq!(config.maximum_cached_tables, 2);
        assert_eq!(config.serialization_format, SerializationFormat::Cbor);
    }

    #[test]
    fn zero_buffer_size_means_default() {
        let config = Config::new().maximum_buffer_size(0).validate().unwrap();
        assert_eq!(config.maximum_buffer_size, MAXIMUM_BUFFER_SIZE);
    }

    #[test]
    fn oversized_buffer_rejected() {
        let result = Config::new()
            .maximum_buffer_size(MAXIMUM_BUFFER_SIZE + 1)
            .validate();
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn zero_cache_rejected() {
        assert!(Config::new().maximum_cached_tables(0).validate().is_err());
    }
}

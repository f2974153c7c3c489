//! Record serialization.
//!
//! The container stores opaque byte payloads; turning a record into bytes
//! and back is delegated to one of the supported serde formats. The format
//! is chosen when a container is created and recorded in `metadata.txt`.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Serialization format of the records in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializationFormat {
    /// JSON documents (`serde_json`).
    #[default]
    Json,
    /// CBOR documents (`ciborium`).
    Cbor,
}

impl SerializationFormat {
    /// Returns the name recorded in `metadata.txt`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
        }
    }

    /// Serializes a record.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the encoder fails or produces no bytes.
    pub fn serialize<T: Serialize>(self, record: &T) -> CoreResult<Vec<u8>> {
        let data = match self {
            Self::Json => {
                serde_json::to_vec(record).map_err(|e| CoreError::serialization(e.to_string()))?
            }
            Self::Cbor => {
                let mut data = Vec::new();
                ciborium::into_writer(record, &mut data)
                    .map_err(|e| CoreError::serialization(e.to_string()))?;
                data
            }
        };

        if data.is_empty() {
            return Err(CoreError::serialization("record serialized to no data"));
        }
        Ok(data)
    }

    /// Deserializes a record.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the bytes are not a valid record.
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> CoreResult<T> {
        match self {
            Self::Json => {
                serde_json::from_slice(data).map_err(|e| CoreError::serialization(e.to_string()))
            }
            Self::Cbor => {
                ciborium::from_reader(data).map_err(|e| CoreError::serialization(e.to_string()))
            }
        }
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializationFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "json" => Ok(Self::Json),
            "cbor" => Ok(Self::Cbor),
            other => Err(CoreError::UnsupportedSerialization {
                format: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{AttributeValue, Event};

    fn sample_event() -> Event {
        let mut event = Event::new(1_456_000_000_000_000, "fs:stat");
        event.parser = Some("filestat".to_string());
        event.set_attribute("filename", AttributeValue::from("/etc/passwd"));
        event.set_attribute("inode", AttributeValue::Integer(4096));
        event.set_attribute("allocated", AttributeValue::Bool(true));
        event
    }

    #[test]
    fn json_roundtrip() {
        let event = sample_event();
        let data = SerializationFormat::Json.serialize(&event).unwrap();
        let decoded: Event = SerializationFormat::Json.deserialize(&data).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn cbor_roundtrip() {
        let event = sample_event();
        let data = SerializationFormat::Cbor.serialize(&event).unwrap();
        let decoded: Event = SerializationFormat::Cbor.deserialize(&data).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn garbage_fails_to_deserialize() {
        let result: CoreResult<Event> = SerializationFormat::Json.deserialize(b"{not json");
        assert!(matches!(result, Err(CoreError::Serialization { .. })));
    }

    #[test]
    fn unknown_format_rejected() {
        let result = "protobuf".parse::<SerializationFormat>();
        assert!(matches!(
            result,
            Err(CoreError::UnsupportedSerialization { .. })
        ));
        assert_eq!(
            "cbor".parse::<SerializationFormat>().unwrap(),
            SerializationFormat::Cbor
        );
    }
}

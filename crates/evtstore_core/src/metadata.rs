//! Container metadata (`metadata.txt`).
//!
//! The metadata member is a small INI-style text block:
//!
//! ```text
//! [evtstore]
//! format_version=20160525
//! serialization_format=json
//! storage_type=session
//! ```
//!
//! `key: value` lines are accepted when reading, as are blank lines and
//! `#`/`;` comments. Unknown keys are ignored.

use crate::error::{CoreError, CoreResult};
use crate::serializer::SerializationFormat;
use crate::types::{StorageType, COMPATIBLE_FORMAT_VERSION, FORMAT_VERSION};

/// Section header of the metadata block.
pub const METADATA_SECTION: &str = "evtstore";

/// Metadata describing a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMetadata {
    /// Format version the container was written with.
    pub format_version: i64,
    /// Serialization format of every record in the container.
    pub serialization_format: SerializationFormat,
    /// Whether the container is a session or a task container.
    pub storage_type: StorageType,
}

impl StorageMetadata {
    /// Creates metadata for a new container at the current format version.
    #[must_use]
    pub fn new(serialization_format: SerializationFormat, storage_type: StorageType) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            serialization_format,
            storage_type,
        }
    }

    /// Encodes the metadata block.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "[{METADATA_SECTION}]\nformat_version={}\nserialization_format={}\nstorage_type={}\n\n",
            self.format_version, self.serialization_format, self.storage_type
        )
        .into_bytes()
    }

    /// Decodes a metadata block.
    ///
    /// A missing `storage_type` means a session container.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the block is not UTF-8, the section is
    /// missing, or the format version is missing or not an integer, and
    /// `UnsupportedSerialization` for an unknown serialization format.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| CoreError::invalid_format("metadata is not valid UTF-8"))?;

        let mut in_section = false;
        let mut seen_section = false;
        let mut format_version = None;
        let mut serialization_format = None;
        let mut storage_type = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_section = section.trim() == METADATA_SECTION;
                seen_section |= in_section;
                continue;
            }
            if !in_section {
                continue;
            }

            let Some((key, value)) = line.split_once(['=', ':']) else {
                return Err(CoreError::invalid_format(format!(
                    "malformed metadata line: {line}"
                )));
            };
            let value = value.trim();
            match key.trim() {
                "format_version" => {
                    let version = value.parse::<i64>().map_err(|_| {
                        CoreError::invalid_format(format!("invalid format version: {value}"))
                    })?;
                    format_version = Some(version);
                }
                "serialization_format" => serialization_format = Some(value.parse()?),
                "storage_type" if !value.is_empty() => storage_type = Some(value.parse()?),
                _ => {}
            }
        }

        if !seen_section {
            return Err(CoreError::invalid_format(format!(
                "metadata is missing the [{METADATA_SECTION}] section"
            )));
        }
        let format_version =
            format_version.ok_or_else(|| CoreError::invalid_format("missing format version"))?;
        let serialization_format = serialization_format.ok_or_else(|| {
            CoreError::UnsupportedSerialization {
                format: String::new(),
            }
        })?;

        Ok(Self {
            format_version,
            serialization_format,
            storage_type: storage_type.unwrap_or_default(),
        })
    }

    /// Checks that the format version can be read by this implementation.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormatVersion` when the version is older than the
    /// minimum compatible version or newer than the current version.
    pub fn check_format_version(&self) -> CoreResult<()> {
        if self.format_version < COMPATIBLE_FORMAT_VERSION || self.format_version > FORMAT_VERSION
        {
            return Err(CoreError::UnsupportedFormatVersion {
                version: self.format_version,
                minimum: COMPATIBLE_FORMAT_VERSION,
                maximum: FORMAT_VERSION,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let metadata = StorageMetadata::new(SerializationFormat::Cbor, StorageType::Task);
        let decoded = StorageMetadata::decode(&metadata.encode()).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn decode_accepts_colon_separator_and_comments() {
        let data = concat!(
            "# written by hand\n[evtstore]\n",
            "format_version: 20160511\nserialization_format: json\n",
        )
        .as_bytes();
        let metadata = StorageMetadata::decode(data).unwrap();
        assert_eq!(metadata.format_version, 20160511);
        assert_eq!(metadata.serialization_format, SerializationFormat::Json);
        assert_eq!(metadata.storage_type, StorageType::Session);
    }

    #[test]
    fn decode_ignores_other_sections() {
        let data = concat!(
            "[other]\nformat_version=1\n",
            "[evtstore]\nformat_version=20160525\nserialization_format=json\n",
        )
        .as_bytes();
        let metadata = StorageMetadata::decode(data).unwrap();
        assert_eq!(metadata.format_version, 20160525);
    }

    #[test]
    fn missing_section_rejected() {
        let result = StorageMetadata::decode(b"format_version=20160525\n");
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn missing_or_bad_version_rejected() {
        let result = StorageMetadata::decode(b"[evtstore]\nserialization_format=json\n");
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));

        let result = StorageMetadata::decode(
            b"[evtstore]\nformat_version=soon\nserialization_format=json\n",
        );
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn unknown_serialization_rejected() {
        let result = StorageMetadata::decode(
            b"[evtstore]\nformat_version=20160525\nserialization_format=protobuf\n",
        );
        assert!(matches!(
            result,
            Err(CoreError::UnsupportedSerialization { .. })
        ));
    }

    #[test]
    fn version_gate() {
        let mut metadata = StorageMetadata::new(SerializationFormat::Json, StorageType::Session);
        assert!(metadata.check_format_version().is_ok());

        metadata.format_version = COMPATIBLE_FORMAT_VERSION;
        assert!(metadata.check_format_version().is_ok());

        metadata.format_version = COMPATIBLE_FORMAT_VERSION - 1;
        assert!(matches!(
            metadata.check_format_version(),
            Err(CoreError::UnsupportedFormatVersion { .. })
        ));

        metadata.format_version = FORMAT_VERSION + 1;
        assert!(metadata.check_format_version().is_err());
    }
}

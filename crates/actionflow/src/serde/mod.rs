//! Payload serialization and deserialization.
//!
//! Sinks turn record keys and values into wire bytes with a
//! [`SerializeFn`]; sources turn wire bytes back into a [`Payload`] with a
//! [`DeserializeFn`]. Both are plain function pointers so they are checked
//! at compile time and cheap to copy into connector configs.
//!
//! - [`serializers`]: `to_binary` (default), `as_is`, `to_json`, `to_zipped_binary`
//! - [`deserializers`]: `binary_to_string` (default), `from_json`, `unzip_to_string`, `as_bytes`
//! - [`Format`]: named formats, for selecting a pair from configuration

pub mod deserializers;
pub mod serializers;

use bytes::Bytes;

use crate::error::SerdeError;
use crate::record::Payload;

/// Encodes a payload into wire bytes.
pub type SerializeFn = fn(&Payload) -> Result<Bytes, SerdeError>;

/// Decodes wire bytes into a payload.
pub type DeserializeFn = fn(&[u8]) -> Result<Payload, SerdeError>;

/// Named payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// UTF-8 text; bytes pass through unchanged.
    #[default]
    Text,
    /// Raw bytes, no conversion.
    Raw,
    /// JSON documents.
    Json,
    /// zlib-compressed UTF-8 text.
    Zlib,
}

impl Format {
    /// Returns the format name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Raw => "raw",
            Format::Json => "json",
            Format::Zlib => "zlib",
        }
    }

    /// The serializer writing this format.
    #[must_use]
    pub fn serializer(&self) -> SerializeFn {
        match self {
            Format::Text => serializers::to_binary,
            Format::Raw => serializers::as_is,
            Format::Json => serializers::to_json,
            Format::Zlib => serializers::to_zipped_binary,
        }
    }

    /// The deserializer reading this format.
    #[must_use]
    pub fn deserializer(&self) -> DeserializeFn {
        match self {
            Format::Text => deserializers::binary_to_string,
            Format::Raw => deserializers::as_bytes,
            Format::Json => deserializers::from_json,
            Format::Zlib => deserializers::unzip_to_string,
        }
    }
}

impl std::str::FromStr for Format {
    type Err = SerdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "string" | "utf8" => Ok(Format::Text),
            "raw" | "bytes" => Ok(Format::Raw),
            "json" => Ok(Format::Json),
            "zlib" | "zipped" => Ok(Format::Zlib),
            other => Err(SerdeError::Unsupported(format!("unknown format '{other}'"))),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Built-in deserializers.

use std::io::Read;

use bytes::Bytes;
use flate2::read::ZlibDecoder;

use crate::error::SerdeError;
use crate::record::Payload;

/// Decodes UTF-8 text.
///
/// # Errors
///
/// Returns `SerdeError::Utf8` if the bytes are not valid UTF-8.
pub fn binary_to_string(data: &[u8]) -> Result<Payload, SerdeError> {
    Ok(Payload::Text(String::from_utf8(data.to_vec())?))
}

/// Parses a JSON document.
///
/// # Errors
///
/// Returns `SerdeError::Json` if the bytes are not valid JSON.
pub fn from_json(data: &[u8]) -> Result<Payload, SerdeError> {
    Ok(Payload::Json(serde_json::from_slice(data)?))
}

/// Decompresses zlib data and decodes the result as UTF-8 text.
///
/// # Errors
///
/// Returns `SerdeError::Compression` for corrupt input, or
/// `SerdeError::Utf8` if the decompressed bytes are not text.
pub fn unzip_to_string(data: &[u8]) -> Result<Payload, SerdeError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SerdeError::Compression(e.to_string()))?;
    Ok(Payload::Text(String::from_utf8(out)?))
}

/// Keeps the raw bytes.
///
/// # Errors
///
/// Never fails.
pub fn as_bytes(data: &[u8]) -> Result<Payload, SerdeError> {
    Ok(Payload::Bytes(Bytes::copy_from_slice(data)))
}

//! Built-in serializers.

use std::io::Write;

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::SerdeError;
use crate::record::Payload;

/// Bytes pass through, text is UTF-8 encoded, JSON is encoded as JSON text.
///
/// # Errors
///
/// Returns `SerdeError::Json` if a JSON value cannot be encoded.
pub fn to_binary(data: &Payload) -> Result<Bytes, SerdeError> {
    match data {
        Payload::Bytes(b) => Ok(b.clone()),
        Payload::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        Payload::Json(v) => Ok(Bytes::from(serde_json::to_vec(v)?)),
    }
}

/// Requires the payload to already be bytes.
///
/// # Errors
///
/// Returns `SerdeError::Unsupported` for text or JSON payloads.
pub fn as_is(data: &Payload) -> Result<Bytes, SerdeError> {
    match data {
        Payload::Bytes(b) => Ok(b.clone()),
        _ => Err(SerdeError::Unsupported(
            "Expected data to already be bytes".into(),
        )),
    }
}

/// Encodes the payload as a JSON document.
///
/// Text becomes a JSON string.
///
/// # Errors
///
/// Returns `SerdeError::Unsupported` for raw bytes, which have no JSON form.
pub fn to_json(data: &Payload) -> Result<Bytes, SerdeError> {
    let encoded = match data {
        Payload::Json(v) => serde_json::to_vec(v)?,
        Payload::Text(s) => serde_json::to_vec(s)?,
        Payload::Bytes(_) => {
            return Err(SerdeError::Unsupported(
                "raw bytes cannot be encoded as JSON".into(),
            ))
        }
    };
    Ok(Bytes::from(encoded))
}

/// Converts with [`to_binary`] and compresses the result with zlib.
///
/// # Errors
///
/// Returns `SerdeError::Compression` if compression fails.
pub fn to_zipped_binary(data: &Payload) -> Result<Bytes, SerdeError> {
    let binary = to_binary(data)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&binary)
        .map_err(|e| SerdeError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map(Bytes::from)
        .map_err(|e| SerdeError::Compression(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_binary() {
        assert_eq!(to_binary(&"abc".into()).unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(
            to_binary(&Payload::Bytes(Bytes::from_static(&[0, 1]))).unwrap(),
            Bytes::from_static(&[0, 1])
        );
        assert_eq!(
            to_binary(&json!({"a": 1}).into()).unwrap(),
            Bytes::from_static(br#"{"a":1}"#)
        );
    }

    #[test]
    fn test_as_is_rejects_text() {
        assert!(as_is(&"abc".into()).is_err());
        assert!(as_is(&Payload::Bytes(Bytes::from_static(b"x"))).is_ok());
    }

    #[test]
    fn test_to_json() {
        assert_eq!(to_json(&"hi".into()).unwrap(), Bytes::from_static(br#""hi""#));
        assert_eq!(
            to_json(&json!([1, 2]).into()).unwrap(),
            Bytes::from_static(b"[1,2]")
        );
        assert!(to_json(&Payload::Bytes(Bytes::new())).is_err());
    }

    #[test]
    fn test_zipped_has_zlib_header() {
        let zipped = to_zipped_binary(&"some text".into()).unwrap();
        assert_eq!(zipped[0], 0x78);
    }
}

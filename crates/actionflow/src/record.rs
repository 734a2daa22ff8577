//! Records and the header algebra.
//!
//! A [`Record`] is an immutable value: every header mutation returns a new
//! record with a fresh header sequence and leaves the original untouched.
//! Header keys are matched case-insensitively on read and stored with their
//! original case. Duplicate keys are allowed and their order is preserved,
//! which is how multi-valued headers such as repeated `Security-Label`
//! entries are carried.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::RecordError;

/// A key, value or header payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes, as read off the wire.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// Structured JSON data.
    Json(serde_json::Value),
}

impl Payload {
    /// Encodes the payload into its wire bytes.
    ///
    /// Text is UTF-8 encoded and JSON is rendered compactly.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Payload::Bytes(b) => b.clone(),
            Payload::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Payload::Json(v) => Bytes::from(v.to_string()),
        }
    }

    /// Returns the payload as text if it is text or UTF-8 bytes.
    #[must_use]
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Payload::Text(s) => Some(Cow::Borrowed(s)),
            Payload::Bytes(b) => std::str::from_utf8(b).ok().map(Cow::Borrowed),
            Payload::Json(_) => None,
        }
    }

    /// Returns the JSON value if this payload is structured.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Encodes into the form stored by [`Record::add_header`].
    fn encoded(self) -> Payload {
        match self {
            Payload::Bytes(b) => Payload::Bytes(b),
            other => Payload::Bytes(other.to_bytes()),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Payload::Text(s) => f.write_str(s),
            Payload::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(b))
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Json(v)
    }
}

/// Conversion into an optional header value.
///
/// Implemented for anything convertible into a [`Payload`] and for `Option`
/// of those, so `None` can be passed to add a header with no value.
pub trait IntoHeaderValue {
    /// Converts into the optional payload stored in a [`Header`].
    fn into_header_value(self) -> Option<Payload>;
}

impl<T: Into<Payload>> IntoHeaderValue for T {
    fn into_header_value(self) -> Option<Payload> {
        Some(self.into())
    }
}

impl<T: Into<Payload>> IntoHeaderValue for Option<T> {
    fn into_header_value(self) -> Option<Payload> {
        self.map(Into::into)
    }
}

/// A single record header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Header key, stored with its original case.
    pub key: String,
    /// Header value, `None` when the header carries no value.
    pub value: Option<Payload>,
}

impl Header {
    /// Creates a header storing the value exactly as given.
    pub fn new(key: impl Into<String>, value: impl IntoHeaderValue) -> Self {
        Self {
            key: key.into(),
            value: value.into_header_value(),
        }
    }

    /// Creates a header whose value is encoded to wire bytes.
    pub fn encoded(key: impl Into<String>, value: impl IntoHeaderValue) -> Self {
        Self {
            key: key.into(),
            value: value.into_header_value().map(Payload::encoded),
        }
    }

    /// Returns `true` if this header's key matches `key` ignoring case.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        keys_match(&self.key, key)
    }

    fn decode(&self) -> Result<Option<String>, RecordError> {
        match &self.value {
            None => Ok(None),
            Some(Payload::Text(s)) => Ok(Some(s.clone())),
            Some(Payload::Bytes(b)) => String::from_utf8(b.to_vec())
                .map(Some)
                .map_err(|_| RecordError::InvalidUtf8 {
                    key: self.key.clone(),
                }),
            Some(Payload::Json(_)) => Err(RecordError::NotText {
                key: self.key.clone(),
            }),
        }
    }
}

/// Header keys compare by Unicode lowercase. Folds that change the length of
/// a key, such as `ß` against `SS`, are not applied.
fn keys_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// Reference to the transport message a record was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition the message was read from.
    pub partition: i32,
    /// Offset of the message within its partition.
    pub offset: i64,
    /// Broker timestamp in milliseconds, if available.
    pub timestamp: Option<i64>,
}

/// A record flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    headers: Vec<Header>,
    key: Option<Payload>,
    value: Option<Payload>,
    raw: Option<Arc<RawMessage>>,
}

impl Record {
    /// Creates a record with the given headers, key and value.
    pub fn new(
        headers: Vec<Header>,
        key: impl IntoHeaderValue,
        value: impl IntoHeaderValue,
    ) -> Self {
        Self {
            headers,
            key: key.into_header_value(),
            value: value.into_header_value(),
            raw: None,
        }
    }

    /// Attaches the transport message this record was read from.
    #[must_use]
    pub fn with_raw(mut self, raw: RawMessage) -> Self {
        self.raw = Some(Arc::new(raw));
        self
    }

    /// Returns the headers in order.
    #[must_use]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Returns the record key.
    #[must_use]
    pub fn key(&self) -> Option<&Payload> {
        self.key.as_ref()
    }

    /// Returns the record value.
    #[must_use]
    pub fn value(&self) -> Option<&Payload> {
        self.value.as_ref()
    }

    /// Returns the underlying transport message, if any.
    #[must_use]
    pub fn raw(&self) -> Option<&RawMessage> {
        self.raw.as_deref()
    }

    /// Returns a copy of this record with a different key and value.
    #[must_use]
    pub fn with_key_value(&self, key: impl IntoHeaderValue, value: impl IntoHeaderValue) -> Self {
        Self {
            headers: self.headers.clone(),
            key: key.into_header_value(),
            value: value.into_header_value(),
            raw: self.raw.clone(),
        }
    }

    /// Consumes the record, returning its parts.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Header>, Option<Payload>, Option<Payload>) {
        (self.headers, self.key, self.value)
    }

    fn with_headers(&self, headers: Vec<Header>) -> Self {
        Self {
            headers,
            key: self.key.clone(),
            value: self.value.clone(),
            raw: self.raw.clone(),
        }
    }

    /// Returns the first value for `key`, decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if the matching value is structured data or
    /// invalid UTF-8.
    pub fn get_first_header(&self, key: &str) -> Result<Option<String>, RecordError> {
        match self.headers.iter().find(|h| h.matches(key)) {
            Some(h) => h.decode(),
            None => Ok(None),
        }
    }

    /// Returns the last value for `key`, decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if any matching value cannot be decoded.
    pub fn get_last_header(&self, key: &str) -> Result<Option<String>, RecordError> {
        Ok(self.get_headers(key)?.pop().flatten())
    }

    /// Returns every value for `key` in header order.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if any matching value cannot be decoded.
    pub fn get_headers(&self, key: &str) -> Result<Vec<Option<String>>, RecordError> {
        self.headers
            .iter()
            .filter(|h| h.matches(key))
            .map(Header::decode)
            .collect()
    }

    /// Returns `true` if any header matches `key`.
    #[must_use]
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.iter().any(|h| h.matches(key))
    }

    /// Appends a header, encoding text and JSON values to bytes.
    ///
    /// Existing headers with the same key are kept.
    #[must_use]
    pub fn add_header(&self, key: impl Into<String>, value: impl IntoHeaderValue) -> Self {
        let mut headers = self.headers.clone();
        headers.push(Header::encoded(key, value));
        self.with_headers(headers)
    }

    /// Appends several headers in order.
    #[must_use]
    pub fn add_headers<I>(&self, new_headers: I) -> Self
    where
        I: IntoIterator<Item = Header>,
    {
        let mut headers = self.headers.clone();
        headers.extend(
            new_headers
                .into_iter()
                .map(|h| Header::encoded(h.key, h.value)),
        );
        self.with_headers(headers)
    }

    /// Replaces the first header matching `key`, or appends one.
    ///
    /// Later duplicates are left untouched. The value is stored as given.
    /// An appended header uses the lowercased key.
    #[must_use]
    pub fn replace_or_add_header(&self, key: &str, value: impl IntoHeaderValue) -> Self {
        let value = value.into_header_value();
        let mut headers = self.headers.clone();
        match headers.iter_mut().find(|h| h.matches(key)) {
            Some(existing) => existing.value = value,
            None => headers.push(Header {
                key: key.to_lowercase(),
                value,
            }),
        }
        self.with_headers(headers)
    }

    /// Removes headers matching `key`.
    ///
    /// With no `value`, every matching header is removed. With a value, only
    /// headers whose encoded bytes equal the encoded filter are removed.
    #[must_use]
    pub fn remove_header(&self, key: &str, value: Option<&Payload>) -> Self {
        let filter = value.map(Payload::to_bytes);
        let headers = self
            .headers
            .iter()
            .filter(|h| {
                if !h.matches(key) {
                    return true;
                }
                match &filter {
                    None => false,
                    Some(wanted) => h.value.as_ref().map(Payload::to_bytes).as_ref() != Some(wanted),
                }
            })
            .cloned()
            .collect();
        self.with_headers(headers)
    }
}

/// Converts a key/value map into headers, appended after `existing`.
///
/// Values are encoded as [`Record::add_header`] would encode them.
#[must_use]
pub fn to_headers<K, V>(map: BTreeMap<K, V>, existing: &[Header]) -> Vec<Header>
where
    K: Into<String>,
    V: IntoHeaderValue,
{
    existing
        .iter()
        .cloned()
        .map(|h| Header::encoded(h.key, h.value))
        .chain(map.into_iter().map(|(k, v)| Header::encoded(k, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labelled() -> Record {
        Record::new(
            vec![
                Header::new("Security-Label", "a"),
                Header::new("Content-Type", "text/plain"),
                Header::new("security-label", "b"),
            ],
            "k",
            "v",
        )
    }

    #[test]
    fn test_add_header_then_get_first() {
        let r = Record::new(vec![], "k", "v");
        let r2 = r.add_header("Exec-Path", "mapper");
        assert_eq!(r2.get_first_header("exec-path").unwrap().as_deref(), Some("mapper"));
        assert!(r.headers().is_empty());
    }

    #[test]
    fn test_get_first_and_last_case_insensitive() {
        let r = labelled();
        assert_eq!(r.get_first_header("SECURITY-LABEL").unwrap().as_deref(), Some("a"));
        assert_eq!(r.get_last_header("Security-Label").unwrap().as_deref(), Some("b"));
        assert_eq!(r.get_first_header("missing").unwrap(), None);
    }

    #[test]
    fn test_non_ascii_keys_match_by_lowercase() {
        let r = Record::new(vec![Header::new("Übermittler", "x")], "k", "v");
        assert_eq!(r.get_last_header("ÜBERMITTLER").unwrap().as_deref(), Some("x"));
        assert!(r.has_header("übermittler"));

        let r = Record::new(vec![Header::new("Straße", "y")], "k", "v");
        assert!(!r.has_header("STRASSE"));
        assert!(r.has_header("straße"));
    }

    #[test]
    fn test_get_headers_all_values() {
        let values = labelled().get_headers("security-label").unwrap();
        assert_eq!(values, vec![Some("a".to_string()), Some("b".to_string())]);
    }

    #[test]
    fn test_json_header_is_not_text() {
        let r = Record::new(vec![Header::new("policy", json!({"a": 1}))], None::<&str>, None::<&str>);
        assert!(matches!(r.get_first_header("policy"), Err(RecordError::NotText { .. })));
    }

    #[test]
    fn test_add_header_encodes_json_to_bytes() {
        let r = Record::default().add_header("policy", json!({"DH": 1}));
        assert_eq!(r.headers()[0].value, Some(Payload::Bytes(Bytes::from(r#"{"DH":1}"#))));
        assert_eq!(r.get_first_header("policy").unwrap().as_deref(), Some(r#"{"DH":1}"#));
    }

    #[test]
    fn test_add_header_keeps_duplicates() {
        let r = labelled().add_header("Security-Label", "c");
        assert_eq!(r.get_headers("security-label").unwrap().len(), 3);
    }

    #[test]
    fn test_add_header_none_value() {
        let r = Record::default().add_header("flag", None::<&str>);
        assert!(r.has_header("FLAG"));
        assert_eq!(r.get_first_header("flag").unwrap(), None);
    }

    #[test]
    fn test_replace_or_add_replaces_first_only() {
        let r = labelled().replace_or_add_header("SECURITY-LABEL", "z");
        let values = r.get_headers("security-label").unwrap();
        assert_eq!(values, vec![Some("z".to_string()), Some("b".to_string())]);
        assert_eq!(r.headers()[0].key, "Security-Label");
    }

    #[test]
    fn test_replace_or_add_appends_lowercased() {
        let r = Record::default().replace_or_add_header("Request-Id", "x");
        assert_eq!(r.headers()[0].key, "request-id");
        assert_eq!(r.headers()[0].value, Some(Payload::Text("x".into())));
    }

    #[test]
    fn test_remove_header_all() {
        let r = labelled().remove_header("security-label", None);
        assert!(!r.has_header("Security-Label"));
        assert!(r.has_header("content-type"));
        assert_eq!(labelled().headers().len(), 3);
    }

    #[test]
    fn test_remove_header_by_value() {
        let filter = Payload::from("b");
        let r = labelled().remove_header("Security-Label", Some(&filter));
        assert_eq!(r.get_headers("security-label").unwrap(), vec![Some("a".to_string())]);
    }

    #[test]
    fn test_remove_header_value_is_exact() {
        let filter = Payload::from("A");
        let r = labelled().remove_header("Security-Label", Some(&filter));
        assert_eq!(r.get_headers("security-label").unwrap().len(), 2);
    }

    #[test]
    fn test_to_headers_appends_after_existing() {
        let mut map = BTreeMap::new();
        map.insert("Content-Type", "application/json");
        let headers = to_headers(map, &[Header::new("Exec-Path", "x")]);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].key, "Exec-Path");
        assert_eq!(headers[1].value, Some(Payload::Bytes(Bytes::from("application/json"))));
    }

    #[test]
    fn test_with_raw_preserved_across_mutation() {
        let raw = RawMessage {
            topic: "t".into(),
            partition: 1,
            offset: 7,
            timestamp: None,
        };
        let r = Record::new(vec![], "k", "v").with_raw(raw.clone());
        let r2 = r.add_header("a", "b");
        assert_eq!(r2.raw(), Some(&raw));
    }
}

//! Data catalog datasets.
//!
//! Adapters describe where their data comes from with a [`DataSet`], and can
//! publish registration and update records for it to a catalog topic.

use serde_json::{Map, Value};

use crate::error::SerdeError;
use crate::record::{Header, Record};

/// Default dataset id, title and MIME type for adapters that do not name one.
pub const DEFAULT_DATASET_ID: &str = "actionflow";

/// A dataset that can describe itself to a data catalog.
pub trait DataSet: Send + Sync {
    /// Dataset id.
    fn id(&self) -> &str;

    /// Human title, also used as the adapter's input name.
    fn title(&self) -> &str;

    /// MIME type of the source data.
    fn source_mime_type(&self) -> &str;

    /// `Content-Type` of the records this dataset produces.
    fn content_type(&self) -> &str;

    /// Builds a registration record from `fields`.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError` if the record body cannot be encoded.
    fn registration_record(
        &self,
        fields: Map<String, Value>,
        headers: Vec<Header>,
    ) -> Result<Record, SerdeError>;

    /// Builds an update record stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError` if the record body cannot be encoded.
    fn update_record(&self, headers: Vec<Header>) -> Result<Record, SerdeError>;
}

/// A dataset described with plain JSON documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDataSet {
    id: String,
    title: String,
    source_mime_type: String,
}

impl SimpleDataSet {
    /// Creates a dataset.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_mime_type: source_mime_type.into(),
        }
    }
}

impl Default for SimpleDataSet {
    fn default() -> Self {
        Self::new(DEFAULT_DATASET_ID, DEFAULT_DATASET_ID, "unknown")
    }
}

impl DataSet for SimpleDataSet {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn source_mime_type(&self) -> &str {
        &self.source_mime_type
    }

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn registration_record(
        &self,
        fields: Map<String, Value>,
        headers: Vec<Header>,
    ) -> Result<Record, SerdeError> {
        let mut body = Map::new();
        body.insert("id".into(), Value::from(self.id.as_str()));
        body.insert("title".into(), Value::from(self.title.as_str()));
        body.insert(
            "source_mime_type".into(),
            Value::from(self.source_mime_type.as_str()),
        );
        // Caller fields win over the core ones.
        body.extend(fields);
        Ok(Record::new(
            headers,
            None::<String>,
            serde_json::to_string(&Value::Object(body))?,
        ))
    }

    fn update_record(&self, headers: Vec<Header>) -> Result<Record, SerdeError> {
        let body = serde_json::json!({
            "id": self.id,
            "last_updated_at": chrono::Local::now().to_rfc3339(),
        });
        Ok(Record::new(headers, None::<String>, serde_json::to_string(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(record: &Record) -> Value {
        serde_json::from_str(&record.value().unwrap().as_text().unwrap()).unwrap()
    }

    #[test]
    fn test_registration_merges_fields() {
        let dataset = SimpleDataSet::new("ds1", "Weather", "text/csv");
        let mut fields = Map::new();
        fields.insert("publisher".into(), Value::from("met"));
        fields.insert("title".into(), Value::from("Override"));

        let record = dataset
            .registration_record(fields, vec![Header::new("X", "1")])
            .unwrap();
        let body = body(&record);
        assert_eq!(body["id"], "ds1");
        assert_eq!(body["title"], "Override");
        assert_eq!(body["source_mime_type"], "text/csv");
        assert_eq!(body["publisher"], "met");
        assert!(record.has_header("x"));
    }

    #[test]
    fn test_update_record() {
        let dataset = SimpleDataSet::default();
        assert_eq!(dataset.title(), "actionflow");
        assert_eq!(dataset.source_mime_type(), "unknown");
        assert_eq!(dataset.content_type(), "application/json");

        let body = body(&dataset.update_record(Vec::new()).unwrap());
        assert_eq!(body["id"], "actionflow");
        assert!(chrono::DateTime::parse_from_rfc3339(body["last_updated_at"].as_str().unwrap()).is_ok());
    }
}

//! In-memory sources and sinks for tests and development.
//!
//! - [`ListSource`]: yields a fixed list of records in order
//! - [`DictionarySource`]: yields key/value pairs as records
//! - [`ListSink`]: collects sent records behind a shared handle

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connector::{DataSink, DataSource};
use crate::error::ConnectorError;
use crate::record::{Payload, Record};

/// A source backed by a list of records.
#[derive(Debug, Clone, Default)]
pub struct ListSource {
    records: Vec<Record>,
    position: usize,
}

impl ListSource {
    /// Creates a source over the given records.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            position: 0,
        }
    }
}

impl FromIterator<Record> for ListSource {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for ListSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "In-Memory List({} records)", self.records.len())
    }
}

#[async_trait]
impl DataSource for ListSource {
    fn name(&self) -> &str {
        "List"
    }

    async fn next_record(&mut self) -> Result<Option<Record>, ConnectorError> {
        let record = self.records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    async fn remaining(&mut self) -> Option<u64> {
        u64::try_from(self.records.len() - self.position).ok()
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.position = 0;
        Ok(())
    }
}

/// A source yielding one record per key/value pair, with no headers.
///
/// Pairs are yielded in key order.
#[derive(Debug, Clone, Default)]
pub struct DictionarySource {
    entries: BTreeMap<String, Payload>,
    pending: Option<VecDeque<(String, Payload)>>,
}

impl DictionarySource {
    /// Creates a source over the given entries.
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Payload>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            pending: None,
        }
    }
}

impl fmt::Display for DictionarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "In-Memory Dictionary({} items)", self.entries.len())
    }
}

#[async_trait]
impl DataSource for DictionarySource {
    fn name(&self) -> &str {
        "Dictionary"
    }

    async fn next_record(&mut self) -> Result<Option<Record>, ConnectorError> {
        let entries = &self.entries;
        let pending = self
            .pending
            .get_or_insert_with(|| entries.clone().into_iter().collect());
        Ok(pending
            .pop_front()
            .map(|(k, v)| Record::new(Vec::new(), k, v)))
    }

    async fn remaining(&mut self) -> Option<u64> {
        let left = self
            .pending
            .as_ref()
            .map_or(self.entries.len(), VecDeque::len);
        u64::try_from(left).ok()
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.pending = None;
        Ok(())
    }
}

/// A sink collecting records in memory.
///
/// Clones share the same underlying list, so a test can keep one handle
/// while an engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ListSink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl ListSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the records sent so far.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Number of records sent so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing has been sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl fmt::Display for ListSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("In-Memory List")
    }
}

#[async_trait]
impl DataSink for ListSink {
    fn name(&self) -> &str {
        "List"
    }

    async fn send(&mut self, record: Record) -> Result<(), ConnectorError> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: u32) -> Vec<Record> {
        (1..=n)
            .map(|i| Record::new(Vec::new(), i.to_string(), format!("value {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_list_source_yields_in_order() {
        let mut source = ListSource::new(records(3));
        assert_eq!(source.to_string(), "In-Memory List(3 records)");
        assert_eq!(source.remaining().await, Some(3));
        let first = source.next_record().await.unwrap().unwrap();
        assert_eq!(first.key().unwrap().to_string(), "1");
        assert_eq!(source.remaining().await, Some(2));
        source.next_record().await.unwrap();
        source.next_record().await.unwrap();
        assert!(source.next_record().await.unwrap().is_none());
        assert_eq!(source.remaining().await, Some(0));
    }

    #[tokio::test]
    async fn test_list_source_close_rewinds() {
        let mut source: ListSource = records(2).into_iter().collect();
        source.next_record().await.unwrap();
        source.close().await.unwrap();
        assert_eq!(source.remaining().await, Some(2));
    }

    #[tokio::test]
    async fn test_dictionary_source() {
        let mut source = DictionarySource::new([("b", "2"), ("a", "1")]);
        assert_eq!(source.name(), "Dictionary");
        assert_eq!(source.remaining().await, Some(2));
        let first = source.next_record().await.unwrap().unwrap();
        assert_eq!(first.key().unwrap().to_string(), "a");
        assert!(first.headers().is_empty());
        assert_eq!(source.remaining().await, Some(1));
        source.next_record().await.unwrap();
        assert!(source.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sink_shares_handle() {
        let sink = ListSink::new();
        let mut owned = sink.clone();
        for record in records(4) {
            owned.send(record).await.unwrap();
        }
        owned.close().await.unwrap();
        assert_eq!(sink.len(), 4);
        assert_eq!(sink.to_string(), "In-Memory List");
        assert_eq!(sink.records()[3].value().unwrap().to_string(), "value 4");
    }
}

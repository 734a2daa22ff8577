//! Core source and sink traits.
//!
//! Defines the async traits every data source and sink implements:
//! - `DataSource`: pull-based iteration over [`Record`]s
//! - `DataSink`: push-based delivery of [`Record`]s
//!
//! Both carry a stable `name()` and a human readable [`fmt::Display`]. The
//! name goes into request ids and heartbeats, the display form into banners
//! and generated action ids. `close()` must be safe to
//! call more than once.

use std::fmt;

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::record::Record;

/// A source of records.
///
/// # Lifecycle
///
/// 1. construction opens the source
/// 2. `next_record()` is called until it returns `Ok(None)`
/// 3. `close()` releases resources (idempotent)
///
/// Sources backed by an unbounded log never return `Ok(None)`; engines stop
/// them through their shutdown signal instead.
#[async_trait]
pub trait DataSource: Send + fmt::Display {
    /// Identity of the source: the topic for topic-backed sources, otherwise
    /// a type name such as `List`.
    fn name(&self) -> &str;

    /// Returns the next record, or `None` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the underlying system fails. A missing
    /// topic is reported as [`ConnectorError::SourceNotFound`].
    async fn next_record(&mut self) -> Result<Option<Record>, ConnectorError>;

    /// Estimated number of records left to read, if known.
    async fn remaining(&mut self) -> Option<u64> {
        None
    }

    /// The topic this source reads, for sources backed by a topic.
    fn topic(&self) -> Option<&str> {
        None
    }

    /// Releases the source.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if final bookkeeping (such as an offset
    /// commit) fails.
    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// A destination for records.
#[async_trait]
pub trait DataSink: Send + fmt::Display {
    /// Identity of the sink: the topic for topic-backed sinks, otherwise a
    /// type name such as `List`.
    fn name(&self) -> &str;

    /// Delivers a record.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the record cannot be serialized or the
    /// underlying system rejects it.
    async fn send(&mut self, record: Record) -> Result<(), ConnectorError>;

    /// Flushes anything buffered and releases the sink.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if buffered records could not be flushed.
    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[async_trait]
impl<T: DataSource + ?Sized> DataSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn next_record(&mut self) -> Result<Option<Record>, ConnectorError> {
        (**self).next_record().await
    }

    async fn remaining(&mut self) -> Option<u64> {
        (**self).remaining().await
    }

    fn topic(&self) -> Option<&str> {
        (**self).topic()
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: DataSink + ?Sized> DataSink for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&mut self, record: Record) -> Result<(), ConnectorError> {
        (**self).send(record).await
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        (**self).close().await
    }
}

/// Name and display string of a connector, as shown in heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectorInfo {
    /// Connector name (the topic for topic-backed connectors).
    pub name: String,
    /// Display string.
    pub display: String,
}

impl ConnectorInfo {
    /// Captures the identity of a source.
    pub fn of_source<S: DataSource + ?Sized>(source: &S) -> Self {
        Self {
            name: source.name().to_string(),
            display: source.to_string(),
        }
    }

    /// Captures the identity of a sink.
    pub fn of_sink<S: DataSink + ?Sized>(sink: &S) -> Self {
        Self {
            name: sink.name().to_string(),
            display: sink.to_string(),
        }
    }
}

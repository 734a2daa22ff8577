//! Execution engines.
//!
//! Each engine composes an [`Action`](crate::action::Action) with the
//! connectors it manages and a caller-supplied strategy:
//!
//! | Engine | Reads | Writes | Strategy |
//! |--------|-------|--------|----------|
//! | [`Mapper`] | [`DataSource`](crate::connector::DataSource) | [`DataSink`](crate::connector::DataSink) | [`RecordMapper`] |
//! | [`Projector`] | `DataSource` | caller-managed store | [`RecordProjector`] |
//! | [`Adapter`] | caller pushes via `send()` | `DataSink` | none |
//! | [`AutomaticAdapter`] | record iterator | `DataSink` | [`RecordAdapter`] |
//!
//! A strategy returning [`ActionError::DeadLetter`] diverts that one record
//! to the dead-letter sink and processing continues. Any other error is
//! reported to the error handler, aborts the run and is returned to the
//! caller.

pub mod adapter;
pub mod headers;
pub mod mapper;
pub mod projector;

use crate::error::ActionError;
use crate::record::Record;

pub use adapter::{Adapter, AutomaticAdapter, RecordAdapter};
pub use mapper::Mapper;
pub use projector::Projector;

/// What a map function produced for one input record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MapOutput {
    /// Nothing to send.
    #[default]
    None,
    /// One output record.
    One(Record),
    /// Any number of output records (flat map).
    Many(Vec<Record>),
}

impl MapOutput {
    /// The output records, or `None` if nothing was produced.
    #[must_use]
    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            MapOutput::None => None,
            MapOutput::One(record) => Some(vec![record]),
            MapOutput::Many(records) => Some(records),
        }
    }
}

impl From<Record> for MapOutput {
    fn from(record: Record) -> Self {
        MapOutput::One(record)
    }
}

impl From<Vec<Record>> for MapOutput {
    fn from(records: Vec<Record>) -> Self {
        MapOutput::Many(records)
    }
}

impl From<Option<Record>> for MapOutput {
    fn from(record: Option<Record>) -> Self {
        record.map_or(MapOutput::None, MapOutput::One)
    }
}

/// Transforms one input record into zero or more output records.
///
/// Implemented for any `FnMut(Record) -> Result<MapOutput, ActionError>`.
pub trait RecordMapper: Send {
    /// Maps one record.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::DeadLetter`] to divert the record, or any other
    /// error to abort the run.
    fn map(&mut self, record: Record) -> Result<MapOutput, ActionError>;
}

impl<F> RecordMapper for F
where
    F: FnMut(Record) -> Result<MapOutput, ActionError> + Send,
{
    fn map(&mut self, record: Record) -> Result<MapOutput, ActionError> {
        self(record)
    }
}

/// Writes one input record to a caller-managed store.
///
/// Implemented for any `FnMut(Record) -> Result<(), ActionError>`.
pub trait RecordProjector: Send {
    /// Projects one record.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::DeadLetter`] to divert the record, or any other
    /// error to abort the run.
    fn project(&mut self, record: Record) -> Result<(), ActionError>;
}

impl<F> RecordProjector for F
where
    F: FnMut(Record) -> Result<(), ActionError> + Send,
{
    fn project(&mut self, record: Record) -> Result<(), ActionError> {
        self(record)
    }
}

/// How an engine's record loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopEnd {
    /// The input ran out.
    Exhausted,
    /// Shutdown was requested.
    Shutdown,
}

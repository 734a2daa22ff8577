//! # actionflow
//!
//! Pipeline actions over partitioned logs.
//!
//! An action reads records from a source, transforms them and writes the
//! results to a sink, keeping record headers, security labels and lineage
//! intact along the way. Progress, heartbeats, errors and dead letters are
//! routed to their own sinks.
//!
//! ## Engines
//!
//! - [`engine::Mapper`] - source to sink through a map function
//! - [`engine::Projector`] - source to a caller-managed store
//! - [`engine::Adapter`] - caller pushes records into a sink
//! - [`engine::AutomaticAdapter`] - an iterator drained into a sink
//!
//! ## Architecture
//!
//! ```text
//! DataSource ──► Action (progress, DLQ, errors, heartbeat) ──► DataSink
//!     │                        │
//! KafkaSource            Reporter / ErrorHandler
//! (seek, commit, lag)    (Kafka, file or log sinks)
//! ```
//!
//! The Kafka connectors are written against the client seams in
//! [`kafka::client`]; the `kafka` feature provides the rdkafka-backed
//! implementation and [`testing::MockCluster`] an in-memory one.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::field_reassign_with_default,
        clippy::float_cmp,
        clippy::manual_let_else,
        clippy::needless_return,
        clippy::unreadable_literal,
        clippy::approx_constant,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::unchecked_time_subtraction,
        clippy::no_effect_underscore_binding,
        unused_mut
    )
)]

// ── Records and connectors ──

/// Error types.
pub mod error;

/// Records and the header algebra.
pub mod record;

/// Security labels and the EDH policy vocabularies.
pub mod labels;

/// Core source and sink traits (`DataSource`, `DataSink`).
pub mod connector;

/// In-memory sources and sinks.
pub mod memory;

/// Payload serializers and deserializers.
pub mod serde;

/// Configuration lookup and pipeline settings.
pub mod config;

/// Kafka source and sink connectors.
pub mod kafka;

// ── Actions ──

/// Action lifecycle, progress and dead-letter routing.
pub mod action;

/// Mapper, projector and adapter engines.
pub mod engine;

/// Liveness heartbeats.
pub mod reporter;

/// Error handlers.
pub mod errors;

/// Data catalog datasets.
pub mod dataset;

/// W3C trace context propagation.
pub mod trace;

/// Action metrics.
pub mod metrics;

/// Testing utilities (in-memory Kafka cluster, failing sinks).
pub mod testing;

pub use action::{Action, ActionKind, ActionOptions, KafkaContext};
pub use connector::{DataSink, DataSource};
pub use engine::{Adapter, AutomaticAdapter, MapOutput, Mapper, Projector};
pub use error::{ActionError, ConnectorError};
pub use record::{Header, Payload, Record};

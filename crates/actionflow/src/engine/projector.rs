//! The projector engine.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::headers::REQUEST_ID_HEADER;
use super::{LoopEnd, RecordProjector};
use crate::action::{wait_for_shutdown, Action, ActionKind, ActionOptions, Wiring};
use crate::connector::{ConnectorInfo, DataSource};
use crate::error::ActionError;
use crate::errors::ErrorLevel;
use crate::metrics::ActionMetrics;
use crate::record::Record;
use crate::reporter::{Endpoint, Status};
use crate::trace::TraceContext;

/// Reads records from a source and hands each one to a projector function
/// that writes it to a store the caller manages.
pub struct Projector {
    action: Action,
    source: Box<dyn DataSource>,
    target_store: String,
    projector: Box<dyn RecordProjector>,
}

impl Projector {
    /// Creates a projector writing to `target_store`, a store of kind
    /// `target_type` (for example `graph` or `search index`).
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if a sink the action provisions
    /// itself cannot be created.
    pub fn new(
        source: impl DataSource + 'static,
        target_store: impl Into<String>,
        target_type: impl Into<String>,
        projector: impl RecordProjector + 'static,
        options: ActionOptions,
    ) -> Result<Self, ActionError> {
        let target_store = target_store.into();
        let wiring = Wiring {
            source: Some(ConnectorInfo::of_source(&source)),
            source_topic: source.topic().map(str::to_string),
            target: Some(ConnectorInfo {
                name: target_store.clone(),
                display: target_store.clone(),
            }),
            input: Endpoint::new(source.name(), "topic"),
            output: Endpoint::new(target_store.clone(), target_type),
        };
        Ok(Self {
            action: Action::new(ActionKind::Projector, wiring, options)?,
            source: Box::new(source),
            target_store,
            projector: Box::new(projector),
        })
    }

    /// The underlying action.
    #[must_use]
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Mutable access to the underlying action.
    pub fn action_mut(&mut self) -> &mut Action {
        &mut self.action
    }

    /// Metrics, unless disabled.
    #[must_use]
    pub fn metrics(&self) -> Option<Arc<ActionMetrics>> {
        self.action.metrics()
    }

    /// Runs until the source is exhausted, shutdown is requested or a
    /// record fails.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the run, after it has been reported to
    /// the error handler.
    pub async fn run(&mut self) -> Result<(), ActionError> {
        self.action.print_banner();
        self.action.say(&format!(
            "Waiting for data from {} - will write out to {}",
            self.source, self.target_store
        ));
        self.action.register_reporter().await;
        self.action.started()?;
        self.action.print_source_status(&mut self.source).await;

        let mut shutdown = self.action.take_shutdown();
        let result = match self.process(&mut shutdown).await {
            Ok(LoopEnd::Exhausted) => self.action.finished().await,
            Ok(LoopEnd::Shutdown) => {
                self.action.print_source_status(&mut self.source).await;
                self.action.set_status(Status::Terminated);
                self.action.aborted().await;
                Ok(())
            }
            Err(e) => {
                self.action.send_exception(&e, ErrorLevel::Error).await;
                self.action.print_source_status(&mut self.source).await;
                self.action.set_status(Status::Erroring);
                self.action.say(
                    "ERROR: Unexpected error during processing, is your projector function faulty?",
                );
                self.action.aborted().await;
                Err(e)
            }
        };

        if let Err(e) = self.source.close().await {
            warn!(error = %e, source = %self.source, "failed to close source");
        }
        result
    }

    async fn process(
        &mut self,
        shutdown: &mut Option<watch::Receiver<bool>>,
    ) -> Result<LoopEnd, ActionError> {
        loop {
            let next = tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown) => return Ok(LoopEnd::Shutdown),
                next = self.source.next_record() => next?,
            };
            let Some(record) = next else {
                return Ok(LoopEnd::Exhausted);
            };
            self.handle(record).await?;
        }
    }

    async fn handle(&mut self, record: Record) -> Result<(), ActionError> {
        self.action.record_read();
        let trace = TraceContext::continue_from(&record);
        debug!(
            trace_id = %trace.trace_id(),
            input_request_id = ?record.get_last_header(REQUEST_ID_HEADER).ok().flatten(),
            "projecting record"
        );
        match self.projector.project(record.clone()) {
            Ok(()) => {}
            Err(ActionError::DeadLetter(reason)) => {
                self.action.send_dlq_record(record, &reason).await?;
            }
            Err(e) => return Err(e),
        }
        self.action.record_processed();
        Ok(())
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("action", &self.action)
            .field("source", &self.source.to_string())
            .field("target_store", &self.target_store)
            .finish_non_exhaustive()
    }
}

//! The mapper engine.

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::headers::{enrich_output, persist_security_labels, REQUEST_ID_HEADER};
use super::{LoopEnd, RecordMapper};
use crate::action::{wait_for_shutdown, Action, ActionKind, ActionOptions, Wiring};
use crate::connector::{ConnectorInfo, DataSink, DataSource};
use crate::error::ActionError;
use crate::errors::ErrorLevel;
use crate::metrics::ActionMetrics;
use crate::record::Record;
use crate::reporter::{Endpoint, Status};
use crate::trace::TraceContext;

/// Reads records from a source, maps each one and writes the results to a
/// sink.
///
/// Every output record gets `Request-Id`, `Exec-Path` and `traceparent`
/// headers, plus `Input-Request-Id` when the input carried a `Request-Id`.
/// Inbound `Security-Label` headers are copied onto outputs that do not set
/// their own, unless persistent headers are disabled.
pub struct Mapper {
    action: Action,
    source: Box<dyn DataSource>,
    target: Box<dyn DataSink>,
    mapper: Box<dyn RecordMapper>,
}

impl Mapper {
    /// Creates a mapper.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if a sink the action provisions
    /// itself (dead-letter, heartbeat or error sink) cannot be created.
    pub fn new(
        source: impl DataSource + 'static,
        target: impl DataSink + 'static,
        mapper: impl RecordMapper + 'static,
        options: ActionOptions,
    ) -> Result<Self, ActionError> {
        let wiring = Wiring {
            source: Some(ConnectorInfo::of_source(&source)),
            source_topic: source.topic().map(str::to_string),
            target: Some(ConnectorInfo::of_sink(&target)),
            input: Endpoint::new(source.name(), "topic"),
            output: Endpoint::new(target.name(), "topic"),
        };
        Ok(Self {
            action: Action::new(ActionKind::Mapper, wiring, options)?,
            source: Box::new(source),
            target: Box::new(target),
            mapper: Box::new(mapper),
        })
    }

    /// The underlying action.
    #[must_use]
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Mutable access to the underlying action, e.g. to set expectations.
    pub fn action_mut(&mut self) -> &mut Action {
        &mut self.action
    }

    /// Metrics, unless disabled.
    #[must_use]
    pub fn metrics(&self) -> Option<std::sync::Arc<ActionMetrics>> {
        self.action.metrics()
    }

    /// Runs until the source is exhausted, shutdown is requested or a
    /// record fails.
    ///
    /// A requested shutdown reports `TERMINATED` and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the run, after it has been reported to
    /// the error handler and the sink has been closed.
    pub async fn run(&mut self) -> Result<(), ActionError> {
        self.action.print_banner();
        self.action.say(&format!(
            "Waiting for data from {} - will write out to {}",
            self.source, self.target
        ));
        self.action.register_reporter().await;
        self.action.started()?;
        self.action.print_source_status(&mut self.source).await;

        let mut shutdown = self.action.take_shutdown();
        let outcome = match self.process(&mut shutdown).await {
            Ok(LoopEnd::Exhausted) => self
                .target
                .close()
                .await
                .map(|()| LoopEnd::Exhausted)
                .map_err(ActionError::from),
            other => other,
        };

        let result = match outcome {
            Ok(LoopEnd::Exhausted) => self.action.finished().await,
            Ok(LoopEnd::Shutdown) => {
                self.action.print_source_status(&mut self.source).await;
                self.action.set_status(Status::Terminated);
                self.close_target().await;
                self.action.aborted().await;
                Ok(())
            }
            Err(e) => {
                self.action.send_exception(&e, ErrorLevel::Error).await;
                self.action.print_source_status(&mut self.source).await;
                self.action.set_status(Status::Erroring);
                self.action
                    .say("ERROR: Unexpected error during processing, is your map function faulty?");
                self.close_target().await;
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

        let output = match self.mapper.map(record.clone()) {
            Ok(output) => output,
            Err(ActionError::DeadLetter(reason)) => {
                self.action.send_dlq_record(record, &reason).await?;
                self.action.record_processed();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.action.record_processed();

        let Some(outputs) = output.into_records() else {
            return Ok(());
        };
        let input_request_id = record.get_last_header(REQUEST_ID_HEADER).ok().flatten();
        let persist = !self.action.settings().disable_persistent_headers;
        for out in outputs {
            let mut out = enrich_output(
                &out,
                input_request_id.as_deref(),
                self.action.id(),
                self.target.name(),
                &trace,
            );
            if persist {
                out = persist_security_labels(&record, out);
            }
            self.target.send(out).await?;
        }
        self.action.record_output();
        Ok(())
    }

    async fn close_target(&mut self) {
        if let Err(e) = self.target.close().await {
            warn!(error = %e, sink = %self.target, "failed to close target");
        } else {
            debug!(sink = %self.target, "target closed");
        }
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("action", &self.action)
            .field("source", &self.source.to_string())
            .field("target", &self.target.to_string())
            .finish_non_exhaustive()
    }
}

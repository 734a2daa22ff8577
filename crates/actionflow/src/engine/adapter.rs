//! Adapter engines.
//!
//! Adapters have no managed source. An [`Adapter`] exposes
//! [`send`](Adapter::send) for the caller to push records, an
//! [`AutomaticAdapter`] pulls them from a [`RecordAdapter`]. Both describe
//! their input with a [`DataSet`] and can publish registration and update
//! records for it to a data catalog topic.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::headers::{
    request_id, CONTENT_TYPE_HEADER, DATA_SOURCE_NAME_HEADER, DATA_SOURCE_TYPE_HEADER,
    EXEC_PATH_HEADER, REQUEST_ID_HEADER,
};
use super::LoopEnd;
use crate::action::{shutdown_requested, Action, ActionKind, ActionOptions, Wiring};
use crate::connector::{ConnectorInfo, DataSink};
use crate::dataset::DataSet;
use crate::error::ActionError;
use crate::errors::ErrorLevel;
use crate::labels::{EdhModel, SECURITY_LABEL_HEADER};
use crate::metrics::ActionMetrics;
use crate::record::{Header, Record};
use crate::reporter::{Endpoint, Status};
use crate::trace::{TraceContext, TRACEPARENT_HEADER};

/// Produces the records an [`AutomaticAdapter`] writes.
///
/// Implemented for any `Iterator<Item = Result<Record, ActionError>>`.
pub trait RecordAdapter: Send {
    /// The next record, or `None` when there are no more.
    fn next_record(&mut self) -> Option<Result<Record, ActionError>>;
}

impl<I> RecordAdapter for I
where
    I: Iterator<Item = Result<Record, ActionError>> + Send,
{
    fn next_record(&mut self) -> Option<Result<Record, ActionError>> {
        self.next()
    }
}

/// Dataset and catalog sink shared by both adapters.
struct Catalog {
    dataset: Box<dyn DataSet>,
    topic: String,
    sink: Option<Box<dyn DataSink>>,
}

impl Catalog {
    fn new(dataset: Box<dyn DataSet>, action: &Action) -> Result<Self, ActionError> {
        let topic = action.settings().catalog_topic.clone();
        let sink = match action.kafka() {
            Some(ctx) => Some(Box::new(ctx.sink(&topic)?) as Box<dyn DataSink>),
            None => None,
        };
        Ok(Self {
            dataset,
            topic,
            sink,
        })
    }

    fn wiring(dataset: &dyn DataSet, target: &dyn DataSink) -> Wiring {
        Wiring {
            source: None,
            source_topic: None,
            target: Some(ConnectorInfo::of_sink(target)),
            input: Endpoint::new(dataset.title(), dataset.source_mime_type()),
            output: Endpoint::new(target.name(), "topic"),
        }
    }

    async fn register(
        &mut self,
        exec_path: &str,
        fields: Map<String, Value>,
        headers: Vec<Header>,
    ) -> Result<bool, ActionError> {
        if self.sink.is_none() {
            warn!("cannot register with the data catalog as no catalog sink is configured");
            return Ok(false);
        }
        let record = self
            .dataset
            .registration_record(fields, headers)
            .map_err(crate::error::ConnectorError::from)?;
        self.send(exec_path, record).await
    }

    async fn update(&mut self, exec_path: &str, headers: Vec<Header>) -> Result<bool, ActionError> {
        if self.sink.is_none() {
            warn!("cannot update the data catalog as no catalog sink is configured");
            return Ok(false);
        }
        let record = self
            .dataset
            .update_record(headers)
            .map_err(crate::error::ConnectorError::from)?;
        self.send(exec_path, record).await
    }

    async fn send(&mut self, exec_path: &str, record: Record) -> Result<bool, ActionError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(false);
        };
        let record = record.add_headers([
            Header::new(EXEC_PATH_HEADER, exec_path),
            Header::new(REQUEST_ID_HEADER, request_id(&self.topic)),
            Header::new(CONTENT_TYPE_HEADER, self.dataset.content_type()),
        ]);
        sink.send(record).await?;
        debug!(topic = %self.topic, dataset = %self.dataset.id(), "catalog record sent");
        Ok(true)
    }

    async fn close(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.close().await {
                warn!(error = %e, topic = %self.topic, "failed to close catalog sink");
            }
        }
    }
}

/// Writes records the caller pushes with [`send`](Adapter::send).
///
/// Call [`run`](Adapter::run) first, then `send` for each record, then
/// [`finished`](Adapter::finished) or [`aborted`](Adapter::aborted).
pub struct Adapter {
    action: Action,
    target: Box<dyn DataSink>,
    catalog: Catalog,
}

impl Adapter {
    /// Creates an adapter writing to `target`.
    ///
    /// When the options carry a Kafka connection, a catalog sink is opened on
    /// the configured catalog topic.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if a sink the adapter provisions
    /// itself cannot be created.
    pub fn new(
        target: impl DataSink + 'static,
        dataset: impl DataSet + 'static,
        options: ActionOptions,
    ) -> Result<Self, ActionError> {
        let action = Action::new(
            ActionKind::Adapter,
            Catalog::wiring(&dataset, &target),
            options,
        )?;
        let catalog = Catalog::new(Box::new(dataset), &action)?;
        Ok(Self {
            action,
            target: Box::new(target),
            catalog,
        })
    }

    /// Sends catalog records to `sink`.
    #[must_use]
    pub fn with_data_catalog_sink(mut self, sink: Box<dyn DataSink>) -> Self {
        self.catalog.sink = Some(sink);
        self
    }

    /// Disables the data catalog.
    #[must_use]
    pub fn without_data_catalog(mut self) -> Self {
        self.catalog.sink = None;
        self
    }

    /// Whether catalog records can be sent.
    #[must_use]
    pub fn has_data_catalog(&self) -> bool {
        self.catalog.sink.is_some()
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

    /// Starts the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AlreadyStarted`] if it is already running.
    pub async fn run(&mut self) -> Result<(), ActionError> {
        self.action.print_banner();
        self.action.say(&format!(
            "Waiting for data from {} - will write out to {}",
            self.catalog.dataset.title(),
            self.target
        ));
        self.action.register_reporter().await;
        self.action.started()
    }

    /// Sends a record to the target and counts it.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if the target rejects the record.
    pub async fn send(&mut self, record: Record) -> Result<(), ActionError> {
        self.target.send(record).await?;
        self.action.record_processed();
        self.action.record_output();
        Ok(())
    }

    /// Reports an error to the error handler.
    pub async fn send_error(&mut self, message: &str, error_type: &str, level: ErrorLevel) {
        self.action.send_error(message, error_type, level).await;
    }

    /// Sends a registration record for the dataset; returns whether one was
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if the record cannot be built or sent.
    pub async fn register_data_catalog(
        &mut self,
        fields: Map<String, Value>,
        headers: Vec<Header>,
    ) -> Result<bool, ActionError> {
        self.catalog.register(self.action.id(), fields, headers).await
    }

    /// Sends an update record for the dataset; returns whether one was sent.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if the record cannot be built or sent.
    pub async fn update_data_catalog(&mut self, headers: Vec<Header>) -> Result<bool, ActionError> {
        self.catalog.update(self.action.id(), headers).await
    }

    /// Closes the target and the catalog sink and completes the run.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotStarted`] if the adapter was never run, or
    /// `ActionError::Connector` if the target could not be flushed.
    pub async fn finished(&mut self) -> Result<(), ActionError> {
        if !self.action.progress().is_started() {
            return Err(ActionError::NotStarted);
        }
        let closed = self.target.close().await;
        self.catalog.close().await;
        self.action.finished().await?;
        closed.map_err(ActionError::from)
    }

    /// Closes the target and the catalog sink and ends the run early.
    pub async fn aborted(&mut self) {
        if let Err(e) = self.target.close().await {
            warn!(error = %e, sink = %self.target, "failed to close target");
        }
        self.catalog.close().await;
        self.action.aborted().await;
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("action", &self.action)
            .field("target", &self.target.to_string())
            .field("dataset", &self.catalog.dataset.id())
            .finish_non_exhaustive()
    }
}

/// Writes every record produced by a [`RecordAdapter`] to a sink.
///
/// Each record gets `Exec-Path`, `Request-Id`, `traceparent`,
/// `Data-Source-Name` and `Data-Source-Type` headers. With a policy set,
/// records without a `Security-Label` also get the policy headers.
pub struct AutomaticAdapter {
    action: Action,
    target: Box<dyn DataSink>,
    adapter: Box<dyn RecordAdapter>,
    catalog: Catalog,
    policy: Option<EdhModel>,
}

impl AutomaticAdapter {
    /// Creates an automatic adapter.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if a sink the adapter provisions
    /// itself cannot be created.
    pub fn new(
        target: impl DataSink + 'static,
        adapter: impl RecordAdapter + 'static,
        dataset: impl DataSet + 'static,
        options: ActionOptions,
    ) -> Result<Self, ActionError> {
        let action = Action::new(
            ActionKind::AutomaticAdapter,
            Catalog::wiring(&dataset, &target),
            options,
        )?;
        let catalog = Catalog::new(Box::new(dataset), &action)?;
        Ok(Self {
            action,
            target: Box::new(target),
            adapter: Box::new(adapter),
            catalog,
            policy: None,
        })
    }

    /// Labels unlabelled records with the policy headers of `model`.
    #[must_use]
    pub fn with_policy(mut self, model: EdhModel) -> Self {
        self.policy = Some(model);
        self
    }

    /// Sends catalog records to `sink`.
    #[must_use]
    pub fn with_data_catalog_sink(mut self, sink: Box<dyn DataSink>) -> Self {
        self.catalog.sink = Some(sink);
        self
    }

    /// Disables the data catalog.
    #[must_use]
    pub fn without_data_catalog(mut self) -> Self {
        self.catalog.sink = None;
        self
    }

    /// Whether catalog records can be sent.
    #[must_use]
    pub fn has_data_catalog(&self) -> bool {
        self.catalog.sink.is_some()
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

    /// Sends a registration record for the dataset; returns whether one was
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if the record cannot be built or sent.
    pub async fn register_data_catalog(
        &mut self,
        fields: Map<String, Value>,
        headers: Vec<Header>,
    ) -> Result<bool, ActionError> {
        self.catalog.register(self.action.id(), fields, headers).await
    }

    /// Sends an update record for the dataset; returns whether one was sent.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if the record cannot be built or sent.
    pub async fn update_data_catalog(&mut self, headers: Vec<Header>) -> Result<bool, ActionError> {
        self.catalog.update(self.action.id(), headers).await
    }

    /// Writes records until the adapter runs out, shutdown is requested or a
    /// record fails.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the run, after it has been reported to
    /// the error handler and the target has been closed.
    pub async fn run(&mut self) -> Result<(), ActionError> {
        self.action.print_banner();
        self.action.say(&format!(
            "Waiting for data from {} - will write out to {}",
            self.catalog.dataset.title(),
            self.target
        ));
        self.action.register_reporter().await;
        self.action.started()?;

        let outcome = match self.process().await {
            Ok(LoopEnd::Exhausted) => self
                .target
                .close()
                .await
                .map(|()| LoopEnd::Exhausted)
                .map_err(ActionError::from),
            other => other,
        };

        match outcome {
            Ok(LoopEnd::Exhausted) => {
                self.catalog.close().await;
                self.action.finished().await
            }
            Ok(LoopEnd::Shutdown) => {
                self.action.set_status(Status::Terminated);
                self.abort().await;
                Ok(())
            }
            Err(e) => {
                self.action.send_exception(&e, ErrorLevel::Error).await;
                self.action.set_status(Status::Erroring);
                self.action
                    .say("ERROR: Unexpected error during processing, is your adapter function faulty?");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn process(&mut self) -> Result<LoopEnd, ActionError> {
        let shutdown = self.action.take_shutdown();
        let policy = self.policy.as_ref().map(EdhModel::policy_headers).transpose()?;
        while let Some(next) = self.adapter.next_record() {
            if shutdown_requested(shutdown.as_ref()) {
                return Ok(LoopEnd::Shutdown);
            }
            let mut record = next?.add_headers([
                Header::new(EXEC_PATH_HEADER, self.action.id()),
                Header::new(REQUEST_ID_HEADER, request_id(self.target.name())),
                Header::new(TRACEPARENT_HEADER, TraceContext::new_root().to_traceparent()),
                Header::new(DATA_SOURCE_NAME_HEADER, self.catalog.dataset.title()),
                Header::new(DATA_SOURCE_TYPE_HEADER, self.catalog.dataset.source_mime_type()),
            ]);
            if let Some(policy) = &policy {
                if !record.has_header(SECURITY_LABEL_HEADER) {
                    record = record.add_headers(policy.iter().cloned());
                }
            }
            self.target.send(record).await?;
            self.action.record_processed();
            self.action.record_output();
        }
        Ok(LoopEnd::Exhausted)
    }

    async fn abort(&mut self) {
        if let Err(e) = self.target.close().await {
            warn!(error = %e, sink = %self.target, "failed to close target");
        }
        self.catalog.close().await;
        self.action.aborted().await;
    }
}

impl fmt::Debug for AutomaticAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomaticAdapter")
            .field("action", &self.action)
            .field("target", &self.target.to_string())
            .field("dataset", &self.catalog.dataset.id())
            .field("policy", &self.policy.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::KafkaContext;
    use crate::config::kafka::KafkaProperties;
    use crate::dataset::SimpleDataSet;
    use crate::labels::POLICY_INFORMATION_HEADER;
    use crate::memory::ListSink;
    use crate::testing::MockCluster;

    fn dataset() -> SimpleDataSet {
        SimpleDataSet::new("weather-1", "Weather", "text/csv")
    }

    fn rows(n: u32) -> impl Iterator<Item = Result<Record, ActionError>> + Send {
        (0..n).map(|i| Ok(Record::new(Vec::new(), None::<String>, format!("row {i}"))))
    }

    #[tokio::test]
    async fn test_manual_adapter_sends_and_counts() {
        let sink = ListSink::new();
        let mut adapter = Adapter::new(sink.clone(), dataset(), ActionOptions::new()).unwrap();
        assert!(!adapter.has_data_catalog());
        assert_eq!(adapter.action().id(), "Manual Adapter-to-In-Memory List");

        assert!(matches!(adapter.finished().await, Err(ActionError::NotStarted)));
        adapter.run().await.unwrap();
        for i in 0..3 {
            adapter
                .send(Record::new(Vec::new(), None::<String>, format!("{i}")))
                .await
                .unwrap();
        }
        adapter.finished().await.unwrap();

        assert_eq!(sink.len(), 3);
        assert_eq!(adapter.metrics().unwrap().snapshot().processed, 3);
    }

    #[tokio::test]
    async fn test_catalog_without_sink_is_a_no_op() {
        let mut adapter = Adapter::new(ListSink::new(), dataset(), ActionOptions::new()).unwrap();
        assert!(!adapter.update_data_catalog(Vec::new()).await.unwrap());
        assert!(!adapter.register_data_catalog(Map::new(), Vec::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_catalog_records_get_headers() {
        let catalog = ListSink::new();
        let mut adapter = Adapter::new(ListSink::new(), dataset(), ActionOptions::new())
            .unwrap()
            .with_data_catalog_sink(Box::new(catalog.clone()));
        assert!(adapter.register_data_catalog(Map::new(), Vec::new()).await.unwrap());
        assert!(adapter.update_data_catalog(Vec::new()).await.unwrap());

        let records = catalog.records();
        assert_eq!(records.len(), 2);
        let record = &records[0];
        assert_eq!(
            record.get_last_header(EXEC_PATH_HEADER).unwrap().as_deref(),
            Some("Manual Adapter-to-In-Memory List")
        );
        assert!(record
            .get_last_header(REQUEST_ID_HEADER)
            .unwrap()
            .unwrap()
            .starts_with("catalog:"));
        assert_eq!(
            record.get_last_header(CONTENT_TYPE_HEADER).unwrap().as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_catalog_opened_from_kafka_context() {
        let cluster = MockCluster::new();
        let kafka = KafkaContext::new(KafkaProperties::with_brokers("mock:9092"), Arc::new(cluster.clone()));
        let mut adapter = Adapter::new(
            ListSink::new(),
            dataset(),
            ActionOptions::new().without_reporter().with_kafka(kafka),
        )
        .unwrap();
        assert!(adapter.has_data_catalog());
        adapter.run().await.unwrap();
        adapter.update_data_catalog(Vec::new()).await.unwrap();
        adapter.finished().await.unwrap();
        assert_eq!(cluster.messages("catalog").len(), 1);
    }

    #[tokio::test]
    async fn test_automatic_adapter_headers() {
        let sink = ListSink::new();
        let mut adapter =
            AutomaticAdapter::new(sink.clone(), rows(2), dataset(), ActionOptions::new()).unwrap();
        adapter.run().await.unwrap();

        let out = sink.records();
        assert_eq!(out.len(), 2);
        for record in &out {
            assert_eq!(
                record.get_last_header(DATA_SOURCE_NAME_HEADER).unwrap().as_deref(),
                Some("Weather")
            );
            assert_eq!(
                record.get_last_header(DATA_SOURCE_TYPE_HEADER).unwrap().as_deref(),
                Some("text/csv")
            );
            assert!(record
                .get_last_header(REQUEST_ID_HEADER)
                .unwrap()
                .unwrap()
                .starts_with("List:"));
            let parent = record.get_last_header(TRACEPARENT_HEADER).unwrap().unwrap();
            assert!(TraceContext::parse(&parent).is_some());
            assert!(!record.has_header(SECURITY_LABEL_HEADER));
        }
        assert_ne!(
            out[0].get_last_header(REQUEST_ID_HEADER).unwrap(),
            out[1].get_last_header(REQUEST_ID_HEADER).unwrap()
        );
        assert_eq!(adapter.metrics().unwrap().snapshot().output, 2);
    }

    #[tokio::test]
    async fn test_policy_headers_only_on_unlabelled_records() {
        let sink = ListSink::new();
        let records = vec![
            Ok(Record::new(Vec::new(), None::<String>, "plain")),
            Ok(Record::new(
                vec![Header::new(SECURITY_LABEL_HEADER, "(clearance=O)")],
                None::<String>,
                "labelled",
            )),
        ];
        let mut adapter =
            AutomaticAdapter::new(sink.clone(), records.into_iter(), dataset(), ActionOptions::new())
                .unwrap()
                .with_policy(EdhModel::new("ItemA", "S"));
        adapter.run().await.unwrap();

        let out = sink.records();
        assert!(out[0].has_header(POLICY_INFORMATION_HEADER));
        assert!(out[0].has_header(SECURITY_LABEL_HEADER));
        assert!(!out[1].has_header(POLICY_INFORMATION_HEADER));
        assert_eq!(
            out[1].get_headers(SECURITY_LABEL_HEADER).unwrap(),
            vec![Some("(clearance=O)".to_string())]
        );
    }

    #[tokio::test]
    async fn test_adapter_error_aborts() {
        let sink = ListSink::new();
        let records = vec![
            Ok(Record::new(Vec::new(), None::<String>, "first")),
            Err(ActionError::transform("file truncated")),
            Ok(Record::new(Vec::new(), None::<String>, "never")),
        ];
        let mut adapter =
            AutomaticAdapter::new(sink.clone(), records.into_iter(), dataset(), ActionOptions::new())
                .unwrap();
        let err = adapter.run().await.unwrap_err();
        assert_eq!(err.to_string(), "file truncated");
        assert_eq!(sink.len(), 1);
        assert_eq!(adapter.action().progress().errors(), 1);
    }

    #[tokio::test]
    async fn test_adapter_stops_on_shutdown() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();
        let sink = ListSink::new();
        let mut adapter = AutomaticAdapter::new(
            sink.clone(),
            rows(5),
            dataset(),
            ActionOptions::new().with_shutdown(rx),
        )
        .unwrap();
        adapter.run().await.unwrap();
        assert!(sink.is_empty());
    }
}

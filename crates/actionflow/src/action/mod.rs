//! Action lifecycle.
//!
//! An [`Action`] is the shared state every engine runs on: progress
//! counters, metrics, the live [`Reporter`], the [`ErrorHandler`] and the
//! dead-letter sink. Engines own their source and sink and drive the
//! lifecycle:
//!
//! ```text
//! print_banner → register_reporter → started → record_processed … → finished
//!                                                      └─ (error / shutdown) → aborted
//! ```
//!
//! Human-facing lines (banner, progress, summaries) are logged at `INFO`
//! under the `actionflow::progress` target.

pub mod progress;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PipelineSettings;
use crate::config::kafka::KafkaProperties;
use crate::connector::{ConnectorInfo, DataSink, DataSource};
use crate::error::{ActionError, ConnectorError};
use crate::errors::{build_error_handler, ErrorHandler, ErrorHandlerKind, ErrorLevel};
use crate::kafka::{dlq_topic, KafkaSink, KafkaSinkConfig, ProducerFactory};
use crate::metrics::ActionMetrics;
use crate::record::Record;
use crate::reporter::{ComponentDetails, Endpoint, Reporter, Status, DEFAULT_HEARTBEAT_TIME};

pub use progress::{format_count, format_decimal, Progress};

/// Records between progress lines unless configured otherwise.
pub const DEFAULT_REPORTING_BATCH_SIZE: u64 = 25_000;

/// Header carrying the reason a record was dead-lettered.
pub const DEAD_LETTER_REASON_HEADER: &str = "Dead-Letter-Reason";

/// Tracing target of the console lines.
pub const PROGRESS_TARGET: &str = "actionflow::progress";

const BANNER_WIDTH: usize = 80;
const BANNER_TITLE: &str = "ACTIONFLOW";

/// The kind of work an action does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Reads, transforms and writes records.
    Mapper,
    /// Reads records into a caller-managed store.
    Projector,
    /// Writes records pushed by the caller.
    Adapter,
    /// Writes records pulled from a caller-supplied iterator.
    AutomaticAdapter,
}

impl ActionKind {
    /// Human name shown in the banner and used in generated ids.
    #[must_use]
    pub fn action_type(&self) -> &'static str {
        match self {
            ActionKind::Mapper => "Mapper",
            ActionKind::Projector => "Projector",
            ActionKind::Adapter => "Manual Adapter",
            ActionKind::AutomaticAdapter => "Automatic Adapter",
        }
    }

    /// Component type reported in heartbeats and used as the metrics prefix.
    #[must_use]
    pub fn component_type(&self) -> &'static str {
        match self {
            ActionKind::Mapper => "mapper",
            ActionKind::Projector => "projector",
            ActionKind::Adapter | ActionKind::AutomaticAdapter => "adapter",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_type())
    }
}

/// Connection details used to create Kafka sinks on demand: the dead-letter
/// sink, the heartbeat sink, the error sink and the catalog sink.
#[derive(Clone)]
pub struct KafkaContext {
    properties: KafkaProperties,
    producer_factory: Arc<dyn ProducerFactory + Send + Sync>,
}

impl KafkaContext {
    /// Creates a context producing through `producer_factory`.
    pub fn new(
        properties: KafkaProperties,
        producer_factory: Arc<dyn ProducerFactory + Send + Sync>,
    ) -> Self {
        Self {
            properties,
            producer_factory,
        }
    }

    /// Connection properties.
    #[must_use]
    pub fn properties(&self) -> &KafkaProperties {
        &self.properties
    }

    /// Opens a sink producing to `topic`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the producer cannot be created.
    pub fn sink(&self, topic: &str) -> Result<KafkaSink, ConnectorError> {
        KafkaSink::with_factory(
            KafkaSinkConfig::new(topic, self.properties.clone()),
            self.producer_factory.as_ref(),
        )
    }
}

impl fmt::Debug for KafkaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaContext")
            .field("brokers", &self.properties.brokers())
            .finish_non_exhaustive()
    }
}

/// Optional settings shared by every engine.
pub struct ActionOptions {
    name: Option<String>,
    reporting_batch_size: u64,
    error_handler: Option<Box<dyn ErrorHandler>>,
    error_handler_kind: Option<ErrorHandlerKind>,
    has_reporter: bool,
    reporter_sink: Option<Box<dyn DataSink>>,
    heartbeat_time: Duration,
    dlq_target: Option<Box<dyn DataSink>>,
    disable_metrics: bool,
    settings: PipelineSettings,
    kafka: Option<KafkaContext>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            name: None,
            reporting_batch_size: DEFAULT_REPORTING_BATCH_SIZE,
            error_handler: None,
            error_handler_kind: None,
            has_reporter: true,
            reporter_sink: None,
            heartbeat_time: DEFAULT_HEARTBEAT_TIME,
            dlq_target: None,
            disable_metrics: false,
            settings: PipelineSettings::default(),
            kafka: None,
            shutdown: None,
        }
    }
}

impl ActionOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a human name; it also becomes the action id.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Records between progress lines, `0` to disable them.
    #[must_use]
    pub fn with_reporting_batch_size(mut self, size: u64) -> Self {
        self.reporting_batch_size = size;
        self
    }

    /// Uses the given error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: Box<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Builds an error handler of this kind when none is given.
    ///
    /// Defaults to [`ErrorHandlerKind::Kafka`] when a [`KafkaContext`] is
    /// set and [`ErrorHandlerKind::Log`] otherwise.
    #[must_use]
    pub fn with_error_handler_kind(mut self, kind: ErrorHandlerKind) -> Self {
        self.error_handler_kind = Some(kind);
        self
    }

    /// Sends heartbeats to the given sink.
    #[must_use]
    pub fn with_reporter_sink(mut self, sink: Box<dyn DataSink>) -> Self {
        self.reporter_sink = Some(sink);
        self.has_reporter = true;
        self
    }

    /// Disables the live reporter.
    #[must_use]
    pub fn without_reporter(mut self) -> Self {
        self.has_reporter = false;
        self.reporter_sink = None;
        self
    }

    /// Interval between heartbeats.
    #[must_use]
    pub fn with_heartbeat_time(mut self, heartbeat_time: Duration) -> Self {
        self.heartbeat_time = heartbeat_time;
        self
    }

    /// Routes dead-lettered records to `target`.
    #[must_use]
    pub fn with_dlq_target(mut self, target: Box<dyn DataSink>) -> Self {
        self.dlq_target = Some(target);
        self
    }

    /// Stops counting metrics.
    #[must_use]
    pub fn with_metrics_disabled(mut self) -> Self {
        self.disable_metrics = true;
        self
    }

    /// Framework-wide settings.
    #[must_use]
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Kafka connection used for sinks the action creates itself.
    #[must_use]
    pub fn with_kafka(mut self, kafka: KafkaContext) -> Self {
        self.kafka = Some(kafka);
        self
    }

    /// Stops the run once `true` is sent on the channel.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }
}

impl fmt::Debug for ActionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionOptions")
            .field("name", &self.name)
            .field("reporting_batch_size", &self.reporting_batch_size)
            .field("has_reporter", &self.has_reporter)
            .field("heartbeat_time", &self.heartbeat_time)
            .field("disable_metrics", &self.disable_metrics)
            .field("settings", &self.settings)
            .field("kafka", &self.kafka)
            .finish_non_exhaustive()
    }
}

/// What an action reads from and writes to.
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    /// Source identity, if the action reads from a source.
    pub source: Option<ConnectorInfo>,
    /// Topic of the source, if it reads one.
    pub source_topic: Option<String>,
    /// Target identity, if the action writes to a sink.
    pub target: Option<ConnectorInfo>,
    /// Input endpoint reported in heartbeats.
    pub input: Endpoint,
    /// Output endpoint reported in heartbeats.
    pub output: Endpoint,
}

/// Lifecycle state shared by the engines.
pub struct Action {
    kind: ActionKind,
    id: String,
    name: Option<String>,
    progress: Progress,
    metrics: Arc<ActionMetrics>,
    metrics_enabled: bool,
    reporter: Option<Reporter>,
    error_handler: Option<Box<dyn ErrorHandler>>,
    dlq_target: Option<Box<dyn DataSink>>,
    settings: PipelineSettings,
    kafka: Option<KafkaContext>,
    banner_shown: bool,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Action {
    /// Creates an action, provisioning the reporter, the error handler and,
    /// when `AUTO_ENABLE_DLQ` is set for a topic source, the dead-letter sink.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::Connector` if a sink the action needs cannot be
    /// created.
    pub fn new(
        kind: ActionKind,
        wiring: Wiring,
        options: ActionOptions,
    ) -> Result<Self, ActionError> {
        let ActionOptions {
            name,
            reporting_batch_size,
            error_handler,
            error_handler_kind,
            has_reporter,
            reporter_sink,
            heartbeat_time,
            dlq_target,
            disable_metrics,
            settings,
            kafka,
            shutdown,
        } = options;

        let id = generate_id(
            kind,
            name.as_deref(),
            wiring.source.as_ref(),
            wiring.target.as_ref(),
        );

        let dlq_target = match dlq_target {
            Some(target) => Some(target),
            None if settings.auto_enable_dlq => {
                match (wiring.source_topic.as_deref(), kafka.as_ref()) {
                    (Some(topic), Some(ctx)) => {
                        let sink = ctx.sink(&dlq_topic(topic))?;
                        info!(action = %id, dlq = %dlq_topic(topic), "dead-letter sink enabled");
                        Some(Box::new(sink) as Box<dyn DataSink>)
                    }
                    _ => {
                        warn!(action = %id, "AUTO_ENABLE_DLQ is set but the source is not a Kafka topic");
                        None
                    }
                }
            }
            None => None,
        };

        let reporter_sink: Option<Box<dyn DataSink>> = match reporter_sink {
            Some(sink) if has_reporter => Some(sink),
            None if has_reporter => match kafka.as_ref() {
                Some(ctx) => Some(Box::new(ctx.sink(&settings.heartbeat_topic)?)),
                None => None,
            },
            _ => None,
        };
        let reporter = reporter_sink.map(|sink| {
            let details = ComponentDetails {
                id: id.clone(),
                name: name.clone(),
                component_type: kind.component_type().to_string(),
                input: wiring.input.clone(),
                output: wiring.output.clone(),
            };
            Reporter::new(details, sink).with_heartbeat_time(heartbeat_time)
        });

        let error_handler = match error_handler {
            Some(handler) => handler,
            None => {
                let handler_kind = error_handler_kind.unwrap_or(if kafka.is_some() {
                    ErrorHandlerKind::Kafka
                } else {
                    ErrorHandlerKind::Log
                });
                build_error_handler(handler_kind, &id, &settings, |topic| {
                    let ctx = kafka.as_ref().ok_or_else(|| {
                        ConnectorError::ConfigurationError(
                            "no Kafka connection configured for the error handler".to_string(),
                        )
                    })?;
                    Ok(Box::new(ctx.sink(topic)?) as Box<dyn DataSink>)
                })
            }
        };

        debug!(action = %id, kind = %kind, "action created");
        Ok(Self {
            kind,
            metrics: Arc::new(ActionMetrics::new(kind.component_type())),
            metrics_enabled: !disable_metrics,
            id,
            name,
            progress: Progress::new(reporting_batch_size),
            reporter,
            error_handler: Some(error_handler),
            dlq_target,
            settings,
            kafka,
            banner_shown: false,
            shutdown,
        })
    }

    /// The kind of action.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Action id: the name with spaces replaced by `-`, or one generated
    /// from the action type, source and target.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Framework-wide settings.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Kafka connection, if one was configured.
    #[must_use]
    pub fn kafka(&self) -> Option<&KafkaContext> {
        self.kafka.as_ref()
    }

    /// Progress counters.
    #[must_use]
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Metrics, unless disabled.
    #[must_use]
    pub fn metrics(&self) -> Option<Arc<ActionMetrics>> {
        self.metrics_enabled.then(|| Arc::clone(&self.metrics))
    }

    /// The live reporter, if any.
    #[must_use]
    pub fn reporter(&self) -> Option<&Reporter> {
        self.reporter.as_ref()
    }

    /// Whether dead-lettered records have somewhere to go.
    #[must_use]
    pub fn has_dlq_target(&self) -> bool {
        self.dlq_target.is_some()
    }

    /// Replaces the dead-letter sink.
    pub fn set_dlq_target(&mut self, target: Box<dyn DataSink>) {
        self.dlq_target = Some(target);
    }

    /// Takes the shutdown channel for the engine loop.
    pub fn take_shutdown(&mut self) -> Option<watch::Receiver<bool>> {
        self.shutdown.take()
    }

    /// Logs a console line.
    pub fn say(&self, line: &str) {
        info!(target: PROGRESS_TARGET, "{}", line);
    }

    /// Logs the startup banner, once.
    pub fn print_banner(&mut self) {
        if self.banner_shown {
            return;
        }
        self.banner_shown = true;
        let inner = BANNER_WIDTH - 2;
        let rule = "-".repeat(BANNER_WIDTH);
        let empty = format!("|{}|", " ".repeat(inner));
        self.say(&rule);
        self.say(&empty);
        self.say(&format!("|{BANNER_TITLE:^inner$}|"));
        self.say(&format!("|{:^inner$}|", self.kind.action_type()));
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            self.say(&format!("|{name:^inner$}|"));
        }
        self.say(&empty);
        self.say(&rule);
    }

    /// Sets the expected record count, enabling percentages in progress lines.
    pub fn expect_records(&mut self, expected: u64) {
        self.progress.expect(expected);
        self.say(&format!("Expecting to process {} records", format_count(expected)));
    }

    /// Marks the action as started.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AlreadyStarted`] if called twice without an
    /// intervening [`finished`](Self::finished) or [`aborted`](Self::aborted).
    pub fn started(&mut self) -> Result<(), ActionError> {
        if self.progress.is_started() {
            return Err(ActionError::AlreadyStarted);
        }
        self.progress.start();
        self.metrics.start_rates();
        self.say("Started work...");
        Ok(())
    }

    /// Counts a record read from the source.
    pub fn record_read(&self) {
        if self.metrics_enabled {
            self.metrics.record_read();
        }
    }

    /// Counts one processed record.
    pub fn record_processed(&mut self) {
        self.records_processed(1);
    }

    /// Counts `n` processed records, logging a progress line on each batch
    /// boundary.
    pub fn records_processed(&mut self, n: u64) {
        if self.metrics_enabled {
            self.metrics.record_processed(n);
        }
        if self.progress.advance(n) {
            self.report_progress();
        }
    }

    /// Counts a record written to the target.
    pub fn record_output(&self) {
        if self.metrics_enabled {
            self.metrics.record_output();
        }
    }

    /// Logs a progress line for the records since the previous one.
    pub fn report_progress(&mut self) {
        if let Some(line) = self.progress.report() {
            self.say(&line);
        }
    }

    /// Sets the status sent with the next heartbeat.
    pub fn set_status(&self, status: Status) {
        if let Some(reporter) = &self.reporter {
            reporter.set_status(status);
        }
    }

    /// Registers with the live reporter and starts the heartbeat.
    pub async fn register_reporter(&mut self) {
        let Some(reporter) = self.reporter.as_mut() else {
            return;
        };
        if let Err(e) = reporter.register().await {
            warn!(error = %e, sink = %reporter.sink(), "failed to register with live reporter");
        }
        reporter.run();
        let line = format!(
            "Live Reporter registered to send heartbeats to {}",
            reporter.sink()
        );
        self.say(&line);
    }

    /// Reports an error message to the error handler.
    pub async fn send_error(&mut self, message: &str, error_type: &str, level: ErrorLevel) {
        self.count_error();
        let counter = self.progress.counter();
        if let Some(handler) = self.error_handler.as_mut() {
            if let Err(e) = handler.send_error(message, error_type, level, counter).await {
                warn!(error = %e, "failed to deliver error report");
            }
        }
    }

    /// Reports a failed action to the error handler.
    pub async fn send_exception(&mut self, err: &ActionError, level: ErrorLevel) {
        self.count_error();
        let counter = self.progress.counter();
        if let Some(handler) = self.error_handler.as_mut() {
            if let Err(e) = handler.send_exception(err, level, counter).await {
                warn!(error = %e, "failed to deliver error report");
            }
        }
    }

    fn count_error(&mut self) {
        self.progress.record_error();
        if self.metrics_enabled {
            self.metrics.record_error();
        }
    }

    /// Sends `record` to the dead-letter sink with a `Dead-Letter-Reason`
    /// header.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NoDeadLetterTarget`] if no dead-letter sink is
    /// set, or `ActionError::Connector` if the sink rejects the record.
    pub async fn send_dlq_record(&mut self, record: Record, reason: &str) -> Result<(), ActionError> {
        let Some(target) = self.dlq_target.as_mut() else {
            let err = ActionError::NoDeadLetterTarget;
            error!(action = %self.id, reason, "{err}");
            return Err(err);
        };
        target
            .send(record.add_header(DEAD_LETTER_REASON_HEADER, reason))
            .await?;
        if self.metrics_enabled {
            self.metrics.record_dlq();
        }
        debug!(action = %self.id, reason, "record dead-lettered");
        Ok(())
    }

    /// Logs how many records `source` has left, if it knows.
    pub async fn print_source_status<S: DataSource + ?Sized>(&self, source: &mut S) {
        match source.remaining().await {
            Some(0) => self.say(&format!("Source {source} has no further records available")),
            Some(n) => self.say(&format!("Source {source} has {} records remaining", format_count(n))),
            None => debug!(source = %source, "source cannot report remaining records"),
        }
    }

    /// Completes the run: logs the final progress and summary lines, reports
    /// `COMPLETED`, stops the reporter and releases the dead-letter sink and
    /// the error handler.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotStarted`] if the action was never started.
    pub async fn finished(&mut self) -> Result<(), ActionError> {
        if !self.progress.is_started() {
            return Err(ActionError::NotStarted);
        }
        if self.progress.has_unreported() {
            self.report_progress();
        }
        if let Some(line) = self.progress.expectation_line() {
            self.say(&line);
        }
        let summary = self.progress.summary();
        self.say(&summary);
        self.progress.reset();

        self.set_status(Status::Completed);
        self.release().await;
        Ok(())
    }

    /// Ends the run early: logs the final progress and an abort summary,
    /// stops the reporter and releases the dead-letter sink and the error
    /// handler. The reporter keeps whatever status the caller set.
    pub async fn aborted(&mut self) {
        if self.progress.is_started() && self.progress.has_unreported() {
            self.report_progress();
        }
        let summary = self.progress.aborted_summary();
        self.say(&summary);
        self.progress.reset();
        self.release().await;
    }

    async fn release(&mut self) {
        if let Some(reporter) = self.reporter.as_mut() {
            if let Err(e) = reporter.stop_heartbeat().await {
                warn!(error = %e, "failed to stop live reporter cleanly");
            }
            let line = format!("Live Reporter unregistered from {}", reporter.sink());
            self.say(&line);
        }
        if let Some(target) = self.dlq_target.as_mut() {
            if let Err(e) = target.close().await {
                warn!(error = %e, "failed to close dead-letter sink");
            }
        }
        if let Some(mut handler) = self.error_handler.take() {
            if let Err(e) = handler.close().await {
                warn!(error = %e, "failed to close error handler");
            }
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("processed", &self.progress.counter())
            .field("reporter", &self.reporter)
            .field("dlq", &self.dlq_target.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds an action id.
#[must_use]
pub fn generate_id(
    kind: ActionKind,
    name: Option<&str>,
    source: Option<&ConnectorInfo>,
    target: Option<&ConnectorInfo>,
) -> String {
    if let Some(name) = name {
        return name.replace(' ', "-");
    }
    let mut id = kind.action_type().to_string();
    if let Some(source) = source {
        id.push_str("-from-");
        id.push_str(&source.display);
    }
    if let Some(target) = target {
        id.push_str("-to-");
        id.push_str(&target.display);
    }
    id
}

/// Whether shutdown has already been requested on `shutdown`.
#[must_use]
pub fn shutdown_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

/// Resolves once `true` is sent on `shutdown`; never resolves without a
/// channel or after the sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SinkErrorHandler;
    use crate::kafka::TopicPartition;
    use crate::memory::{ListSink, ListSource};
    use crate::testing::MockCluster;

    fn wiring() -> Wiring {
        let source = ListSource::new(Vec::new());
        let target = ListSink::new();
        Wiring {
            source: Some(ConnectorInfo::of_source(&source)),
            source_topic: None,
            target: Some(ConnectorInfo::of_sink(&target)),
            input: Endpoint::new("List", "topic"),
            output: Endpoint::new("List", "topic"),
        }
    }

    fn heartbeat_status(record: &Record) -> String {
        let body: serde_json::Value =
            serde_json::from_str(&record.value().unwrap().as_text().unwrap()).unwrap();
        body["status"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_generate_id() {
        let w = wiring();
        assert_eq!(
            generate_id(ActionKind::Mapper, None, w.source.as_ref(), w.target.as_ref()),
            "Mapper-from-In-Memory List(0 records)-to-In-Memory List"
        );
        assert_eq!(
            generate_id(ActionKind::Projector, Some("my projector"), w.source.as_ref(), None),
            "my-projector"
        );
        assert_eq!(
            generate_id(ActionKind::Adapter, None, None, None),
            "Manual Adapter"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ActionKind::Mapper.component_type(), "mapper");
        assert_eq!(ActionKind::AutomaticAdapter.component_type(), "adapter");
        assert_eq!(ActionKind::AutomaticAdapter.to_string(), "Automatic Adapter");
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let mut action = Action::new(ActionKind::Mapper, wiring(), ActionOptions::new()).unwrap();
        assert!(matches!(action.finished().await, Err(ActionError::NotStarted)));
        action.started().unwrap();
        assert!(matches!(action.started(), Err(ActionError::AlreadyStarted)));
        action.finished().await.unwrap();
        // Counters reset, so the action can run again.
        action.started().unwrap();
    }

    #[tokio::test]
    async fn test_aborted_action_can_start_again() {
        let mut action = Action::new(ActionKind::Mapper, wiring(), ActionOptions::new()).unwrap();
        action.started().unwrap();
        action.record_processed();
        action.record_processed();
        action.aborted().await;

        assert_eq!(action.progress.counter(), 0);
        assert!(!action.progress.is_started());
        action.started().unwrap();
        assert_eq!(action.progress.counter(), 0);
    }

    #[tokio::test]
    async fn test_dlq_requires_target() {
        let mut action = Action::new(ActionKind::Mapper, wiring(), ActionOptions::new()).unwrap();
        let err = action
            .send_dlq_record(Record::new(Vec::new(), None::<String>, "x"), "bad")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::NoDeadLetterTarget));
    }

    #[tokio::test]
    async fn test_dlq_adds_reason_header() {
        let dlq = ListSink::new();
        let mut action = Action::new(
            ActionKind::Mapper,
            wiring(),
            ActionOptions::new().with_dlq_target(Box::new(dlq.clone())),
        )
        .unwrap();
        action
            .send_dlq_record(Record::new(Vec::new(), None::<String>, "x"), "unparseable")
            .await
            .unwrap();

        let records = dlq.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get_last_header(DEAD_LETTER_REASON_HEADER).unwrap().as_deref(),
            Some("unparseable")
        );
        assert_eq!(action.metrics().unwrap().snapshot().dlq, 1);
    }

    #[tokio::test]
    async fn test_auto_dlq_for_topic_source() {
        let cluster = MockCluster::new();
        let kafka = KafkaContext::new(
            KafkaProperties::with_brokers("mock:9092"),
            Arc::new(cluster.clone()),
        );
        let mut w = wiring();
        w.source_topic = Some("knowledge".into());
        let settings = PipelineSettings {
            auto_enable_dlq: true,
            ..PipelineSettings::default()
        };
        let mut action = Action::new(
            ActionKind::Mapper,
            w,
            ActionOptions::new()
                .without_reporter()
                .with_error_handler_kind(ErrorHandlerKind::Log)
                .with_settings(settings)
                .with_kafka(kafka),
        )
        .unwrap();
        assert!(action.has_dlq_target());

        action
            .send_dlq_record(Record::new(Vec::new(), None::<String>, "x"), "bad")
            .await
            .unwrap();
        action.started().unwrap();
        action.finished().await.unwrap();

        let dead = cluster.messages("knowledge.dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].topic_partition(), TopicPartition::new("knowledge.dlq", 0));
    }

    #[tokio::test]
    async fn test_auto_dlq_ignored_without_topic() {
        let settings = PipelineSettings {
            auto_enable_dlq: true,
            ..PipelineSettings::default()
        };
        let action = Action::new(
            ActionKind::Mapper,
            wiring(),
            ActionOptions::new().with_settings(settings),
        )
        .unwrap();
        assert!(!action.has_dlq_target());
    }

    #[tokio::test]
    async fn test_errors_are_counted_and_forwarded() {
        let errors = ListSink::new();
        let mut action = Action::new(
            ActionKind::Projector,
            wiring(),
            ActionOptions::new().with_error_handler(Box::new(SinkErrorHandler::new(
                "projector",
                Box::new(errors.clone()),
            ))),
        )
        .unwrap();
        action.started().unwrap();
        action.records_processed(3);
        action.send_error("bad row", "Parse", ErrorLevel::Warning).await;
        action
            .send_exception(&ActionError::transform("boom"), ErrorLevel::Error)
            .await;

        assert_eq!(action.progress().errors(), 2);
        assert_eq!(action.metrics().unwrap().snapshot().errors, 2);
        let records = errors.records();
        assert_eq!(records.len(), 2);
        let body: serde_json::Value =
            serde_json::from_str(&records[1].value().unwrap().as_text().unwrap()).unwrap();
        assert_eq!(body["error_type"], "Transform");
        assert_eq!(body["counter"], 3);
    }

    #[tokio::test]
    async fn test_finished_reports_completed() {
        let heartbeats = ListSink::new();
        let mut action = Action::new(
            ActionKind::Mapper,
            wiring(),
            ActionOptions::new().with_reporter_sink(Box::new(heartbeats.clone())),
        )
        .unwrap();
        action.register_reporter().await;
        action.started().unwrap();
        action.record_processed();
        action.finished().await.unwrap();

        let records = heartbeats.records();
        assert!(records.len() >= 2);
        assert_eq!(heartbeat_status(&records[0]), "STARTED");
        assert_eq!(heartbeat_status(records.last().unwrap()), "COMPLETED");
        assert_eq!(action.reporter().unwrap().status(), Status::Completed);
    }

    #[tokio::test]
    async fn test_aborted_keeps_status() {
        let heartbeats = ListSink::new();
        let mut action = Action::new(
            ActionKind::Mapper,
            wiring(),
            ActionOptions::new().with_reporter_sink(Box::new(heartbeats.clone())),
        )
        .unwrap();
        action.register_reporter().await;
        action.started().unwrap();
        action.set_status(Status::Erroring);
        action.aborted().await;

        let records = heartbeats.records();
        assert_eq!(heartbeat_status(records.last().unwrap()), "ERRORING");
    }

    #[tokio::test]
    async fn test_disabled_metrics() {
        let mut action = Action::new(
            ActionKind::Mapper,
            wiring(),
            ActionOptions::new().with_metrics_disabled(),
        )
        .unwrap();
        action.started().unwrap();
        action.record_processed();
        assert!(action.metrics().is_none());
        assert_eq!(action.progress().counter(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut shutdown = Some(rx);
        assert!(!shutdown_requested(shutdown.as_ref()));
        tx.send(true).unwrap();
        wait_for_shutdown(&mut shutdown).await;
        assert!(shutdown_requested(shutdown.as_ref()));
    }
}

//! Live status reporting.
//!
//! A [`Reporter`] registers a component with a monitoring topic and then
//! sends a heartbeat every `heartbeat_time` from a background task. The task
//! waits on a cancellation channel rather than sleeping blindly, so
//! [`Reporter::stop_heartbeat`] returns promptly.
//!
//! Heartbeats are JSON documents:
//!
//! ```json
//! {"id": "mapper-from-a-to-b", "instance_id": "…", "name": null,
//!  "timestamp": "2024-01-01T00:00:00+00:00", "component_type": "mapper",
//!  "reporting_period": 15.0, "input": {"name": "a", "type": "topic"},
//!  "output": {"name": "b", "type": "topic"}, "status": "RUNNING"}
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connector::DataSink;
use crate::error::ConnectorError;
use crate::record::Record;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_TIME: Duration = Duration::from_secs(15);

/// Reported status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Registered, not yet processing.
    Started,
    /// Processing.
    Running,
    /// Finished normally.
    Completed,
    /// Failed.
    Erroring,
    /// Stopped on request.
    Terminated,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Started => write!(f, "STARTED"),
            Status::Running => write!(f, "RUNNING"),
            Status::Completed => write!(f, "COMPLETED"),
            Status::Erroring => write!(f, "ERRORING"),
            Status::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// One end of a component: what it reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Endpoint {
    /// Name, e.g. a topic.
    pub name: Option<String>,
    /// Type, e.g. `topic` or a MIME type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: Some(kind.into()),
        }
    }
}

/// Static description of the reporting component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComponentDetails {
    /// Generated action id.
    pub id: String,
    /// Optional human name.
    pub name: Option<String>,
    /// Component type, e.g. `mapper`.
    pub component_type: String,
    /// Where data comes from.
    pub input: Endpoint,
    /// Where data goes.
    pub output: Endpoint,
}

/// A heartbeat document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    /// Generated action id.
    pub id: String,
    /// Random id of this process instance.
    pub instance_id: String,
    /// Optional human name.
    pub name: Option<String>,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Component type.
    pub component_type: String,
    /// Seconds between heartbeats.
    pub reporting_period: f64,
    /// Input endpoint.
    pub input: Endpoint,
    /// Output endpoint.
    pub output: Endpoint,
    /// Current status.
    pub status: Status,
}

struct Shared {
    details: ComponentDetails,
    instance_id: Uuid,
    heartbeat_time: Duration,
    status: Mutex<Status>,
    sink: tokio::sync::Mutex<Box<dyn DataSink>>,
}

impl Shared {
    fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            id: self.details.id.clone(),
            instance_id: self.instance_id.to_string(),
            name: self.details.name.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            component_type: self.details.component_type.clone(),
            reporting_period: self.heartbeat_time.as_secs_f64(),
            input: self.details.input.clone(),
            output: self.details.output.clone(),
            status: *self.status.lock(),
        }
    }

    async fn send_heartbeat(&self) -> Result<(), ConnectorError> {
        let body = serde_json::to_string(&self.heartbeat())
            .map_err(crate::error::SerdeError::from)?;
        self.sink
            .lock()
            .await
            .send(Record::new(Vec::new(), None::<String>, body))
            .await
    }
}

/// Sends registration and heartbeat records for one component.
pub struct Reporter {
    shared: Arc<Shared>,
    sink_display: String,
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Reporter {
    /// Creates a reporter writing to `sink`.
    pub fn new(details: ComponentDetails, sink: Box<dyn DataSink>) -> Self {
        let sink_display = sink.to_string();
        Self {
            shared: Arc::new(Shared {
                details,
                instance_id: Uuid::new_v4(),
                heartbeat_time: DEFAULT_HEARTBEAT_TIME,
                status: Mutex::new(Status::Started),
                sink: tokio::sync::Mutex::new(sink),
            }),
            sink_display,
            cancel: None,
            task: None,
            stopped: false,
        }
    }

    /// Sets the heartbeat interval. Has no effect once running.
    #[must_use]
    pub fn with_heartbeat_time(mut self, heartbeat_time: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.heartbeat_time = heartbeat_time;
        }
        self
    }

    /// Random id of this process instance.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.shared.instance_id
    }

    /// Display string of the heartbeat sink.
    #[must_use]
    pub fn sink(&self) -> &str {
        &self.sink_display
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        *self.shared.status.lock()
    }

    /// Sets the status reported by the next heartbeat.
    pub fn set_status(&self, status: Status) {
        *self.shared.status.lock() = status;
    }

    /// Builds the current heartbeat document.
    #[must_use]
    pub fn heartbeat(&self) -> Heartbeat {
        self.shared.heartbeat()
    }

    /// Sends a `STARTED` registration record.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the sink rejects the record.
    pub async fn register(&self) -> Result<(), ConnectorError> {
        self.set_status(Status::Started);
        self.shared.send_heartbeat().await
    }

    /// Starts the background heartbeat task.
    ///
    /// Calling it again while running does nothing.
    pub fn run(&mut self) {
        if self.task.is_some() || self.stopped {
            return;
        }
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        *shared.status.lock() = Status::Running;

        self.task = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = shared.send_heartbeat().await {
                    warn!(error = %e, "failed to send heartbeat");
                }
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(shared.heartbeat_time) => {}
                }
            }
            debug!("heartbeat task stopped");
        }));
        self.cancel = Some(cancel_tx);
        info!(
            id = %self.shared.details.id,
            sink = %self.sink_display,
            "reporter registered to send heartbeats"
        );
    }

    /// Stops the heartbeat task, sends a final heartbeat and closes the sink.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the final heartbeat or the sink close fails.
    pub async fn stop_heartbeat(&mut self) -> Result<(), ConnectorError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "heartbeat task panicked");
            }
        }
        let result = self.shared.send_heartbeat().await;
        let closed = self.shared.sink.lock().await.close().await;
        result.and(closed)
    }

    /// Marks the component `TERMINATED` and stops the heartbeat.
    ///
    /// # Errors
    ///
    /// See [`Reporter::stop_heartbeat`].
    pub async fn terminate(&mut self) -> Result<(), ConnectorError> {
        self.set_status(Status::Terminated);
        self.stop_heartbeat().await
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("id", &self.shared.details.id)
            .field("instance_id", &self.shared.instance_id)
            .field("sink", &self.sink_display)
            .field("running", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ListSink;

    fn details() -> ComponentDetails {
        ComponentDetails {
            id: "mapper-from-a-to-b".into(),
            name: None,
            component_type: "mapper".into(),
            input: Endpoint::new("a", "topic"),
            output: Endpoint::new("b", "topic"),
        }
    }

    fn statuses(sink: &ListSink) -> Vec<String> {
        sink.records()
            .iter()
            .map(|r| {
                let body: serde_json::Value =
                    serde_json::from_str(&r.value().unwrap().as_text().unwrap()).unwrap();
                body["status"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_heartbeat_document() {
        let reporter = Reporter::new(details(), Box::new(ListSink::new()));
        let json = serde_json::to_value(reporter.heartbeat()).unwrap();
        assert_eq!(json["id"], "mapper-from-a-to-b");
        assert_eq!(json["instance_id"], reporter.instance_id().to_string());
        assert_eq!(json["component_type"], "mapper");
        assert_eq!(json["reporting_period"], 15.0);
        assert_eq!(json["input"]["name"], "a");
        assert_eq!(json["input"]["type"], "topic");
        assert_eq!(json["output"]["name"], "b");
        assert_eq!(json["status"], "STARTED");
        assert!(json["name"].is_null());
    }

    #[tokio::test]
    async fn test_register_sends_started() {
        let sink = ListSink::new();
        let reporter = Reporter::new(details(), Box::new(sink.clone()));
        reporter.register().await.unwrap();
        assert_eq!(statuses(&sink), vec!["STARTED"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_until_stopped() {
        let sink = ListSink::new();
        let mut reporter = Reporter::new(details(), Box::new(sink.clone()))
            .with_heartbeat_time(Duration::from_secs(10));
        reporter.run();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(sink.len(), 3);

        reporter.set_status(Status::Completed);
        let started = tokio::time::Instant::now();
        reporter.stop_heartbeat().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        let seen = statuses(&sink);
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], "RUNNING");
        assert_eq!(seen[3], "COMPLETED");

        reporter.stop_heartbeat().await.unwrap();
        assert_eq!(sink.len(), 4);
    }

    #[tokio::test]
    async fn test_terminate_reports_terminated() {
        let sink = ListSink::new();
        let mut reporter = Reporter::new(details(), Box::new(sink.clone()));
        reporter.run();
        reporter.terminate().await.unwrap();
        assert_eq!(reporter.status(), Status::Terminated);
        assert_eq!(statuses(&sink).last().map(String::as_str), Some("TERMINATED"));
    }
}

//! Error handlers.
//!
//! An action reports errors it encounters as structured records:
//!
//! ```json
//! {"id": "...", "error_message": "...", "stack_trace": "...", "error_type": "...",
//!  "timestamp": "...", "level": "ERROR", "counter": 42}
//! ```
//!
//! Records carry a `Content-Type: application/json` header plus any headers
//! added with [`ErrorHandler::set_headers`]. Where they go depends on the
//! handler: a [`SinkErrorHandler`] sends them to a [`DataSink`] (normally the
//! `provenance.errors` topic), a [`FileErrorHandler`] appends JSON lines to a
//! file, and a [`LogErrorHandler`] writes them to the log.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::connector::DataSink;
use crate::error::{ActionError, ConfigError, ConnectorError, SerdeError};
use crate::record::{to_headers, Record};

/// Severity of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorLevel {
    /// Informational.
    Info,
    /// Something unexpected that did not stop processing.
    Warning,
    /// A failure.
    Error,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevel::Info => write!(f, "INFO"),
            ErrorLevel::Warning => write!(f, "WARNING"),
            ErrorLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Body of an error record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Id of the reporting component.
    pub id: String,
    /// Error message.
    pub error_message: String,
    /// Chain of underlying causes, one per line.
    pub stack_trace: String,
    /// Kind of error.
    pub error_type: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Severity.
    pub level: ErrorLevel,
    /// Records processed when the error happened.
    pub counter: u64,
}

impl ErrorReport {
    /// Creates a report timestamped now.
    pub fn new(
        id: impl Into<String>,
        message: impl Into<String>,
        error_type: impl Into<String>,
        level: ErrorLevel,
        counter: u64,
    ) -> Self {
        Self {
            id: id.into(),
            error_message: message.into(),
            stack_trace: String::new(),
            error_type: error_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            counter,
        }
    }

    /// Sets the stack trace.
    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    /// Renders the report as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, SerdeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Renders the `source()` chain of an error, innermost last.
#[must_use]
pub fn stack_trace(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {cause}"));
        current = cause.source();
    }
    lines.join("\n")
}

/// Identity and headers shared by every handler.
#[derive(Debug, Clone)]
pub struct HandlerBase {
    component_id: String,
    headers: BTreeMap<String, String>,
}

impl HandlerBase {
    /// Creates a base for the given component.
    pub fn new(component_id: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            component_id: component_id.into(),
            headers,
        }
    }

    fn record(&self, report: &ErrorReport) -> Result<Record, ConnectorError> {
        Ok(Record::new(
            to_headers(self.headers.clone(), &[]),
            None::<String>,
            report.to_json()?,
        ))
    }
}

/// Receives error reports from an action.
#[async_trait]
pub trait ErrorHandler: Send {
    /// Shared identity and headers.
    fn base(&self) -> &HandlerBase;

    /// Mutable access to the shared identity and headers.
    fn base_mut(&mut self) -> &mut HandlerBase;

    /// Delivers one error record.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the record cannot be delivered.
    async fn deliver(&mut self, record: Record) -> Result<(), ConnectorError>;

    /// Releases the handler.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if buffered reports cannot be flushed.
    async fn close(&mut self) -> Result<(), ConnectorError>;

    /// Id of the component whose errors are reported.
    fn component_id(&self) -> &str {
        &self.base().component_id
    }

    /// Headers added to every error record.
    fn headers(&self) -> &BTreeMap<String, String> {
        &self.base().headers
    }

    /// Merges `headers` into the record headers, or replaces them.
    fn set_headers(&mut self, headers: BTreeMap<String, String>, merge: bool) {
        let base = self.base_mut();
        if merge {
            base.headers.extend(headers);
        } else {
            base.headers = headers;
        }
    }

    /// Reports an error message.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the report cannot be delivered.
    async fn send_error(
        &mut self,
        message: &str,
        error_type: &str,
        level: ErrorLevel,
        counter: u64,
    ) -> Result<(), ConnectorError> {
        let report = ErrorReport::new(self.component_id(), message, error_type, level, counter);
        let record = self.base().record(&report)?;
        self.deliver(record).await
    }

    /// Reports a failed action, including its cause chain.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the report cannot be delivered.
    async fn send_exception(
        &mut self,
        err: &ActionError,
        level: ErrorLevel,
        counter: u64,
    ) -> Result<(), ConnectorError> {
        let report = ErrorReport::new(
            self.component_id(),
            err.to_string(),
            err.kind(),
            level,
            counter,
        )
        .with_stack_trace(stack_trace(err));
        let record = self.base().record(&report)?;
        self.deliver(record).await
    }
}

/// Sends error records to a data sink.
pub struct SinkErrorHandler {
    base: HandlerBase,
    sink: Box<dyn DataSink>,
}

impl SinkErrorHandler {
    /// Creates a handler sending to `sink`.
    pub fn new(component_id: impl Into<String>, sink: Box<dyn DataSink>) -> Self {
        Self {
            base: HandlerBase::new(component_id),
            sink,
        }
    }
}

impl fmt::Debug for SinkErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkErrorHandler")
            .field("component_id", &self.base.component_id)
            .field("sink", &self.sink.to_string())
            .finish()
    }
}

#[async_trait]
impl ErrorHandler for SinkErrorHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }

    async fn deliver(&mut self, record: Record) -> Result<(), ConnectorError> {
        self.sink.send(record).await
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.sink.close().await
    }
}

/// Appends error records to a file, one JSON document per line.
#[derive(Debug)]
pub struct FileErrorHandler {
    base: HandlerBase,
    path: PathBuf,
    file: Option<File>,
}

impl FileErrorHandler {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Io` if the file cannot be opened.
    pub fn new(component_id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            base: HandlerBase::new(component_id),
            path,
            file: Some(File::from_std(file)),
        })
    }

    /// Path of the error file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ErrorHandler for FileErrorHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }

    async fn deliver(&mut self, record: Record) -> Result<(), ConnectorError> {
        let Some(file) = self.file.as_mut() else {
            return Err(ConnectorError::Closed);
        };
        let line = record
            .value()
            .and_then(|v| v.as_text().map(|t| t.into_owned()))
            .unwrap_or_default();
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

/// Writes error records to the log.
#[derive(Debug)]
pub struct LogErrorHandler {
    base: HandlerBase,
}

impl LogErrorHandler {
    /// Creates a handler for the given component.
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            base: HandlerBase::new(component_id),
        }
    }
}

#[async_trait]
impl ErrorHandler for LogErrorHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }

    async fn deliver(&mut self, record: Record) -> Result<(), ConnectorError> {
        let report = record
            .value()
            .and_then(|v| v.as_text().map(|t| t.into_owned()))
            .unwrap_or_default();
        error!(component = %self.base.component_id, report = %report, "action error");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Which error handler an action builds when none is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorHandlerKind {
    /// [`SinkErrorHandler`] over a Kafka sink.
    #[default]
    Kafka,
    /// [`FileErrorHandler`].
    File,
    /// [`LogErrorHandler`].
    Log,
}

impl FromStr for ErrorHandlerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kafka" => Ok(ErrorHandlerKind::Kafka),
            "file" => Ok(ErrorHandlerKind::File),
            "log" | "print" => Ok(ErrorHandlerKind::Log),
            other => Err(ConfigError::Conversion {
                key: "ERROR_HANDLER_TYPE".to_string(),
                raw: other.to_string(),
                message: "expected one of kafka, file, log".to_string(),
            }),
        }
    }
}

/// Builds the handler selected by `kind`.
///
/// `kafka_sink` is called only for [`ErrorHandlerKind::Kafka`] and receives
/// the error topic. A handler that cannot be built falls back to
/// [`LogErrorHandler`].
pub fn build_error_handler<F>(
    kind: ErrorHandlerKind,
    component_id: &str,
    settings: &crate::config::PipelineSettings,
    kafka_sink: F,
) -> Box<dyn ErrorHandler>
where
    F: FnOnce(&str) -> Result<Box<dyn DataSink>, ConnectorError>,
{
    let built: Result<Box<dyn ErrorHandler>, ConnectorError> = match kind {
        ErrorHandlerKind::Kafka => kafka_sink(&settings.error_topic)
            .map(|sink| Box::new(SinkErrorHandler::new(component_id, sink)) as Box<dyn ErrorHandler>),
        ErrorHandlerKind::File => FileErrorHandler::new(component_id, &settings.error_file_path)
            .map(|h| Box::new(h) as Box<dyn ErrorHandler>),
        ErrorHandlerKind::Log => Ok(Box::new(LogErrorHandler::new(component_id))),
    };
    match built {
        Ok(handler) => {
            info!(component = component_id, kind = ?kind, "error handler ready");
            handler
        }
        Err(e) => {
            warn!(error = %e, component = component_id, "error handler defaulting to log");
            Box::new(LogErrorHandler::new(component_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineSettings;
    use crate::memory::ListSink;

    #[tokio::test]
    async fn test_sink_handler_sends_json_record() {
        let sink = ListSink::new();
        let mut handler = SinkErrorHandler::new("mapper-from-a", Box::new(sink.clone()));
        handler
            .send_error("boom", "Parse", ErrorLevel::Warning, 7)
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.get_first_header("content-type").unwrap().as_deref(),
            Some("application/json")
        );
        let body: serde_json::Value =
            serde_json::from_str(&record.value().unwrap().as_text().unwrap()).unwrap();
        assert_eq!(body["id"], "mapper-from-a");
        assert_eq!(body["error_message"], "boom");
        assert_eq!(body["error_type"], "Parse");
        assert_eq!(body["level"], "WARNING");
        assert_eq!(body["counter"], 7);
        assert_eq!(body["stack_trace"], "");
    }

    #[tokio::test]
    async fn test_send_exception_includes_cause_chain() {
        let sink = ListSink::new();
        let mut handler = SinkErrorHandler::new("c", Box::new(sink.clone()));
        let err = ActionError::transform(ConnectorError::ReadError("disk".into()));
        handler
            .send_exception(&err, ErrorLevel::Error, 3)
            .await
            .unwrap();

        let value = sink.records()[0].value().unwrap().as_text().unwrap().into_owned();
        let body: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert_eq!(body["error_type"], "Transform");
        assert_eq!(body["level"], "ERROR");
        assert_eq!(body["stack_trace"], "caused by: read error: disk");
    }

    #[tokio::test]
    async fn test_set_headers_merge_and_replace() {
        let mut handler = LogErrorHandler::new("c");
        let mut extra = BTreeMap::new();
        extra.insert("Source".to_string(), "unit".to_string());
        handler.set_headers(extra.clone(), true);
        assert_eq!(handler.headers().len(), 2);

        handler.set_headers(extra, false);
        assert_eq!(handler.headers().len(), 1);
        assert!(handler.headers().contains_key("Source"));
        handler.send_error("x", "", ErrorLevel::Info, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_handler_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let mut handler = FileErrorHandler::new("c", &path).unwrap();
        handler.send_error("one", "", ErrorLevel::Error, 1).await.unwrap();
        handler.send_error("two", "", ErrorLevel::Error, 2).await.unwrap();
        handler.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"error_message\":\"two\""));

        assert!(matches!(
            handler.send_error("late", "", ErrorLevel::Error, 3).await,
            Err(ConnectorError::Closed)
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_file_handler_lines_visible_before_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let mut handler = FileErrorHandler::new("c", &path).unwrap();
        handler.send_error("one", "Io", ErrorLevel::Warning, 1).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.ends_with('\n'));

        // Reopening appends rather than truncating.
        handler.close().await.unwrap();
        let mut again = FileErrorHandler::new("c", &path).unwrap();
        again.send_error("two", "Io", ErrorLevel::Warning, 2).await.unwrap();
        again.close().await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_handler_kind_from_str() {
        assert_eq!("Kafka".parse::<ErrorHandlerKind>().unwrap(), ErrorHandlerKind::Kafka);
        assert_eq!("print".parse::<ErrorHandlerKind>().unwrap(), ErrorHandlerKind::Log);
        assert!("smoke".parse::<ErrorHandlerKind>().is_err());
    }

    #[test]
    fn test_build_falls_back_to_log() {
        let settings = PipelineSettings::default();
        let handler = build_error_handler(ErrorHandlerKind::Kafka, "c", &settings, |_| {
            Err(ConnectorError::ConnectionFailed("no brokers".into()))
        });
        assert_eq!(handler.component_id(), "c");
    }

    #[tokio::test]
    async fn test_build_kafka_uses_error_topic() {
        let settings = PipelineSettings::default();
        let sink = ListSink::new();
        let captured = sink.clone();
        let mut seen = String::new();
        let mut handler = build_error_handler(ErrorHandlerKind::Kafka, "c", &settings, |topic| {
            seen = topic.to_string();
            Ok(Box::new(sink) as Box<dyn DataSink>)
        });
        assert_eq!(seen, "provenance.errors");
        handler.send_error("x", "", ErrorLevel::Error, 0).await.unwrap();
        assert_eq!(captured.len(), 1);
    }
}

//! Error types for actions, connectors and records.
//!
//! - `ConnectorError`: source and sink failures (transport, config, serde)
//! - `SerdeError`: payload serialization and deserialization failures
//! - `RecordError`: header decoding failures
//! - `LabelError`: security label misuse
//! - `ConfigError`: configuration lookup and conversion failures
//! - `ActionError`: lifecycle and engine failures, including the dead-letter signal

use thiserror::Error;

/// Errors that can occur during source and sink operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Failed to connect to the external system.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid connector configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Required configuration key is missing.
    #[error("missing required config: {0}")]
    MissingConfig(String),

    /// Error reading data from a source.
    #[error("read error: {0}")]
    ReadError(String),

    /// Error writing data to a sink.
    #[error("write error: {0}")]
    WriteError(String),

    /// Serialization or deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] SerdeError),

    /// Offset commit error.
    #[error("commit error: {0}")]
    CommitError(String),

    /// The topic backing a source does not exist on the broker.
    #[error(
        "Source {name} not found on the specified bootstrap server, are you sure this source exists?"
    )]
    SourceNotFound {
        /// Name of the missing source.
        name: String,
    },

    /// The connector is not in the expected state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// The expected state.
        expected: String,
        /// The actual state.
        actual: String,
    },

    /// The connector has been closed.
    #[error("connector closed")]
    Closed,

    /// An internal error that doesn't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),

    /// An I/O error from the underlying system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur during payload serialization or deserialization.
#[derive(Debug, Error)]
pub enum SerdeError {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Bytes were not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// The payload shape is not supported by the chosen serializer.
    #[error("unsupported payload: {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for SerdeError {
    fn from(e: serde_json::Error) -> Self {
        SerdeError::Json(e.to_string())
    }
}

/// Errors raised when reading record headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The header value is structured data rather than text or bytes.
    #[error("Header value is not a str/bytes (header '{key}')")]
    NotText {
        /// Header key that failed to decode.
        key: String,
    },

    /// The header bytes were not valid UTF-8.
    #[error("header '{key}' is not valid UTF-8")]
    InvalidUtf8 {
        /// Header key that failed to decode.
        key: String,
    },
}

/// Errors raised while building security labels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    /// A single-value label was given zero or several values.
    #[error("label '{label}' takes exactly one value, got {count}")]
    SingleValueExpected {
        /// The label name.
        label: String,
        /// Number of values supplied.
        count: usize,
    },

    /// An OR expression was empty or too short.
    #[error("Valid security label expression required")]
    EmptyExpression,

    /// An OR expression was not wrapped in brackets.
    #[error("Valid security label expression should be enclosed with brackets (security-label expression): {0}")]
    Unbracketed(String),
}

/// Errors raised when reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key has no value and no default.
    #[error("Required Configuration Key {key} is not set.{}", describe(.description))]
    Missing {
        /// The configuration key.
        key: String,
        /// Optional human description of the key.
        description: Option<String>,
    },

    /// The raw value could not be converted to the requested type.
    #[error("Configuration Key {key} has raw value {raw} that failed value conversion: {message}")]
    Conversion {
        /// The configuration key.
        key: String,
        /// The raw string value.
        raw: String,
        /// Conversion failure details.
        message: String,
    },

    /// A named mode (auth or connection mode) is not recognised.
    #[error("{mode} is not a valid {kind} mode. Valid options: {valid}")]
    UnknownMode {
        /// Kind of mode, e.g. `auth`.
        kind: &'static str,
        /// The mode that was requested.
        mode: String,
        /// Comma separated list of valid modes.
        valid: String,
    },

    /// A configuration file could not be read.
    #[error("failed to read configuration file {path}: {message}")]
    File {
        /// Path to the file.
        path: String,
        /// Read failure details.
        message: String,
    },
}

fn describe(description: &Option<String>) -> String {
    description
        .as_ref()
        .map(|d| format!("  {d}"))
        .unwrap_or_default()
}

impl From<ConfigError> for ConnectorError {
    fn from(e: ConfigError) -> Self {
        ConnectorError::ConfigurationError(e.to_string())
    }
}

/// Errors raised by actions and the engines built on them.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The record cannot be processed and should be routed to the dead-letter sink.
    ///
    /// This is a per-record signal: engines divert the offending record and
    /// keep going.
    #[error("{0}")]
    DeadLetter(String),

    /// `started()` was called on an action that is already running.
    #[error("Action has already been started")]
    AlreadyStarted,

    /// A lifecycle method requiring a running action was called too early.
    #[error("Action has not been started")]
    NotStarted,

    /// A dead-letter record was produced but no dead-letter sink is set.
    #[error("Unable to send record to DLQ as dlq_target has not been set.")]
    NoDeadLetterTarget,

    /// A caller supplied transform failed.
    #[error("{0}")]
    Transform(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A source or sink failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Record headers could not be read.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A security label could not be built.
    #[error(transparent)]
    Label(#[from] LabelError),

    /// Configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ActionError {
    /// Creates a dead-letter signal with the given reason.
    pub fn dead_letter(reason: impl Into<String>) -> Self {
        ActionError::DeadLetter(reason.into())
    }

    /// Wraps an arbitrary error raised by a caller supplied function.
    pub fn transform(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ActionError::Transform(err.into())
    }

    /// Short name of the error kind, reported as `error_type` to error handlers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::DeadLetter(_) => "DeadLetter",
            ActionError::AlreadyStarted | ActionError::NotStarted => "Lifecycle",
            ActionError::NoDeadLetterTarget => "NoDeadLetterTarget",
            ActionError::Transform(_) => "Transform",
            ActionError::Connector(ConnectorError::SourceNotFound { .. }) => "SourceNotFound",
            ActionError::Connector(_) => "Connector",
            ActionError::Record(_) => "Record",
            ActionError::Label(_) => "Label",
            ActionError::Config(_) => "Config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_display() {
        let err = ConnectorError::ConnectionFailed("host unreachable".into());
        assert_eq!(err.to_string(), "connection failed: host unreachable");
    }

    #[test]
    fn test_source_not_found_message() {
        let err = ConnectorError::SourceNotFound {
            name: "knowledge".into(),
        };
        assert_eq!(
            err.to_string(),
            "Source knowledge not found on the specified bootstrap server, are you sure this source exists?"
        );
    }

    #[test]
    fn test_serde_error_from_json() {
        let json_err: Result<serde_json::Value, _> = serde_json::from_str("{bad json");
        let serde_err: SerdeError = json_err.unwrap_err().into();
        assert!(matches!(serde_err, SerdeError::Json(_)));
    }

    #[test]
    fn test_serde_error_into_connector_error() {
        let conn_err: ConnectorError = SerdeError::Unsupported("json header".into()).into();
        assert!(matches!(conn_err, ConnectorError::Serde(_)));
        assert!(conn_err.to_string().contains("json header"));
    }

    #[test]
    fn test_config_missing_with_description() {
        let err = ConfigError::Missing {
            key: "SOURCE_TOPIC".into(),
            description: Some("Topic to read from".into()),
        };
        assert_eq!(
            err.to_string(),
            "Required Configuration Key SOURCE_TOPIC is not set.  Topic to read from"
        );
    }

    #[test]
    fn test_dead_letter_displays_reason() {
        let err = ActionError::dead_letter("bad payload");
        assert_eq!(err.to_string(), "bad payload");
        assert_eq!(err.kind(), "DeadLetter");
    }

    #[test]
    fn test_transform_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ActionError::transform(io);
        assert_eq!(err.to_string(), "disk gone");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_no_dlq_target_message() {
        assert_eq!(
            ActionError::NoDeadLetterTarget.to_string(),
            "Unable to send record to DLQ as dlq_target has not been set."
        );
    }
}

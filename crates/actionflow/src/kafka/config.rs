//! Kafka source and sink configuration.
//!
//! [`KafkaSourceConfig`] and [`KafkaSinkConfig`] wrap the shared
//! [`KafkaProperties`] connection map with connector-specific settings:
//! topic, (de)serializers, commit cadence and retry policy.

use std::panic::Location;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "kafka")]
use rdkafka::config::ClientConfig;
use tracing::{info, warn};

use super::client::SeekTarget;
use super::group_id::generate_group_id;
use crate::config::kafka::KafkaProperties;
use crate::config::Configurator;
use crate::error::ConnectorError;
use crate::serde::{deserializers, serializers, DeserializeFn, SerializeFn};

/// Number of records read between offset commits.
pub const DEFAULT_COMMIT_INTERVAL: u64 = 10_000;

/// Poll timeout of the source read loop.
///
/// Kept short: a long wait could block while the source should be seeking.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Wait before retrying a send the producer buffer rejected.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// How long closing a sink waits for buffered messages.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings only meaningful to consumers, removed from sink properties.
const CONSUMER_ONLY_KEYS: [&str; 2] = ["auto.offset.reset", "enable.auto.commit"];

/// Where a source starts reading a partition.
///
/// `Earliest` and `Latest` only apply when the group has no committed offset.
/// `Beginning` and `End` additionally seek every newly assigned partition
/// once, ignoring committed offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// Start from the earliest offset if nothing is committed.
    #[default]
    Earliest,
    /// Start from the end of the log if nothing is committed.
    Latest,
    /// Always seek new partitions to the first retained offset.
    Beginning,
    /// Always seek new partitions to the end of the log.
    End,
}

impl OffsetReset {
    /// Returns the rdkafka config value string.
    #[must_use]
    pub fn as_rdkafka_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::Beginning => "beginning",
            OffsetReset::End => "end",
        }
    }

    /// The explicit seek this policy performs on new partitions, if any.
    #[must_use]
    pub fn seek_target(&self) -> Option<SeekTarget> {
        match self {
            OffsetReset::Beginning => Some(SeekTarget::Beginning),
            OffsetReset::End => Some(SeekTarget::End),
            OffsetReset::Earliest | OffsetReset::Latest => None,
        }
    }
}

impl FromStr for OffsetReset {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earliest" | "smallest" => Ok(OffsetReset::Earliest),
            "latest" | "largest" => Ok(OffsetReset::Latest),
            "beginning" => Ok(OffsetReset::Beginning),
            "end" => Ok(OffsetReset::End),
            other => Err(ConnectorError::ConfigurationError(format!(
                "invalid auto.offset.reset: '{other}' (expected earliest/latest/beginning/end)"
            ))),
        }
    }
}

impl std::fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_rdkafka_str())
    }
}

/// Kafka source configuration.
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Topic to subscribe to.
    pub topic: String,
    /// Connection properties passed through to the client.
    pub properties: KafkaProperties,
    /// Consumer group; generated from the host and call site if unset.
    pub group_id: Option<String>,
    /// Where to start reading.
    pub auto_offset_reset: OffsetReset,
    /// Records read between offset commits.
    pub commit_interval: u64,
    /// Timeout for each poll call.
    pub poll_timeout: Duration,
    /// Decodes message keys.
    pub key_deserializer: DeserializeFn,
    /// Decodes message values.
    pub value_deserializer: DeserializeFn,
    origin: &'static Location<'static>,
}

impl KafkaSourceConfig {
    /// Creates a configuration with defaults for everything but the topic
    /// and connection properties.
    ///
    /// The caller's location is remembered for group id generation.
    #[must_use]
    #[track_caller]
    pub fn new(topic: impl Into<String>, properties: KafkaProperties) -> Self {
        Self {
            topic: topic.into(),
            properties,
            group_id: None,
            auto_offset_reset: OffsetReset::default(),
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            key_deserializer: deserializers::binary_to_string,
            value_deserializer: deserializers::binary_to_string,
            origin: Location::caller(),
        }
    }

    /// Parses a configuration from connection properties.
    ///
    /// `group.id` and `auto.offset.reset` are lifted out of the properties
    /// into their typed fields.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if a value is invalid.
    #[track_caller]
    pub fn from_properties(
        topic: impl Into<String>,
        mut properties: KafkaProperties,
    ) -> Result<Self, ConnectorError> {
        let group_id = properties.remove("group.id").filter(|g| !g.trim().is_empty());
        let auto_offset_reset = match properties.remove("auto.offset.reset") {
            Some(s) => s.parse::<OffsetReset>()?,
            None => OffsetReset::default(),
        };

        let mut cfg = Self::new(topic, properties);
        cfg.group_id = group_id;
        cfg.auto_offset_reset = auto_offset_reset;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads connection settings through a [`Configurator`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the connection settings are missing or
    /// invalid.
    #[track_caller]
    pub fn from_configurator(
        topic: impl Into<String>,
        conf: &Configurator,
    ) -> Result<Self, ConnectorError> {
        let properties = KafkaProperties::from_configurator(conf)?;
        Self::from_properties(topic, properties)
    }

    /// Sets the consumer group.
    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the offset reset policy.
    #[must_use]
    pub fn with_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    /// Sets the number of records read between commits.
    #[must_use]
    pub fn with_commit_interval(mut self, interval: u64) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Sets the poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the key deserializer.
    #[must_use]
    pub fn with_key_deserializer(mut self, deserializer: DeserializeFn) -> Self {
        self.key_deserializer = deserializer;
        self
    }

    /// Sets the value deserializer.
    #[must_use]
    pub fn with_value_deserializer(mut self, deserializer: DeserializeFn) -> Self {
        self.value_deserializer = deserializer;
        self
    }

    /// Broker list, or an empty string if none is configured.
    #[must_use]
    pub fn brokers(&self) -> &str {
        self.properties.brokers().unwrap_or_default()
    }

    /// Source location that created this configuration.
    #[must_use]
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Returns the configured group id, generating one if none was set.
    #[must_use]
    pub fn resolve_group_id(&self) -> String {
        if let Some(group_id) = &self.group_id {
            return group_id.clone();
        }
        warn!(topic = %self.topic, "no consumer group.id was provided, generating one");
        let group_id = generate_group_id(self.origin);
        info!(group_id = %group_id, "automatically selected consumer group.id");
        group_id
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.topic.trim().is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "topic cannot be empty".into(),
            ));
        }
        if self.brokers().is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "bootstrap.servers cannot be empty".into(),
            ));
        }
        if self.commit_interval == 0 {
            return Err(ConnectorError::ConfigurationError(
                "commit interval must be > 0".into(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConnectorError::ConfigurationError(
                "poll timeout must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Builds an rdkafka [`ClientConfig`] for the given group.
    #[cfg(feature = "kafka")]
    #[must_use]
    pub fn to_rdkafka_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("enable.auto.commit", "false");

        // Pass-through properties can override the defaults above.
        for (key, value) in self.properties.iter() {
            config.set(key, value);
        }

        config.set("group.id", group_id);
        config.set("auto.offset.reset", self.auto_offset_reset.as_rdkafka_str());
        config
    }
}

/// Kafka sink configuration.
#[derive(Debug, Clone)]
pub struct KafkaSinkConfig {
    /// Topic to produce to.
    pub topic: String,
    /// Connection properties passed through to the client.
    pub properties: KafkaProperties,
    /// Encodes message keys.
    pub key_serializer: SerializeFn,
    /// Encodes message values.
    pub value_serializer: SerializeFn,
    /// Wait before retrying when the producer buffer is full.
    pub retry_backoff: Duration,
    /// How long `close()` waits for buffered messages.
    pub flush_timeout: Duration,
}

impl KafkaSinkConfig {
    /// Creates a configuration with default serializers and timeouts.
    ///
    /// Consumer-only settings are removed from `properties`, so one
    /// property map can be shared between a source and a sink.
    #[must_use]
    pub fn new(topic: impl Into<String>, mut properties: KafkaProperties) -> Self {
        for key in CONSUMER_ONLY_KEYS {
            properties.remove(key);
        }
        Self {
            topic: topic.into(),
            properties,
            key_serializer: serializers::to_binary,
            value_serializer: serializers::to_binary,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Parses a validated configuration from connection properties.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the configuration is invalid.
    pub fn from_properties(
        topic: impl Into<String>,
        properties: KafkaProperties,
    ) -> Result<Self, ConnectorError> {
        let cfg = Self::new(topic, properties);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads connection settings through a [`Configurator`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the connection settings are missing or
    /// invalid.
    pub fn from_configurator(
        topic: impl Into<String>,
        conf: &Configurator,
    ) -> Result<Self, ConnectorError> {
        let properties = KafkaProperties::from_configurator(conf)?;
        Self::from_properties(topic, properties)
    }

    /// Sets the key serializer.
    #[must_use]
    pub fn with_key_serializer(mut self, serializer: SerializeFn) -> Self {
        self.key_serializer = serializer;
        self
    }

    /// Sets the value serializer.
    #[must_use]
    pub fn with_value_serializer(mut self, serializer: SerializeFn) -> Self {
        self.value_serializer = serializer;
        self
    }

    /// Sets the wait between retries on a full buffer.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Broker list, or an empty string if none is configured.
    #[must_use]
    pub fn brokers(&self) -> &str {
        self.properties.brokers().unwrap_or_default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.topic.trim().is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "topic cannot be empty".into(),
            ));
        }
        if self.brokers().is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "bootstrap.servers cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Builds an rdkafka [`ClientConfig`] from this configuration.
    #[cfg(feature = "kafka")]
    #[must_use]
    pub fn to_rdkafka_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        for (key, value) in self.properties.iter() {
            config.set(key, value);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;

    fn props(extra: &[(&str, &str)]) -> KafkaProperties {
        let mut props = KafkaProperties::with_brokers("localhost:9092");
        for (k, v) in extra {
            props.set(*k, *v);
        }
        props
    }

    #[test]
    fn test_offset_reset_parse() {
        assert_eq!("earliest".parse::<OffsetReset>().unwrap(), OffsetReset::Earliest);
        assert_eq!("smallest".parse::<OffsetReset>().unwrap(), OffsetReset::Earliest);
        assert_eq!("LARGEST".parse::<OffsetReset>().unwrap(), OffsetReset::Latest);
        assert_eq!("beginning".parse::<OffsetReset>().unwrap(), OffsetReset::Beginning);
        assert_eq!("end".parse::<OffsetReset>().unwrap(), OffsetReset::End);
        assert!("sideways".parse::<OffsetReset>().is_err());
    }

    #[test]
    fn test_offset_reset_seek_target() {
        assert_eq!(OffsetReset::Earliest.seek_target(), None);
        assert_eq!(OffsetReset::Latest.seek_target(), None);
        assert_eq!(OffsetReset::Beginning.seek_target(), Some(SeekTarget::Beginning));
        assert_eq!(OffsetReset::End.seek_target(), Some(SeekTarget::End));
    }

    #[test]
    fn test_source_defaults() {
        let cfg = KafkaSourceConfig::new("knowledge", props(&[]));
        assert_eq!(cfg.topic, "knowledge");
        assert_eq!(cfg.brokers(), "localhost:9092");
        assert_eq!(cfg.group_id, None);
        assert_eq!(cfg.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(cfg.commit_interval, 10_000);
        assert_eq!(cfg.poll_timeout, Duration::from_secs(1));
        assert_eq!(
            (cfg.value_deserializer)(b"hello").unwrap(),
            Payload::Text("hello".into())
        );
        assert!(cfg.origin().file().ends_with("config.rs"));
    }

    #[test]
    fn test_source_from_properties_lifts_typed_fields() {
        let cfg = KafkaSourceConfig::from_properties(
            "knowledge",
            props(&[("group.id", "mapper"), ("auto.offset.reset", "beginning")]),
        )
        .unwrap();
        assert_eq!(cfg.group_id.as_deref(), Some("mapper"));
        assert_eq!(cfg.auto_offset_reset, OffsetReset::Beginning);
        assert_eq!(cfg.properties.get("group.id"), None);
        assert_eq!(cfg.resolve_group_id(), "mapper");
    }

    #[test]
    fn test_source_blank_group_id_is_generated() {
        let cfg =
            KafkaSourceConfig::from_properties("knowledge", props(&[("group.id", "  ")])).unwrap();
        assert_eq!(cfg.group_id, None);
        let generated = cfg.resolve_group_id();
        assert_eq!(generated, cfg.resolve_group_id());
        let (_, hash) = generated.rsplit_once('_').unwrap();
        assert_eq!(hash.len(), 10);
    }

    #[test]
    fn test_source_validate() {
        assert!(KafkaSourceConfig::from_properties("", props(&[])).is_err());
        assert!(KafkaSourceConfig::from_properties("t", KafkaProperties::new()).is_err());
        let cfg = KafkaSourceConfig::new("t", props(&[])).with_commit_interval(0);
        assert!(cfg.validate().is_err());
        let cfg = KafkaSourceConfig::new("t", props(&[])).with_poll_timeout(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_source_invalid_reset() {
        let err = KafkaSourceConfig::from_properties("t", props(&[("auto.offset.reset", "x")]))
            .unwrap_err();
        assert!(err.to_string().contains("auto.offset.reset"));
    }

    #[test]
    fn test_sink_strips_consumer_settings() {
        let cfg = KafkaSinkConfig::new(
            "out",
            props(&[("auto.offset.reset", "earliest"), ("enable.auto.commit", "false")]),
        );
        assert_eq!(cfg.properties.get("auto.offset.reset"), None);
        assert_eq!(cfg.properties.get("enable.auto.commit"), None);
        assert_eq!(cfg.brokers(), "localhost:9092");
        assert_eq!(cfg.retry_backoff, Duration::from_secs(1));
        assert_eq!(cfg.flush_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_sink_validate() {
        assert!(KafkaSinkConfig::from_properties("out", props(&[])).is_ok());
        assert!(KafkaSinkConfig::from_properties(" ", props(&[])).is_err());
        assert!(KafkaSinkConfig::from_properties("out", KafkaProperties::new()).is_err());
    }

    #[cfg(feature = "kafka")]
    #[test]
    fn test_source_rdkafka_config() {
        let cfg = KafkaSourceConfig::new("t", props(&[("enable.auto.commit", "true")]))
            .with_offset_reset(OffsetReset::Latest);
        let rd = cfg.to_rdkafka_config("group-a");
        assert_eq!(rd.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(rd.get("group.id"), Some("group-a"));
        assert_eq!(rd.get("auto.offset.reset"), Some("latest"));
        assert_eq!(rd.get("enable.auto.commit"), Some("true"));
    }
}

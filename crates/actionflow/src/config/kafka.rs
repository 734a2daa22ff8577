//! Kafka connection settings.
//!
//! Connection properties are assembled from two independent choices:
//!
//! - `KAFKA_CONFIG_MODE` selects where broker settings come from: `plain`
//!   reads `BOOTSTRAP_SERVERS`, `file` reads a `key=value` properties file
//!   named by `KAFKA_CONFIG_FILE_PATH`.
//! - `KAFKA_AUTH_MODE` layers authentication on top: `plain` adds nothing,
//!   `ssl` adds client certificate settings, `sasl` adds SCRAM credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::Configurator;
use crate::error::{ConfigError, ConnectorError};

/// Where broker connection settings are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KafkaConfigMode {
    /// `BOOTSTRAP_SERVERS` only.
    #[default]
    Plain,
    /// A librdkafka properties file.
    File,
}

impl KafkaConfigMode {
    const VALID: &'static str = "plain, file";
}

impl FromStr for KafkaConfigMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "file" => Ok(Self::File),
            other => Err(ConfigError::UnknownMode {
                kind: "config",
                mode: other.to_string(),
                valid: Self::VALID.to_string(),
            }),
        }
    }
}

/// How the client authenticates to the brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KafkaAuthMode {
    /// No authentication.
    #[default]
    Plain,
    /// Mutual TLS.
    Ssl,
    /// SASL SCRAM-SHA-256 over TLS.
    Sasl,
}

impl KafkaAuthMode {
    const VALID: &'static str = "plain, ssl, sasl";
}

impl FromStr for KafkaAuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "ssl" => Ok(Self::Ssl),
            "sasl" => Ok(Self::Sasl),
            other => Err(ConfigError::UnknownMode {
                kind: "auth",
                mode: other.to_string(),
                valid: Self::VALID.to_string(),
            }),
        }
    }
}

/// Client properties passed to the Kafka client library.
///
/// Keys are librdkafka property names such as `bootstrap.servers`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KafkaProperties {
    properties: BTreeMap<String, String>,
}

impl KafkaProperties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a property set pointing at the given brokers.
    #[must_use]
    pub fn with_brokers(brokers: impl Into<String>) -> Self {
        let mut props = Self::new();
        props.set("bootstrap.servers", brokers);
        props
    }

    /// Reads connection and authentication settings from a configurator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unknown modes, missing required keys or an
    /// unreadable properties file.
    pub fn from_configurator(conf: &Configurator) -> Result<Self, ConfigError> {
        let config_mode: KafkaConfigMode = conf
            .get("KAFKA_CONFIG_MODE")
            .with_default("plain")
            .converted(str::parse)?
            .unwrap_or_default();
        let auth_mode: KafkaAuthMode = conf
            .get("KAFKA_AUTH_MODE")
            .with_default("plain")
            .converted(str::parse)?
            .unwrap_or_default();

        let mut props = match config_mode {
            KafkaConfigMode::Plain => Self::with_brokers(
                conf.get("BOOTSTRAP_SERVERS")
                    .description("Kafka bootstrap servers")
                    .require()?,
            ),
            KafkaConfigMode::File => {
                let path = conf.get("KAFKA_CONFIG_FILE_PATH").require()?;
                Self::from_file(path)?
            }
        };
        props.extend(auth_properties(conf, auth_mode)?);
        Ok(props)
    }

    /// Reads a `key=value` properties file.
    ///
    /// Blank lines and lines starting with `#` are ignored. Whitespace
    /// around keys and values is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::File`] if the file cannot be read or a line
    /// has no `=`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_err = |message: String| ConfigError::File {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        let mut props = Self::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (k, v) = line
                .split_once('=')
                .ok_or_else(|| file_err(format!("line {} is not key=value", n + 1)))?;
            props.set(k.trim(), v.trim());
        }
        Ok(props)
    }

    /// Sets a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Removes a property, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    /// Gets a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Gets a required property.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::MissingConfig` if the key is not set.
    pub fn require(&self, key: &str) -> Result<&str, ConnectorError> {
        self.get(key)
            .ok_or_else(|| ConnectorError::MissingConfig(key.to_string()))
    }

    /// Gets a property parsed as the given type.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if the value cannot be parsed.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConnectorError>
    where
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|v| {
                v.parse::<T>().map_err(|e| {
                    ConnectorError::ConfigurationError(format!("invalid value for '{key}': {e}"))
                })
            })
            .transpose()
    }

    /// Returns properties with a given prefix, with the prefix stripped.
    #[must_use]
    pub fn properties_with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect()
    }

    /// Broker list, from `bootstrap.servers` or `metadata.broker.list`.
    #[must_use]
    pub fn brokers(&self) -> Option<&str> {
        self.get("bootstrap.servers")
            .or_else(|| self.get("metadata.broker.list"))
    }

    /// Iterates over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Extend<(String, String)> for KafkaProperties {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.properties.extend(iter);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KafkaProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn auth_properties(
    conf: &Configurator,
    mode: KafkaAuthMode,
) -> Result<Vec<(String, String)>, ConfigError> {
    let verify = || -> Result<String, ConfigError> {
        let verify = conf
            .get("ENABLE_SSL_CERTIFICATE_VERIFICATION")
            .with_default("true")
            .boolean()?
            .unwrap_or(true);
        Ok(verify.to_string())
    };
    let props: Vec<(&str, String)> = match mode {
        KafkaAuthMode::Plain => Vec::new(),
        KafkaAuthMode::Ssl => vec![
            ("metadata.broker.list", conf.get("BOOTSTRAP_SERVERS").require()?),
            ("security.protocol", "SSL".to_string()),
            ("ssl.ca.location", conf.get("SSL_CA_LOCATION").require()?),
            (
                "ssl.certificate.location",
                conf.get("SSL_CERTIFICATE_LOCATION").require()?,
            ),
            ("ssl.key.location", conf.get("SSL_KEY_LOCATION").require()?),
            ("ssl.key.password", conf.get("SSL_KEY_PASSWORD").require()?),
            ("enable.ssl.certificate.verification", verify()?),
        ],
        KafkaAuthMode::Sasl => vec![
            ("security.protocol", "SASL_SSL".to_string()),
            ("sasl.mechanisms", "SCRAM-SHA-256".to_string()),
            ("sasl.username", conf.get("SASL_USER_NAME").require()?),
            ("sasl.password", conf.get("SASL_PASSWORD").require()?),
            ("enable.ssl.certificate.verification", verify()?),
        ],
    };
    Ok(props
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect())
}

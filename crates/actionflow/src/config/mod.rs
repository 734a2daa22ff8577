//! Configuration lookup.
//!
//! Provides a small layer over raw string configuration:
//! - [`ConfigSource`]: where raw values come from (process environment or an
//!   in-memory map)
//! - [`Configurator`]: typed lookups with defaults, required keys and an
//!   [`OnError`] policy
//! - [`PipelineSettings`]: the framework-wide switches read by actions
//! - [`kafka`]: broker connection and authentication modes

pub mod kafka;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::ConfigError;

/// A provider of raw configuration values.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Returns the raw value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads configuration from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentSource;

impl ConfigSource for EnvironmentSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Reads configuration from an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value, returning the source for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// What to do when a configuration lookup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// Return the error to the caller.
    #[default]
    RaiseError,
    /// Log the error and terminate the process with the configurator's exit code.
    Exit,
}

/// Typed access to a [`ConfigSource`].
#[derive(Debug, Clone)]
pub struct Configurator {
    source: Arc<dyn ConfigSource>,
    exit_code: i32,
}

impl Default for Configurator {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Configurator {
    /// Creates a configurator over the given source.
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        let source: Arc<dyn ConfigSource> = Arc::new(source);
        debug!(source = ?source, "configuration source selected");
        Self {
            source,
            exit_code: 1,
        }
    }

    /// Creates a configurator over the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(EnvironmentSource)
    }

    /// Sets the exit code used by [`OnError::Exit`].
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.source.get(key)
    }

    /// Starts a lookup of `key`.
    ///
    /// ```
    /// use actionflow::config::{Configurator, MapSource};
    ///
    /// let conf = Configurator::new(MapSource::new().with("BATCH", "50"));
    /// let batch: Option<u64> = conf.get("BATCH").with_default("10").parsed().unwrap();
    /// assert_eq!(batch, Some(50));
    /// ```
    #[must_use]
    pub fn get<'a>(&'a self, key: &'a str) -> ConfigRequest<'a> {
        ConfigRequest {
            configurator: self,
            key,
            default: None,
            required: false,
            description: None,
            on_error: OnError::RaiseError,
        }
    }
}

/// A pending configuration lookup, built with [`Configurator::get`].
#[derive(Debug)]
#[must_use = "a ConfigRequest does nothing until a terminal method is called"]
pub struct ConfigRequest<'a> {
    configurator: &'a Configurator,
    key: &'a str,
    default: Option<String>,
    required: bool,
    description: Option<String>,
    on_error: OnError,
}

impl ConfigRequest<'_> {
    /// Value used when the source has none.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Marks the key as required: a missing value with no default is an error.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Human description included in error messages.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the failure policy.
    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Returns the raw string value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the key is required and unset.
    pub fn value(self) -> Result<Option<String>, ConfigError> {
        self.converted(|raw| Ok::<_, std::convert::Infallible>(raw.to_string()))
    }

    /// Returns the value, treating absence as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the key is unset and has no default.
    pub fn require(self) -> Result<String, ConfigError> {
        let key = self.key.to_string();
        let description = self.description.clone();
        self.required()
            .value()?
            .ok_or(ConfigError::Missing { key, description })
    }

    /// Returns the value parsed with [`FromStr`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conversion`] if parsing fails, or
    /// [`ConfigError::Missing`] for an unset required key.
    pub fn parsed<T>(self) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.converted(str::parse::<T>)
    }

    /// Returns the value parsed with `true`/`false` semantics.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conversion`] for anything other than
    /// `true` or `false` (any case).
    pub fn boolean(self) -> Result<Option<bool>, ConfigError> {
        self.converted(string_to_bool)
    }

    /// Returns the value converted by `converter`.
    ///
    /// The default, when used, goes through the converter as well.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conversion`] if the converter fails, or
    /// [`ConfigError::Missing`] for an unset required key.
    pub fn converted<T, E, F>(self, converter: F) -> Result<Option<T>, ConfigError>
    where
        F: FnOnce(&str) -> Result<T, E>,
        E: fmt::Display,
    {
        let raw = self.configurator.raw(self.key);
        debug!(key = self.key, raw = ?raw, "configuration lookup");
        let Some(raw) = raw.or(self.default) else {
            if self.required {
                return self.configurator.fail(
                    ConfigError::Missing {
                        key: self.key.to_string(),
                        description: self.description,
                    },
                    self.on_error,
                );
            }
            return Ok(None);
        };
        match converter(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => self.configurator.fail(
                ConfigError::Conversion {
                    key: self.key.to_string(),
                    raw,
                    message: e.to_string(),
                },
                self.on_error,
            ),
        }
    }
}

impl Configurator {
    fn fail<T>(&self, err: ConfigError, on_error: OnError) -> Result<T, ConfigError> {
        match on_error {
            OnError::RaiseError => Err(err),
            OnError::Exit => {
                error!(error = %err, exit_code = self.exit_code, "fatal configuration error");
                std::process::exit(self.exit_code)
            }
        }
    }
}

/// Parses `true` or `false`, ignoring case.
///
/// # Errors
///
/// Returns a message for any other input.
pub fn string_to_bool(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err("raw value must be 'true' or 'false'".to_string())
    }
}

/// Default topic for heartbeats.
pub const DEFAULT_HEARTBEAT_TOPIC: &str = "provenance.live";
/// Default topic for error records.
pub const DEFAULT_ERROR_TOPIC: &str = "provenance.errors";
/// Default file for the file error handler.
pub const DEFAULT_ERROR_FILE: &str = "errors.log";
/// Default topic for data catalog updates.
pub const DEFAULT_CATALOG_TOPIC: &str = "catalog";

/// Framework-wide switches that change how actions behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Provision a dead-letter sink for Kafka sources automatically.
    pub auto_enable_dlq: bool,
    /// Stop copying the inbound `Security-Label` onto outputs.
    pub disable_persistent_headers: bool,
    /// Topic heartbeats are written to.
    pub heartbeat_topic: String,
    /// Topic error records are written to.
    pub error_topic: String,
    /// File error records are appended to.
    pub error_file_path: String,
    /// Topic data catalog records are written to.
    pub catalog_topic: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_enable_dlq: false,
            disable_persistent_headers: false,
            heartbeat_topic: DEFAULT_HEARTBEAT_TOPIC.to_string(),
            error_topic: DEFAULT_ERROR_TOPIC.to_string(),
            error_file_path: DEFAULT_ERROR_FILE.to_string(),
            catalog_topic: DEFAULT_CATALOG_TOPIC.to_string(),
        }
    }
}

impl PipelineSettings {
    /// Reads the settings from a configurator.
    ///
    /// | Key | Default |
    /// |-----|---------|
    /// | `AUTO_ENABLE_DLQ` | `false` |
    /// | `DISABLE_PERSISTENT_HEADERS` | unset (`1` disables) |
    /// | `HEART_BEAT_PROVENANCE_TOPIC` | `provenance.live` |
    /// | `ERROR_HANDLER_PROVENANCE_TOPIC` | `provenance.errors` |
    /// | `ERROR_HANDLER_FILE_PATH` | `errors.log` |
    /// | `DATA_CATALOG_TOPIC` | `catalog` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conversion`] if `AUTO_ENABLE_DLQ` is not a boolean.
    pub fn load(conf: &Configurator) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |key: &str, default: String| -> Result<String, ConfigError> {
            Ok(conf.get(key).value()?.unwrap_or(default))
        };
        Ok(Self {
            auto_enable_dlq: conf
                .get("AUTO_ENABLE_DLQ")
                .with_default("false")
                .boolean()?
                .unwrap_or(false),
            disable_persistent_headers: conf
                .get("DISABLE_PERSISTENT_HEADERS")
                .value()?
                .is_some_and(|v| v == "1"),
            heartbeat_topic: text("HEART_BEAT_PROVENANCE_TOPIC", defaults.heartbeat_topic)?,
            error_topic: text("ERROR_HANDLER_PROVENANCE_TOPIC", defaults.error_topic)?,
            error_file_path: text("ERROR_HANDLER_FILE_PATH", defaults.error_file_path)?,
            catalog_topic: text("DATA_CATALOG_TOPIC", defaults.catalog_topic)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> Configurator {
        Configurator::new(
            MapSource::new()
                .with("SOURCE_TOPIC", "knowledge")
                .with("BATCH", "250")
                .with("BAD_NUMBER", "lots")
                .with("FLAG", "TRUE"),
        )
    }

    #[test]
    fn test_get_value_and_default() {
        let c = conf();
        assert_eq!(c.get("SOURCE_TOPIC").value().unwrap().as_deref(), Some("knowledge"));
        assert_eq!(c.get("MISSING").value().unwrap(), None);
        assert_eq!(
            c.get("MISSING").with_default("x").value().unwrap().as_deref(),
            Some("x")
        );
    }

    #[test]
    fn test_required_missing() {
        let err = conf()
            .get("TARGET_TOPIC")
            .required()
            .description("Topic to write to")
            .value()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Required Configuration Key TARGET_TOPIC is not set.  Topic to write to"
        );
    }

    #[test]
    fn test_required_satisfied_by_default() {
        let v = conf().get("TARGET_TOPIC").with_default("out").require().unwrap();
        assert_eq!(v, "out");
        assert!(conf().get("TARGET_TOPIC").require().is_err());
    }

    #[test]
    fn test_parsed() {
        let c = conf();
        let batch: Option<u64> = c.get("BATCH").parsed().unwrap();
        assert_eq!(batch, Some(250));
        let bad: Result<Option<u64>, _> = c.get("BAD_NUMBER").parsed();
        assert!(matches!(bad, Err(ConfigError::Conversion { .. })));
    }

    #[test]
    fn test_default_goes_through_converter() {
        let v: Option<u32> = conf().get("MISSING").with_default("7").parsed().unwrap();
        assert_eq!(v, Some(7));
    }

    #[test]
    fn test_boolean() {
        assert_eq!(conf().get("FLAG").boolean().unwrap(), Some(true));
        assert!(conf().get("SOURCE_TOPIC").boolean().is_err());
    }

    #[test]
    fn test_string_to_bool() {
        assert_eq!(string_to_bool("False"), Ok(false));
        assert_eq!(string_to_bool("true"), Ok(true));
        assert!(string_to_bool("yes").is_err());
    }

    #[test]
    fn test_pipeline_settings_defaults() {
        let settings = PipelineSettings::load(&Configurator::new(MapSource::new())).unwrap();
        assert_eq!(settings, PipelineSettings::default());
        assert_eq!(settings.heartbeat_topic, "provenance.live");
    }

    #[test]
    fn test_pipeline_settings_overrides() {
        let source: MapSource = [
            ("AUTO_ENABLE_DLQ", "true"),
            ("DISABLE_PERSISTENT_HEADERS", "1"),
            ("DATA_CATALOG_TOPIC", "datasets"),
        ]
        .into_iter()
        .collect();
        let settings = PipelineSettings::load(&Configurator::new(source)).unwrap();
        assert!(settings.auto_enable_dlq);
        assert!(settings.disable_persistent_headers);
        assert_eq!(settings.catalog_topic, "datasets");
    }

    #[test]
    fn test_pipeline_settings_rejects_bad_bool() {
        let source = MapSource::new().with("AUTO_ENABLE_DLQ", "maybe");
        assert!(PipelineSettings::load(&Configurator::new(source)).is_err());
    }
}

//! actionflow runner
//!
//! Runs a mapper from one Kafka topic to another. Connection settings,
//! error handling and heartbeats are configured from the environment.

use std::sync::Arc;

use actionflow::config::kafka::KafkaProperties;
use actionflow::config::{Configurator, PipelineSettings};
use actionflow::errors::ErrorHandlerKind;
use actionflow::kafka::{
    KafkaSink, KafkaSinkConfig, KafkaSource, KafkaSourceConfig, RdKafkaClientFactory,
};
use actionflow::serde::Format;
use actionflow::{ActionError, ActionOptions, KafkaContext, MapOutput, Mapper, Record};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Map records from one Kafka topic to another
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topic to read from
    #[arg(long, env = "SOURCE_TOPIC")]
    source_topic: String,

    /// Topic to write to
    #[arg(long, env = "TARGET_TOPIC")]
    target_topic: String,

    /// Action name, used as its id
    #[arg(long, env = "ACTION_NAME")]
    name: Option<String>,

    /// Wire format of record values (text, raw, json, zlib)
    #[arg(long, env = "VALUE_FORMAT", default_value = "text")]
    value_format: Format,

    /// Transform applied to each record
    #[arg(long, value_enum, default_value_t = Transform::Identity)]
    transform: Transform,

    /// Records between progress lines
    #[arg(long, env = "REPORTING_BATCH_SIZE", default_value_t = actionflow::action::DEFAULT_REPORTING_BATCH_SIZE)]
    reporting_batch_size: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transform {
    /// Pass records through unchanged.
    Identity,
    /// Upper-case text values.
    Uppercase,
    /// Dead-letter values that are not JSON documents.
    JsonCheck,
}

impl Transform {
    fn apply(self, record: Record) -> Result<MapOutput, ActionError> {
        match self {
            Transform::Identity => Ok(record.into()),
            Transform::Uppercase => {
                let upper = record
                    .value()
                    .and_then(|v| v.as_text())
                    .map(|t| t.to_uppercase());
                Ok(record.with_key_value(record.key().cloned(), upper).into())
            }
            Transform::JsonCheck => {
                let parsed = record
                    .value()
                    .map(|v| serde_json::from_slice::<serde_json::Value>(&v.to_bytes()));
                match parsed {
                    Some(Ok(_)) => Ok(record.into()),
                    Some(Err(e)) => Err(ActionError::dead_letter(format!("invalid JSON: {e}"))),
                    None => Err(ActionError::dead_letter("record has no value")),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("actionflow={0},actionflow_runner={0}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting actionflow runner");

    let conf = Configurator::from_env();
    let settings = PipelineSettings::load(&conf).context("invalid pipeline settings")?;
    let properties = KafkaProperties::from_configurator(&conf).context("invalid Kafka settings")?;
    let error_handler = match conf.get("ERROR_HANDLER_TYPE").value()? {
        Some(raw) => raw.parse::<ErrorHandlerKind>()?,
        None => ErrorHandlerKind::default(),
    };

    let source = KafkaSource::with_factory(
        KafkaSourceConfig::from_properties(&args.source_topic, properties.clone())?
            .with_value_deserializer(args.value_format.deserializer()),
        &RdKafkaClientFactory,
    )?;
    let sink = KafkaSink::with_factory(
        KafkaSinkConfig::new(&args.target_topic, properties.clone())
            .with_value_serializer(args.value_format.serializer()),
        &RdKafkaClientFactory,
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after the current record");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "unable to listen for interrupt"),
        }
    });

    let mut options = ActionOptions::new()
        .with_settings(settings)
        .with_error_handler_kind(error_handler)
        .with_reporting_batch_size(args.reporting_batch_size)
        .with_kafka(KafkaContext::new(properties, Arc::new(RdKafkaClientFactory)))
        .with_shutdown(shutdown_rx);
    if let Some(name) = args.name {
        options = options.with_name(name);
    }

    let transform = args.transform;
    let mut mapper = Mapper::new(source, sink, move |r: Record| transform.apply(r), options)?;
    if let Err(e) = mapper.run().await {
        error!(error = %e, action = %mapper.action().id(), "pipeline failed");
        return Err(e.into());
    }
    Ok(())
}

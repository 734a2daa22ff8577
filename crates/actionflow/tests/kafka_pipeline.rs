//! Pipelines reading from and writing to an in-memory Kafka cluster.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use actionflow::config::kafka::KafkaProperties;
use actionflow::config::PipelineSettings;
use actionflow::connector::DataSource;
use actionflow::engine::headers::REQUEST_ID_HEADER;
use actionflow::kafka::{
    ConsumedMessage, KafkaSink, KafkaSinkConfig, KafkaSource, KafkaSourceConfig, OffsetReset,
    TopicPartition,
};
use actionflow::testing::MockCluster;
use actionflow::{ActionError, ActionOptions, KafkaContext, MapOutput, Mapper, Payload, Record};

const GROUP: &str = "pipeline-test";

fn properties() -> KafkaProperties {
    KafkaProperties::with_brokers("mock:9092")
}

fn source(cluster: &MockCluster, topic: &str, reset: OffsetReset) -> KafkaSource {
    let config = KafkaSourceConfig::new(topic, properties())
        .with_group_id(GROUP)
        .with_offset_reset(reset)
        .with_poll_timeout(Duration::from_millis(10));
    KafkaSource::with_factory(config, cluster).unwrap()
}

fn sink(cluster: &MockCluster, topic: &str) -> KafkaSink {
    let config =
        KafkaSinkConfig::new(topic, properties()).with_retry_backoff(Duration::from_millis(1));
    KafkaSink::with_factory(config, cluster).unwrap()
}

fn header(message: &ConsumedMessage, key: &str) -> Option<String> {
    message
        .headers
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.as_ref())
        .map(|v| String::from_utf8_lossy(v).into_owned())
}

fn value(record: &Record) -> String {
    record.value().map(ToString::to_string).unwrap_or_default()
}

// ── Scenario 1: Mapper over Kafka ──

#[tokio::test]
async fn test_mapper_between_topics() {
    let cluster = MockCluster::new();
    cluster.create_topic("knowledge", 2);
    for i in 0..10 {
        let partition = i % 2;
        let payload = if i == 7 { "bad".to_string() } else { format!("doc {i}") };
        cluster.produce("knowledge", partition, Some(i.to_string()), payload);
    }

    let (tx, rx) = tokio::sync::watch::channel(false);
    let mut seen = 0;
    let settings = PipelineSettings {
        auto_enable_dlq: true,
        ..PipelineSettings::default()
    };
    let kafka = KafkaContext::new(properties(), Arc::new(cluster.clone()));
    let mut mapper = Mapper::new(
        source(&cluster, "knowledge", OffsetReset::Earliest),
        sink(&cluster, "knowledge.out"),
        move |r: Record| -> Result<MapOutput, ActionError> {
            seen += 1;
            if seen == 10 {
                let _ = tx.send(true);
            }
            if value(&r) == "bad" {
                return Err(ActionError::dead_letter("unparseable document"));
            }
            Ok(r.with_key_value(r.key().cloned(), value(&r).to_uppercase()).into())
        },
        ActionOptions::new()
            .with_name("upper")
            .with_settings(settings)
            .with_kafka(kafka)
            .with_shutdown(rx),
    )
    .unwrap();
    assert!(mapper.action().has_dlq_target());

    mapper.run().await.unwrap();

    let out = cluster.messages("knowledge.out");
    assert_eq!(out.len(), 9);
    assert!(out
        .iter()
        .all(|m| m.payload.as_deref().is_some_and(|p| p.starts_with(b"DOC "))));
    let ids: BTreeSet<String> = out
        .iter()
        .filter_map(|m| header(m, REQUEST_ID_HEADER))
        .collect();
    assert_eq!(ids.len(), 9);
    assert!(ids.iter().all(|id| id.starts_with("knowledge.out:")));

    let dead = cluster.messages("knowledge.dlq");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload.as_deref(), Some(&b"bad"[..]));

    // Positions are committed when the source closes.
    for partition in 0..2 {
        let tp = TopicPartition::new("knowledge", partition);
        assert_eq!(cluster.committed(GROUP, &tp), Some(5));
    }

    let heartbeats = cluster.messages("provenance.live");
    let statuses: Vec<String> = heartbeats
        .iter()
        .map(|m| {
            let body: serde_json::Value =
                serde_json::from_slice(m.payload.as_deref().unwrap()).unwrap();
            body["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(statuses.first().map(String::as_str), Some("STARTED"));
    assert_eq!(statuses.last().map(String::as_str), Some("TERMINATED"));
}

#[tokio::test]
async fn test_missing_topic_aborts_run() {
    let cluster = MockCluster::new();
    let mut mapper = Mapper::new(
        source(&cluster, "absent", OffsetReset::Earliest),
        sink(&cluster, "absent.out"),
        |r: Record| -> Result<MapOutput, ActionError> { Ok(r.into()) },
        ActionOptions::new(),
    )
    .unwrap();
    let err = mapper.run().await.unwrap_err();
    assert_eq!(err.kind(), "SourceNotFound");
    assert_eq!(
        err.to_string(),
        "Source absent not found on the specified bootstrap server, are you sure this source exists?"
    );
}

// ── Scenario 2: Rebalance and seek ──

#[tokio::test]
async fn test_seek_once_per_partition_across_rebalances() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);
    for p in 0..2 {
        for i in 0..3 {
            cluster.produce("events", p, None::<String>, format!("p{p}-{i}"));
        }
    }
    // A committed position that the beginning policy overrides.
    cluster.commit(GROUP, &TopicPartition::new("events", 0), 2);

    let mut src = source(&cluster, "events", OffsetReset::Beginning);
    let mut values = BTreeSet::new();
    values.insert(value(&src.next_record().await.unwrap().unwrap()));
    // Seeked positions are committed as soon as the seek is done, ahead of
    // the regular commit interval.
    for p in 0..2 {
        assert_eq!(
            cluster.committed(GROUP, &TopicPartition::new("events", p)),
            Some(0)
        );
    }
    for _ in 1..6 {
        values.insert(value(&src.next_record().await.unwrap().unwrap()));
    }
    assert_eq!(values.len(), 6);
    assert_eq!(src.metrics().snapshot().seeks, 2);

    // Same partitions again, no revocation in between: no re-seek.
    cluster.rebalance(
        GROUP,
        &[TopicPartition::new("events", 0), TopicPartition::new("events", 1)],
    );
    cluster.produce("events", 1, None::<String>, "late");
    let record = src.next_record().await.unwrap().unwrap();
    assert_eq!(record.value(), Some(&Payload::Text("late".into())));
    assert_eq!(src.metrics().snapshot().seeks, 2);

    // A partition never seen before is read from its earliest offset.
    cluster.create_topic("events", 3);
    cluster.produce("events", 2, None::<String>, "p2-0");
    cluster.produce("events", 2, None::<String>, "p2-1");
    cluster.rebalance(
        GROUP,
        &[
            TopicPartition::new("events", 0),
            TopicPartition::new("events", 1),
            TopicPartition::new("events", 2),
        ],
    );
    let record = src.next_record().await.unwrap().unwrap();
    assert_eq!(record.value(), Some(&Payload::Text("p2-0".into())));
    assert_eq!(record.raw().unwrap().partition, 2);
    assert_eq!(src.metrics().snapshot().seeks, 3);
    assert_eq!(
        cluster.committed(GROUP, &TopicPartition::new("events", 2)),
        Some(0)
    );

    src.close().await.unwrap();
}

#[tokio::test]
async fn test_revoked_partition_positions_are_committed() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);
    for p in 0..2 {
        for i in 0..4 {
            cluster.produce("events", p, None::<String>, format!("p{p}-{i}"));
        }
    }

    let mut src = source(&cluster, "events", OffsetReset::Earliest);
    for _ in 0..4 {
        src.next_record().await.unwrap();
    }
    cluster.rebalance(GROUP, &[TopicPartition::new("events", 0)]);
    let record = src.next_record().await.unwrap().unwrap();
    assert_eq!(record.raw().unwrap().partition, 0);

    // Round-robin reads took two records from each partition.
    assert_eq!(
        cluster.committed(GROUP, &TopicPartition::new("events", 1)),
        Some(2)
    );
    src.close().await.unwrap();
}

// ── Scenario 3: Lag and backpressure ──

#[tokio::test]
async fn test_remaining_falls_to_zero() {
    let cluster = MockCluster::new();
    cluster.create_topic("events", 2);
    for i in 0..6 {
        cluster.produce("events", i % 2, None::<String>, format!("v{i}"));
    }

    let mut src = source(&cluster, "events", OffsetReset::Earliest);
    let mut last = u64::MAX;
    for _ in 0..6 {
        src.next_record().await.unwrap();
        let remaining = src.remaining().await.unwrap();
        assert!(remaining <= last);
        last = remaining;
    }
    assert_eq!(last, 0);
    src.close().await.unwrap();
    assert_eq!(src.remaining().await, Some(0));
}

#[tokio::test]
async fn test_full_producer_buffer_delays_but_delivers() {
    let cluster = MockCluster::new();
    cluster.fail_next_sends(3);

    let input: actionflow::memory::ListSource = (0..4)
        .map(|i| Record::new(Vec::new(), None::<String>, format!("r{i}")))
        .collect();
    let mut mapper = Mapper::new(
        input,
        sink(&cluster, "out"),
        |r: Record| -> Result<MapOutput, ActionError> { Ok(r.into()) },
        ActionOptions::new(),
    )
    .unwrap();
    mapper.run().await.unwrap();

    let payloads: Vec<Vec<u8>> = cluster
        .messages("out")
        .into_iter()
        .filter_map(|m| m.payload.map(|p| p.to_vec()))
        .collect();
    assert_eq!(
        payloads,
        vec![b"r0".to_vec(), b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()]
    );
}

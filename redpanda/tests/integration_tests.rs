//! Integration tests for [`RedpandaStreamLog`] against a real broker.
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p actionstream-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use actionstream_core::{LogConsumer, LogRecord, StreamLog};
use actionstream_redpanda::RedpandaStreamLog;
use actionstream_testing::fixtures;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn stream_log(brokers: &str, topic: &str, group: &str) -> RedpandaStreamLog {
    RedpandaStreamLog::builder()
        .brokers(brokers)
        .topic(topic)
        .consumer_group(group)
        .build()
        .expect("Failed to create stream log")
}

/// Append until the topic is auto-created and the broker acknowledges.
async fn wait_for_topic(log: &RedpandaStreamLog) {
    for attempt in 1..=60 {
        if log.append("warmup".to_string(), b"warmup".to_vec()).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Topic {} never became writable", log.topic());
    }
}

async fn next_envelope(consumer: &mut Box<dyn LogConsumer>) -> LogRecord {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let record = consumer
                .next()
                .await
                .expect("consumer closed")
                .expect("receive failed");
            if record.payload != b"warmup" {
                return record;
            }
            consumer.commit(record.position()).await.expect("commit warmup");
        }
    })
    .await
    .expect("Timeout waiting for record")
}

#[tokio::test]
#[ignore]
async fn appended_envelope_is_consumed_with_its_key() {
    let (_kafka, brokers) = start_kafka().await;
    let log = stream_log(&brokers, "envelopes-roundtrip", "roundtrip-group");
    wait_for_topic(&log).await;

    let envelope = fixtures::envelope(7, "click");
    let receipt = log
        .append(envelope.partition_key(), envelope.to_bytes().unwrap())
        .await
        .expect("append");

    let mut consumer = log.subscribe().await.expect("subscribe");
    let record = next_envelope(&mut consumer).await;

    assert_eq!(record.key.as_deref(), Some("7"));
    assert_eq!(record.partition, receipt.partition);
    assert_eq!(record.offset, receipt.offset);
    assert_eq!(record.payload, envelope.to_bytes().unwrap());
}

#[tokio::test]
#[ignore]
async fn uncommitted_record_is_redelivered_to_next_consumer() {
    let (_kafka, brokers) = start_kafka().await;
    let log = stream_log(&brokers, "envelopes-redelivery", "redelivery-group");
    wait_for_topic(&log).await;

    let envelope = fixtures::envelope(3, "view");
    log.append(envelope.partition_key(), envelope.to_bytes().unwrap())
        .await
        .expect("append");

    let first = {
        let mut consumer = log.subscribe().await.expect("subscribe");
        next_envelope(&mut consumer).await
        // dropped without committing
    };

    let mut consumer = log.subscribe().await.expect("resubscribe");
    let again = next_envelope(&mut consumer).await;
    assert_eq!(again.position(), first.position());
}

#[tokio::test]
#[ignore]
async fn committed_record_is_not_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let log = stream_log(&brokers, "envelopes-commit", "commit-group");
    wait_for_topic(&log).await;

    for action in ["first", "second"] {
        let envelope = fixtures::envelope(5, action);
        log.append(envelope.partition_key(), envelope.to_bytes().unwrap())
            .await
            .expect("append");
    }

    {
        let mut consumer = log.subscribe().await.expect("subscribe");
        let first = next_envelope(&mut consumer).await;
        consumer.commit(first.position()).await.expect("commit");
        // Async commits are flushed when the consumer closes.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let mut consumer = log.subscribe().await.expect("resubscribe");
    let record = next_envelope(&mut consumer).await;
    let envelope = actionstream_core::Envelope::from_bytes(&record.payload).expect("envelope");
    assert_eq!(envelope.action(), "second");
}

#[tokio::test]
#[ignore]
async fn readiness_check_reaches_broker() {
    let (_kafka, brokers) = start_kafka().await;
    let log = stream_log(&brokers, "envelopes-ready", "ready-group");
    wait_for_topic(&log).await;

    log.check_connection(Duration::from_secs(5))
        .await
        .expect("broker should answer metadata requests");
}

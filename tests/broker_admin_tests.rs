//! Topic administration through the broker connector, with and without retry.

use std::time::Duration;

use kzconnect::broker::{
    BrokerConfig, BrokerConnector, InMemoryBroker, TopicSpec, ensure_topic, remove_topic,
};
use kzconnect::error::{Error, KafkaCode};
use kzconnect::retry::RetryPolicy;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn dialed() -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    broker
        .dial(&["localhost:9092".to_string()], &BrokerConfig::default())
        .await
        .expect("dial");
    broker
}

// ============================================================================
// Per-topic errors
// ============================================================================

#[tokio::test]
async fn test_topic_error_is_typed_and_names_topic() {
    let broker = dialed().await;
    broker.inject_topic_error("orders", KafkaCode::PolicyViolation);

    let err = broker
        .create_topic(&TopicSpec::new("orders", 3, 1), TIMEOUT)
        .await
        .unwrap_err();

    match err {
        Error::Topic { topic, code, .. } => {
            assert_eq!(topic, "orders");
            assert_eq!(code, KafkaCode::PolicyViolation);
        }
        other => panic!("expected topic error, got {other:?}"),
    }
    assert!(broker.topic_names().is_empty());
}

#[tokio::test]
async fn test_zero_errors_is_success() {
    let broker = dialed().await;
    broker
        .create_topic(&TopicSpec::new("orders", 3, 1), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.topic_names(), vec!["orders".to_string()]);
}

#[tokio::test]
async fn test_delete_error_is_typed() {
    let broker = dialed().await;
    broker
        .create_topic(&TopicSpec::new("orders", 1, 1), TIMEOUT)
        .await
        .unwrap();
    broker.inject_topic_error("orders", KafkaCode::TopicDeletionDisabled);

    let err = broker.delete_topic("orders", TIMEOUT).await.unwrap_err();
    assert_eq!(err.kafka_code(), Some(KafkaCode::TopicDeletionDisabled));
    assert_eq!(broker.topic_names().len(), 1);
}

// ============================================================================
// Retry wrapping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ensure_topic_retries_transient_errors() {
    let broker = dialed().await;
    broker.inject_topic_error("orders", KafkaCode::NotController);
    broker.inject_topic_error("orders", KafkaCode::RequestTimedOut);
    let policy = RetryPolicy::new(3, Duration::from_millis(100));

    ensure_topic(&broker, &policy, &TopicSpec::new("orders", 3, 1), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(broker.admin_requests(), 3);
    assert_eq!(broker.topic_names(), vec!["orders".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_topic_accepts_existing() {
    let broker = dialed().await;
    let spec = TopicSpec::new("orders", 3, 1);
    broker.create_topic(&spec, TIMEOUT).await.unwrap();

    ensure_topic(&broker, &RetryPolicy::default(), &spec, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.admin_requests(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_topic_returns_last_error_when_exhausted() {
    let broker = dialed().await;
    for _ in 0..3 {
        broker.inject_topic_error("orders", KafkaCode::NotController);
    }
    let policy = RetryPolicy::new(2, Duration::from_millis(10));

    let err = ensure_topic(&broker, &policy, &TopicSpec::new("orders", 1, 1), TIMEOUT)
        .await
        .unwrap_err();

    assert_eq!(err.kafka_code(), Some(KafkaCode::NotController));
    assert_eq!(broker.admin_requests(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_remove_topic_tolerates_missing() {
    let broker = dialed().await;
    remove_topic(&broker, &RetryPolicy::default(), "ghost", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.admin_requests(), 1);
}

#[tokio::test]
async fn test_not_connected_is_not_masked_by_helpers() {
    let broker = InMemoryBroker::new();
    let policy = RetryPolicy::new(0, Duration::from_millis(1));

    let err = ensure_topic(&broker, &policy, &TopicSpec::new("t", 1, 1), TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, Error::NotConnected);
}

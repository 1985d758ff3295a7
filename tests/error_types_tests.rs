//! Integration tests for error types.
//!
//! These tests verify error display, classification helpers and wire code
//! mapping.

use kzconnect::error::{Error, KafkaCode, ZkCode};

// ============================================================================
// Display
// ============================================================================

#[test]
fn test_not_connected_display() {
    assert_eq!(format!("{}", Error::NotConnected), "connection not initialized");
}

#[test]
fn test_not_locked_display_names_path() {
    let err = Error::NotLocked {
        path: "/jobs/nightly".to_string(),
    };
    let display = err.to_string();
    assert!(display.contains("not locked"));
    assert!(display.contains("/jobs/nightly"));
}

#[test]
fn test_coordination_display_names_code_and_path() {
    let display = Error::coordination(ZkCode::NodeExists, "/a").to_string();
    assert!(display.contains("NodeExists"));
    assert!(display.contains("/a"));
}

#[test]
fn test_broker_and_config_display() {
    assert!(Error::Broker("timed out".to_string()).to_string().contains("timed out"));
    assert!(Error::Config("bad".to_string()).to_string().contains("configuration"));
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_code_accessors() {
    let topic = Error::topic("orders", KafkaCode::TopicAlreadyExists, None);
    assert_eq!(topic.kafka_code(), Some(KafkaCode::TopicAlreadyExists));
    assert_eq!(topic.coordination_code(), None);

    let zk = Error::coordination(ZkCode::BadVersion, "/cfg");
    assert_eq!(zk.coordination_code(), Some(ZkCode::BadVersion));
    assert_eq!(zk.kafka_code(), None);
}

#[test]
fn test_is_not_connected() {
    assert!(Error::NotConnected.is_not_connected());
    assert!(!Error::Broker("x".to_string()).is_not_connected());
}

#[test]
fn test_session_lost_codes() {
    assert!(Error::coordination(ZkCode::SessionExpired, "/").is_session_lost());
    assert!(Error::coordination(ZkCode::ConnectionClosed, "/").is_session_lost());
    assert!(!Error::coordination(ZkCode::ConnectionLoss, "/").is_session_lost());
    assert!(!Error::NotConnected.is_session_lost());
}

// ============================================================================
// Wire codes
// ============================================================================

#[test]
fn test_zk_code_from_code() {
    assert_eq!(ZkCode::from_code(-101), ZkCode::NoNode);
    assert_eq!(ZkCode::from_code(-112), ZkCode::SessionExpired);
    assert_eq!(ZkCode::from_code(12345), ZkCode::SystemError);
}

#[test]
fn test_kafka_code_values() {
    assert_eq!(KafkaCode::TopicAlreadyExists as i16, 36);
    assert_eq!(KafkaCode::from_code(3), KafkaCode::UnknownTopicOrPartition);
    assert_eq!(KafkaCode::from_code(-1), KafkaCode::Unknown);
    assert!(KafkaCode::RequestTimedOut.is_retriable());
    assert!(!KafkaCode::PolicyViolation.is_retriable());
}

#[test]
fn test_errors_are_comparable() {
    let a = Error::topic("t", KafkaCode::InvalidConfig, Some("x".to_string()));
    assert_eq!(a.clone(), a);
    assert_ne!(a, Error::topic("t", KafkaCode::InvalidConfig, None));
}

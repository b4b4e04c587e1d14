//! Tests for the store registry

use super::*;
use crate::backend::{Backend, MemoryBackend};
use crate::error::Error;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn memory_registry() -> (Arc<MemoryBackend>, Registry) {
    let backend = Arc::new(MemoryBackend::new());
    let registry = Registry::new(Arc::clone(&backend) as Arc<dyn Backend>);
    (backend, registry)
}

// ============================================================================
// Get / Release Tests
// ============================================================================

#[test]
fn test_get_opens_store_once() {
    let (backend, registry) = memory_registry();

    let a = registry.get("test").unwrap();
    let b = registry.get("test").unwrap();
    assert_eq!(registry.open_stores(), vec!["test".to_string()]);

    a.set("key", &json!({"cursor": "1"})).unwrap();
    let value: serde_json::Value = b.get("key").unwrap().unwrap();
    assert_eq!(value, json!({"cursor": "1"}));

    drop(a);
    assert!(!backend.collection("test").unwrap().is_closed());
    drop(b);
    assert!(backend.collection("test").unwrap().is_closed());
    assert!(registry.open_stores().is_empty());
}

#[test]
fn test_clone_retains_store() {
    let (backend, registry) = memory_registry();

    let a = registry.get("test").unwrap();
    let b = a.clone();
    a.release();
    assert!(!backend.collection("test").unwrap().is_closed());
    b.release();
    assert!(backend.collection("test").unwrap().is_closed());
}

#[test]
fn test_reopen_after_release() {
    let (_backend, registry) = memory_registry();

    let store = registry.get("test").unwrap();
    store.set("key", &1).unwrap();
    store.release();

    let store = registry.get("test").unwrap();
    assert_eq!(store.get::<i64>("key").unwrap(), Some(1));
}

#[test]
fn test_access_error() {
    let registry = Registry::new(Arc::new(MemoryBackend::unavailable()));
    let err = registry.get("test").unwrap_err();
    match err {
        Error::Access { name, .. } => assert_eq!(name, "test"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(registry.open_stores().is_empty());
}

#[test]
fn test_typed_get_decode_error() {
    let (_backend, registry) = memory_registry();
    let store = registry.get("test").unwrap();
    store.set("key", &"not a number").unwrap();

    let err = store.get::<i64>("key").unwrap_err();
    assert!(matches!(err, Error::Decode { ref key, .. } if key == "key"));
}

#[test]
fn test_each_stops_early() {
    let (_backend, registry) = memory_registry();
    let store = registry.get("test").unwrap();
    for i in 0..5 {
        store.set(&format!("k{i}"), &i).unwrap();
    }

    let mut seen = Vec::new();
    store
        .each(|key, _| {
            seen.push(key.to_string());
            Ok(seen.len() < 2)
        })
        .unwrap();
    assert_eq!(seen, vec!["k0".to_string(), "k1".to_string()]);
}

// ============================================================================
// Close Tests
// ============================================================================

#[tokio::test]
async fn test_close_without_open_stores() {
    let (_backend, registry) = memory_registry();
    registry.close().await.unwrap();
    assert!(matches!(registry.get("test"), Err(Error::RegistryClosed)));
}

#[tokio::test]
async fn test_close_waits_for_release() {
    let (_backend, registry) = memory_registry();
    let store = registry.get("test").unwrap();

    let closer = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.close().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!closer.is_finished());

    store.release();
    closer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_timeout_reports_leaked_handles() {
    let (_backend, registry) = memory_registry();
    let _leaked = registry.get("leaky").unwrap();

    let err = registry
        .close_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    match err {
        Error::ShutdownTimeout { open } => assert_eq!(open, vec!["leaky".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Reference Counting Tests
// ============================================================================

#[test]
#[should_panic(expected = "removing an unknown store 'missing'")]
fn test_release_of_unknown_store_panics() {
    let (_backend, registry) = memory_registry();
    registry.inner.release("missing");
}

#[test]
#[should_panic(expected = "retaining unknown store 'missing'")]
fn test_retain_of_unknown_store_panics() {
    let (_backend, registry) = memory_registry();
    registry.inner.retain("missing");
}

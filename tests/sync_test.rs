// Synchronizer against an in-process upstream: initial load, polling
// reconciliation, streamed events and reconnect behavior.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use warrant_edge::edge::store::Datastore;
use warrant_edge::edge::sync::Synchronizer;
use warrant_edge::errors::EdgeError;
use warrant_edge::settings::UpdateStrategy;

use helpers::{eventually, FakeUpstream};

const DOC_VIEW: &str = "doc:1#view@user:9";
const DOC_EDIT: &str = "doc:1#edit@user:9";
const FOLDER_OWNER: &str = "folder:7#owner@user:9";

fn cached(store: &Datastore, key: &str) -> u32 {
    match store {
        Datastore::Memory(memory) => memory.count(key),
        Datastore::Redis(_) => panic!("sync tests run against the memory store"),
    }
}

#[tokio::test]
async fn test_initialize_loads_snapshot_and_marks_ready() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 2, DOC_EDIT: 1 })).await;
    let store = Arc::new(Datastore::memory());
    let sync = Synchronizer::new(&upstream.settings(UpdateStrategy::Polling), store.clone())
        .expect("Failed to build synchronizer");

    assert!(!store.is_ready());
    sync.initialize().await.expect("Initial load failed");

    assert!(store.is_ready());
    assert_eq!(cached(&store, DOC_VIEW), 2);
    assert_eq!(cached(&store, DOC_EDIT), 1);
    assert_eq!(upstream.expand_calls(), 1);
}

#[tokio::test]
async fn test_initialize_failure_leaves_cache_not_ready() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1 })).await;
    upstream.fail_with(Some(StatusCode::INTERNAL_SERVER_ERROR));

    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Polling), store.clone()).unwrap();

    let err = sync.initialize().await.unwrap_err();
    assert!(matches!(err, EdgeError::UpstreamStatus { status: 500, .. }));
    assert!(!store.is_ready());
    assert_eq!(cached(&store, DOC_VIEW), 0);
}

#[tokio::test]
async fn test_wrong_api_key_is_rejected_upstream() {
    let upstream = FakeUpstream::start(json!({})).await;
    let mut cfg = upstream.settings(UpdateStrategy::Polling);
    cfg.api_key = "someone-else".into();

    let sync = Synchronizer::new(&cfg, Arc::new(Datastore::memory())).unwrap();
    let err = sync.initialize().await.unwrap_err();
    assert!(matches!(err, EdgeError::UpstreamStatus { status: 401, .. }));
}

#[tokio::test]
async fn test_poll_once_reconciles_with_snapshot() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1, DOC_EDIT: 2 })).await;
    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Polling), store.clone()).unwrap();
    sync.initialize().await.unwrap();

    upstream.set_snapshot(json!({ DOC_EDIT: 1, FOLDER_OWNER: 3 }));
    sync.poll_once().await.unwrap();

    assert_eq!(cached(&store, DOC_VIEW), 0);
    assert_eq!(cached(&store, DOC_EDIT), 1);
    assert_eq!(cached(&store, FOLDER_OWNER), 3);
    assert!(store.is_ready());
}

#[tokio::test]
async fn test_poll_failure_keeps_previous_contents() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1 })).await;
    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Polling), store.clone()).unwrap();
    sync.initialize().await.unwrap();

    upstream.fail_with(Some(StatusCode::BAD_GATEWAY));
    assert!(sync.poll_once().await.is_err());
    assert_eq!(cached(&store, DOC_VIEW), 1);
}

#[tokio::test]
async fn test_streamed_events_update_cache_until_shutdown() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1 })).await;
    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Streaming), store.clone()).unwrap();
    let running = tokio::spawn(async move { sync.run().await });

    upstream.wait_for_subscriptions(1).await;
    assert!(store.is_ready());

    upstream.send("set_warrants", &json!({ DOC_VIEW: 1, DOC_EDIT: 1 }).to_string());
    eventually(|| cached(&store, DOC_VIEW) == 2 && cached(&store, DOC_EDIT) == 1).await;

    upstream.send("del_warrants", &json!({ DOC_EDIT: 1 }).to_string());
    eventually(|| cached(&store, DOC_EDIT) == 0).await;

    // unknown kinds and bad payloads are skipped without ending the stream
    upstream.send("heartbeat", "{}");
    upstream.send("set_warrants", "not json");

    upstream.set_snapshot(json!({ FOLDER_OWNER: 1 }));
    upstream.send("reset_warrants", "");
    eventually(|| cached(&store, FOLDER_OWNER) == 1 && cached(&store, DOC_VIEW) == 0).await;
    assert_eq!(upstream.expand_calls(), 2);
    assert!(store.is_ready());

    upstream.send("shutdown", "");
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("Synchronizer did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_reconnect_reloads_before_resubscribing() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1 })).await;
    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Streaming), store.clone()).unwrap();
    let running = tokio::spawn(async move { sync.run().await });

    upstream.wait_for_subscriptions(1).await;
    upstream.set_snapshot(json!({ DOC_EDIT: 2 }));
    upstream.disconnect();

    upstream.wait_for_subscriptions(2).await;
    assert_eq!(upstream.expand_calls(), 2);
    eventually(|| store.is_ready()).await;
    assert_eq!(cached(&store, DOC_VIEW), 0);
    assert_eq!(cached(&store, DOC_EDIT), 2);

    upstream.send("set_warrants", &json!({ DOC_VIEW: 1 }).to_string());
    eventually(|| cached(&store, DOC_VIEW) == 1).await;

    running.abort();
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1 })).await;
    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Streaming), store.clone()).unwrap();
    let running = tokio::spawn(async move { sync.run().await });

    upstream.wait_for_subscriptions(1).await;
    upstream.fail_with(Some(StatusCode::SERVICE_UNAVAILABLE));
    upstream.disconnect();

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("Synchronizer kept retrying")
        .unwrap();
    assert!(matches!(
        result,
        Err(EdgeError::ReconnectExhausted { attempts: 2 })
    ));
    assert!(!store.is_ready());
}

#[tokio::test]
async fn test_streams_closed_before_any_event_exhaust_attempts() {
    let upstream = FakeUpstream::start(json!({ DOC_VIEW: 1 })).await;
    upstream.hang_up_on_subscribe(true);

    let store = Arc::new(Datastore::memory());
    let sync =
        Synchronizer::new(&upstream.settings(UpdateStrategy::Streaming), store.clone()).unwrap();
    let running = tokio::spawn(async move { sync.run().await });

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("Synchronizer kept reconnecting")
        .unwrap();
    assert!(matches!(
        result,
        Err(EdgeError::ReconnectExhausted { attempts: 2 })
    ));
    // initial load plus one reload per attempt
    assert_eq!(upstream.expand_calls(), 3);
    assert_eq!(upstream.subscriptions(), 3);
}

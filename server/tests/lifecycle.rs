//! Connection lifecycle, presence, sweeper, and HTTP surface tests.

mod common;

use std::{sync::Arc, time::Duration};

use common::*;
use quillpad_core::{db::MemoryRelayStore, store::Permission};
use quillpad_server::testing::TestRelay;
use serde_json::json;

fn seeded_store() -> Arc<MemoryRelayStore> {
    let store = Arc::new(MemoryRelayStore::new());
    store.insert_document("doc", "owner-1", "Notes");
    store.insert_share("doc", "alice", Permission::Editor);
    store.insert_share("doc", "bob", Permission::Editor);
    store
}

#[tokio::test]
async fn the_first_frame_after_join_is_doc_sync() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut client = TestClient::connect(&relay.ws_url()).await;
    client.join("doc", &token_for("alice")).await;

    let first = client.recv_json().await.expect("a frame arrives");
    assert_eq!(first["type"], "doc_sync");
    assert!(first["update"].is_string());
}

#[tokio::test]
async fn non_join_frames_before_join_get_not_joined() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut client = TestClient::connect(&relay.ws_url()).await;
    client.send(json!({"type": "heartbeat"})).await;

    let error = client.recv_type("error").await;
    assert_eq!(error["message"], "Not joined");

    // The connection survives the refusal and can still join.
    client.join("doc", &token_for("alice")).await;
    client.recv_type("doc_sync").await;
}

#[tokio::test]
async fn leave_document_clears_membership_but_keeps_the_socket() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut client = TestClient::connect(&relay.ws_url()).await;
    client.join("doc", &token_for("alice")).await;
    client.recv_type("doc_sync").await;

    client.send(json!({"type": "leave_document"})).await;
    // Room is reclaimed as soon as the last member leaves.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if relay.state.registry.get("doc").is_none() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "room was not reclaimed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    client.send(json!({"type": "heartbeat"})).await;
    let error = client.recv_type("error").await;
    assert_eq!(error["message"], "Not joined");
}

#[tokio::test]
async fn presence_broadcasts_dedup_users_across_tabs() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut first_tab = TestClient::connect(&relay.ws_url()).await;
    first_tab.join("doc", &token_for("alice")).await;
    first_tab.recv_type("doc_sync").await;

    let mut second_tab = TestClient::connect(&relay.ws_url()).await;
    second_tab.join("doc", &token_for("alice")).await;
    second_tab.recv_type("doc_sync").await;

    let mut bob = TestClient::connect(&relay.ws_url()).await;
    bob.join("doc", &token_for("bob")).await;
    bob.recv_type("doc_sync").await;

    let presence = bob.recv_type("presence_update").await;
    let users = presence["users"].as_array().unwrap();
    let mut ids: Vec<&str> = users
        .iter()
        .map(|user| user["userId"].as_str().unwrap())
        .collect();
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total, "userIds are unique: {presence}");
    assert!(ids.contains(&"alice"));
    assert!(ids.contains(&"bob"));
}

#[tokio::test]
async fn cursor_updates_merge_partially_and_rebroadcast() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut alice = TestClient::connect(&relay.ws_url()).await;
    alice
        .send(json!({
            "type": "join_document",
            "documentId": "doc",
            "token": token_for("alice"),
            "user": {"name": "Alice", "avatarColor": "#123456"},
            "cursorPosition": 3,
        }))
        .await;
    alice.recv_type("doc_sync").await;

    let mut bob = TestClient::connect(&relay.ws_url()).await;
    bob.join("doc", &token_for("bob")).await;
    bob.recv_type("doc_sync").await;

    alice
        .send(json!({"type": "cursor_update", "isTyping": true}))
        .await;

    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "no merged presence");
        let presence = bob.recv_type("presence_update").await;
        let alice_entry = presence["users"]
            .as_array()
            .unwrap()
            .iter()
            .find(|user| user["userId"] == "alice")
            .cloned();
        if let Some(entry) = alice_entry {
            if entry["isTyping"] == true {
                // Fields not present in the update kept their values.
                assert_eq!(entry["name"], "Alice");
                assert_eq!(entry["avatarColor"], "#123456");
                assert_eq!(entry["cursorPosition"], 3);
                break;
            }
        }
    }
}

#[tokio::test]
async fn silent_connections_are_evicted_by_the_sweeper() {
    let relay = TestRelay::spawn(eviction_timings(), seeded_store(), None).await;

    // Alice joins, confirms the join landed, then goes silent: she stops
    // reading, so the client stack never answers the transport pings.
    let mut alice = TestClient::connect(&relay.ws_url()).await;
    alice.join("doc", &token_for("alice")).await;
    alice.recv_type("doc_sync").await;

    let mut bob = TestClient::connect(&relay.ws_url()).await;
    bob.join("doc", &token_for("bob")).await;
    bob.recv_type("doc_sync").await;

    // Bob keeps reading (and therefore ponging) until presence shows him
    // alone in the room.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "alice was never evicted"
        );
        let presence = bob.recv_type("presence_update").await;
        let users = presence["users"].as_array().unwrap();
        if users.len() == 1 && users[0]["userId"] == "bob" {
            break;
        }
    }

    let room = relay.state.registry.get("doc").expect("room still open");
    assert_eq!(room.member_count().await, 1);
}

#[tokio::test]
async fn metrics_and_health_endpoints_respond() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut alice = TestClient::connect(&relay.ws_url()).await;
    alice.join("doc", &token_for("alice")).await;
    alice.recv_type("doc_sync").await;

    let mut doc = EditorDoc::new();
    let update = doc.insert(0, "tracked");
    alice
        .send(json!({"type": "yjs_update", "update": update}))
        .await;
    // Let the frame land before scraping.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, body) = http_get(relay.addr, "/metrics").await;
    assert_eq!(status, 200);
    let metrics: serde_json::Value = serde_json::from_str(body.trim()).unwrap();
    assert_eq!(metrics["activeDocuments"], 1);
    assert_eq!(metrics["activeConnections"], 1);
    assert_eq!(metrics["opsPerMinute"], 1);

    let (status, body) = http_get(relay.addr, "/healthz").await;
    assert_eq!(status, 200);
    assert_eq!(body.trim(), r#"{"status":"ok"}"#);

    let (status, _) = http_get(relay.addr, "/nowhere").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let relay = TestRelay::spawn(fast_timings(), seeded_store(), None).await;

    let mut client = TestClient::connect(&relay.ws_url()).await;
    client.join("doc", &token_for("alice")).await;
    client.recv_type("doc_sync").await;

    client.send(json!({"type": "teleport", "to": "mars"})).await;
    client.send(json!({"documentId": "doc"})).await;

    // Still a functioning member afterwards.
    client
        .send(json!({"type": "cursor_update", "cursorPosition": 7}))
        .await;
    let presence = client.recv_type("presence_update").await;
    let me = presence["users"]
        .as_array()
        .unwrap()
        .iter()
        .find(|user| user["userId"] == "alice")
        .expect("still present");
    assert_eq!(me["cursorPosition"], 7);
}

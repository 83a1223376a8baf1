//! Shared helpers for the relay integration suite.
#![allow(dead_code)]

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures_util::{SinkExt, StreamExt};
use quillpad_core::{config::RelayTimings, token::sign_session};
use quillpad_server::testing::TEST_JWT_SECRET;
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use yrs::{
    Doc, GetString, ReadTxn, StateVector, Text, Transact, Update, updates::decoder::Decode,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Short persistence/sweeper knobs with a heartbeat timeout generous
/// enough that clients busy inside a test step are never evicted.
pub fn fast_timings() -> RelayTimings {
    RelayTimings {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_secs(2),
        persist_debounce_cache: Duration::from_millis(100),
        persist_debounce_durable: Duration::from_millis(150),
        durable_write_floor: Duration::from_secs(1),
    }
}

/// Aggressive heartbeat knobs for the eviction test.
pub fn eviction_timings() -> RelayTimings {
    RelayTimings {
        heartbeat_timeout: Duration::from_millis(300),
        ..fast_timings()
    }
}

pub fn token_for(user_id: &str) -> String {
    sign_session(
        TEST_JWT_SECRET,
        Some(user_id),
        Some(&format!("{user_id}@example.com")),
        3600,
    )
}

pub fn expired_token_for(user_id: &str) -> String {
    sign_session(
        TEST_JWT_SECRET,
        Some(user_id),
        Some(&format!("{user_id}@example.com")),
        -3600,
    )
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        Self { ws }
    }

    pub async fn send(&mut self, frame: JsonValue) {
        self.ws
            .send(Message::Text(frame.to_string()))
            .await
            .expect("send frame");
    }

    pub async fn join(&mut self, document_id: &str, token: &str) {
        self.send(json!({
            "type": "join_document",
            "documentId": document_id,
            "token": token,
        }))
        .await;
    }

    /// Next JSON frame, or None when the stream closes first.
    pub async fn recv_json(&mut self) -> Option<JsonValue> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let message = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .expect("timed out waiting for frame")?;
            match message.ok()? {
                Message::Text(text) => {
                    return Some(serde_json::from_str(&text).expect("frames are JSON"));
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Skips frames until one of the wanted type arrives.
    pub async fn recv_type(&mut self, wanted: &str) -> JsonValue {
        loop {
            let frame = self
                .recv_json()
                .await
                .unwrap_or_else(|| panic!("stream closed while waiting for {wanted}"));
            if frame["type"] == wanted {
                return frame;
            }
        }
    }

    /// Asserts the server closes the stream (after any buffered frames).
    pub async fn expect_close(&mut self) {
        while self.recv_json().await.is_some() {}
    }

    /// Collects every frame that arrives within the window.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<JsonValue> {
        let deadline = tokio::time::Instant::now() + window;
        let mut frames = Vec::new();
        loop {
            let next = tokio::time::timeout_at(deadline, self.ws.next()).await;
            match next {
                Ok(Some(Ok(Message::Text(text)))) => {
                    frames.push(serde_json::from_str(&text).expect("frames are JSON"));
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) | Err(_) => return frames,
            }
        }
    }
}

/// Client-side CRDT replica speaking the relay's base64 update payloads.
pub struct EditorDoc {
    doc: Doc,
}

impl EditorDoc {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    pub fn apply_b64(&mut self, encoded: &str) {
        let bytes = BASE64.decode(encoded).expect("valid base64 update");
        let update = Update::decode_v1(&bytes).expect("valid update bytes");
        self.doc
            .transact_mut()
            .apply_update(update)
            .expect("update applies");
    }

    /// Inserts text locally and returns the relay-ready diff.
    pub fn insert(&mut self, index: u32, content: &str) -> String {
        let before = self.doc.transact().state_vector();
        let text = self.doc.get_or_insert_text("content");
        let mut txn = self.doc.transact_mut();
        text.insert(&mut txn, index, content);
        drop(txn);

        let diff = self.doc.transact().encode_state_as_update_v1(&before);
        BASE64.encode(diff)
    }

    pub fn text(&self) -> String {
        let text = self.doc.get_or_insert_text("content");
        text.get_string(&self.doc.transact())
    }

    pub fn state_bytes(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }
}

/// Full CRDT state encoding a single `content` text, for seeding stores.
pub fn snapshot_with_text(content: &str) -> Vec<u8> {
    let mut doc = EditorDoc::new();
    doc.insert(0, content);
    doc.state_bytes()
}

/// Minimal HTTP/1.1 GET against the relay's plain endpoints.
pub async fn http_get(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read");
    let response = String::from_utf8_lossy(&raw);

    let status = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status line");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_owned())
        .unwrap_or_default();
    (status, body)
}

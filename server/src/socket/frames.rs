use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::presence::{PresenceChange, PresenceUser, SelectionRange};

/// Client-supplied display identity inside `join_document`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_color: Option<String>,
}

/// Inbound frames. JSON objects tagged by `type`; unknown types fail to
/// parse and are dropped by the connection handler.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    JoinDocument {
        document_id: String,
        token: String,
        #[serde(default)]
        share_token: Option<String>,
        #[serde(default)]
        user: Option<ClientUser>,
        #[serde(default)]
        cursor_position: Option<u64>,
        #[serde(default)]
        selection_range: Option<SelectionRange>,
    },
    YjsUpdate {
        update: String,
    },
    CursorUpdate {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        avatar_color: Option<String>,
        #[serde(default)]
        cursor_position: Option<u64>,
        #[serde(default)]
        selection_range: Option<SelectionRange>,
        #[serde(default)]
        is_typing: Option<bool>,
    },
    Heartbeat,
    LeaveDocument,
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Outbound frames. `update` payloads are base64 CRDT state/update bytes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    DocSync {
        update: String,
    },
    YjsUpdate {
        update: String,
    },
    PresenceUpdate {
        document_id: String,
        users: Vec<PresenceUser>,
    },
    Error {
        message: String,
    },
    /// Reserved for superseding an older connection of the same
    /// `(user, document)` pair; currently never sent. Receivers must not
    /// reconnect on receipt.
    #[allow(dead_code)]
    ConnectionReplaced,
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server frames always serialize")
    }
}

pub fn presence_change_from_fields(
    name: Option<String>,
    avatar_color: Option<String>,
    cursor_position: Option<u64>,
    selection_range: Option<SelectionRange>,
    is_typing: Option<bool>,
) -> PresenceChange {
    PresenceChange {
        name,
        avatar_color,
        cursor_position,
        selection_range,
        is_typing,
    }
}

/// Loose check used by tests and tooling: does a raw frame look like a
/// given type without fully deserializing it.
pub fn frame_type(raw: &str) -> Option<String> {
    let value: JsonValue = serde_json::from_str(raw).ok()?;
    value.get("type")?.as_str().map(str::to_owned)
}

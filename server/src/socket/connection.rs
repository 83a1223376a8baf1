use std::{ops::ControlFlow, sync::Arc};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use quillpad_core::store::Permission;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    access::resolve_access,
    error::RelayError,
    presence::{PresenceEntry, default_avatar_color},
    room::{ApplyOutcome, Room, Seat},
    socket::{
        Outgoing, OutboundSender,
        frames::{ClientFrame, ServerFrame, presence_change_from_fields},
    },
    state::{AppState, ConnectionState},
};

/// What the connection is bound to after a successful join.
struct JoinedDoc {
    document_id: String,
    user_id: String,
    email: String,
    permission: Permission,
    room: Arc<Room>,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    state.metrics.inc_connections();
    debug!(%conn_id, "connection opened");

    let (sink, stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let kill = Arc::new(Notify::new());

    let writer = tokio::spawn(writer_task(sink, outbound_rx));
    let mut joined = read_loop(&state, conn_id, &outbound, &kill, stream).await;

    // Closing → Closed: always runs, whether the client closed, errored,
    // left, or was evicted mid-await.
    if let Some(joined) = joined.take() {
        cleanup_join(&state, conn_id, joined).await;
    }
    let _ = outbound.send(Outgoing::Close);
    drop(outbound);
    let _ = writer.await;

    state.metrics.dec_connections();
    debug!(%conn_id, "connection closed");
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = outbound_rx.recv().await {
        let result = match outgoing {
            Outgoing::Frame(json) => sink.send(Message::Text(json)).await,
            Outgoing::Ping => sink.send(Message::Ping(Vec::new())).await,
            Outgoing::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };

        if result.is_err() {
            break;
        }
    }
}

async fn read_loop(
    state: &AppState,
    conn_id: Uuid,
    outbound: &OutboundSender,
    kill: &Arc<Notify>,
    mut stream: SplitStream<WebSocket>,
) -> Option<JoinedDoc> {
    let mut joined: Option<JoinedDoc> = None;

    loop {
        let message = tokio::select! {
            _ = kill.notified() => break,
            message = stream.next() => message,
        };

        let Some(Ok(message)) = message else {
            break;
        };

        match message {
            Message::Text(text) => {
                if let Some(doc) = &joined {
                    doc.room.touch(conn_id).await;
                }
                match handle_frame(state, conn_id, outbound, kill, &mut joined, &text).await {
                    ControlFlow::Continue(()) => {}
                    ControlFlow::Break(()) => break,
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                if let Some(doc) = &joined {
                    doc.room.touch(conn_id).await;
                }
            }
            Message::Binary(_) => {
                debug!(%conn_id, "ignoring binary frame");
            }
            Message::Close(_) => break,
        }
    }

    joined
}

async fn handle_frame(
    state: &AppState,
    conn_id: Uuid,
    outbound: &OutboundSender,
    kill: &Arc<Notify>,
    joined: &mut Option<JoinedDoc>,
    raw: &str,
) -> ControlFlow<()> {
    let frame = match ClientFrame::parse(raw) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(%conn_id, error = %err, "ignoring malformed frame");
            return ControlFlow::Continue(());
        }
    };

    match frame {
        ClientFrame::JoinDocument {
            document_id,
            token,
            share_token,
            user,
            cursor_position,
            selection_range,
        } => {
            handle_join(
                state,
                conn_id,
                outbound,
                kill,
                joined,
                JoinRequest {
                    document_id,
                    token,
                    share_token,
                    name: user.as_ref().and_then(|u| u.name.clone()),
                    avatar_color: user.as_ref().and_then(|u| u.avatar_color.clone()),
                    cursor_position,
                    selection_range,
                },
            )
            .await
        }
        ClientFrame::YjsUpdate { update } => {
            let Some(doc) = joined.as_ref() else {
                send_error(outbound, &RelayError::NotJoined);
                return ControlFlow::Continue(());
            };

            match doc.room.apply_update(conn_id, &update, &state.metrics).await {
                ApplyOutcome::Applied { schedule_persist } => {
                    if schedule_persist {
                        schedule_room_persist(state, doc.room.clone());
                    }
                }
                // Refusal frame already sent under the room lock.
                ApplyOutcome::ReadOnly => {}
                ApplyOutcome::Dropped => {}
                // Raced with eviction; the kill signal is on its way.
                ApplyOutcome::NotMember => {}
            }
            ControlFlow::Continue(())
        }
        ClientFrame::CursorUpdate {
            name,
            avatar_color,
            cursor_position,
            selection_range,
            is_typing,
        } => {
            let Some(doc) = joined.as_ref() else {
                send_error(outbound, &RelayError::NotJoined);
                return ControlFlow::Continue(());
            };

            let change = presence_change_from_fields(
                name,
                avatar_color,
                cursor_position,
                selection_range,
                is_typing,
            );
            doc.room.merge_presence(conn_id, &change).await;
            ControlFlow::Continue(())
        }
        ClientFrame::Heartbeat => {
            if joined.is_none() {
                send_error(outbound, &RelayError::NotJoined);
            }
            // The refresh already happened at dispatch.
            ControlFlow::Continue(())
        }
        ClientFrame::LeaveDocument => {
            match joined.take() {
                Some(doc) => cleanup_join(state, conn_id, doc).await,
                None => send_error(outbound, &RelayError::NotJoined),
            }
            // The socket may stay open; later frames get `Not joined`.
            ControlFlow::Continue(())
        }
    }
}

struct JoinRequest {
    document_id: String,
    token: String,
    share_token: Option<String>,
    name: Option<String>,
    avatar_color: Option<String>,
    cursor_position: Option<u64>,
    selection_range: Option<crate::presence::SelectionRange>,
}

async fn handle_join(
    state: &AppState,
    conn_id: Uuid,
    outbound: &OutboundSender,
    kill: &Arc<Notify>,
    joined: &mut Option<JoinedDoc>,
    request: JoinRequest,
) -> ControlFlow<()> {
    // One joined document per connection: a fresh join supersedes the
    // previous membership.
    if let Some(previous) = joined.take() {
        cleanup_join(state, conn_id, previous).await;
    }

    let claims = match state.verifier.verify(&request.token) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(%conn_id, error = %err, "join refused: bad token");
            return deny(outbound, RelayError::Unauthorized);
        }
    };

    let permission = match resolve_access(
        state.store.as_ref(),
        &request.document_id,
        &claims.user_id,
        request.share_token.as_deref(),
    )
    .await
    {
        Ok(permission) => permission,
        Err(denied) => {
            debug!(
                %conn_id,
                document_id = %request.document_id,
                user_id = %claims.user_id,
                ?denied,
                "join refused"
            );
            return deny(outbound, denied.into());
        }
    };

    let name = request
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| display_name_from_email(&claims.email));
    let avatar_color = request
        .avatar_color
        .unwrap_or_else(|| default_avatar_color(&claims.user_id).to_owned());

    let room = loop {
        let room = state
            .registry
            .open(&request.document_id, &state.snapshots)
            .await;

        let seat = Seat {
            user_id: claims.user_id.clone(),
            permission,
            outbound: outbound.clone(),
            kill: kill.clone(),
        };
        let entry = PresenceEntry::new(
            claims.user_id.as_str(),
            name.as_str(),
            avatar_color.as_str(),
            request.cursor_position,
            request.selection_range,
        );

        match room.join(conn_id, seat, entry).await {
            Ok(()) => break room,
            // Lost a race with the sweeper; the registry entry is gone,
            // so the next open() builds a fresh room.
            Err(_) => continue,
        }
    };

    state.connections.insert(
        conn_id,
        ConnectionState {
            document_id: request.document_id.clone(),
            user_id: claims.user_id.clone(),
            permission,
        },
    );

    info!(
        %conn_id,
        document_id = %request.document_id,
        user_id = %claims.user_id,
        permission = %permission,
        "joined document"
    );

    *joined = Some(JoinedDoc {
        document_id: request.document_id,
        user_id: claims.user_id,
        email: claims.email,
        permission,
        room,
    });
    ControlFlow::Continue(())
}

/// Removes the connection from its room, clears its connection state, and
/// reclaims the room if that made it idle. Safe to race with the sweeper:
/// the room-side removal is idempotent.
async fn cleanup_join(state: &AppState, conn_id: Uuid, joined: JoinedDoc) {
    joined.room.remove(conn_id).await;
    state.connections.remove(&conn_id);
    state.registry.remove_idle(&joined.document_id);

    debug!(
        %conn_id,
        document_id = %joined.document_id,
        user_id = %joined.user_id,
        email = %joined.email,
        permission = %joined.permission,
        "left document"
    );
}

/// Fires the debounced persist for a room. The delay tier is chosen at
/// schedule time from the cache's current readiness.
fn schedule_room_persist(state: &AppState, room: Arc<Room>) {
    let delay = if state.snapshots.cache_ready() {
        state.timings.persist_debounce_cache
    } else {
        state.timings.persist_debounce_durable
    };

    let snapshots = state.snapshots.clone();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        room.flush(&snapshots).await;
        registry.remove_idle(room.document_id());
    });
}

fn send_error(outbound: &OutboundSender, error: &RelayError) {
    let frame = ServerFrame::error(error.frame_message()).to_json();
    if outbound.send(Outgoing::Frame(frame)).is_err() {
        warn!("failed to queue error frame; connection already closed");
    }
}

fn deny(outbound: &OutboundSender, error: RelayError) -> ControlFlow<()> {
    send_error(outbound, &error);
    if error.closes_connection() {
        let _ = outbound.send(Outgoing::Close);
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

fn display_name_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|part| !part.is_empty())
        .unwrap_or("Anonymous")
        .to_owned()
}

//! WebSocket connection handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{Stream, sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use undertow_shared::{ClientFrame, ErrorCode, RoomId, ServerFrame};

use crate::{
    connection::ConnectionHandle,
    core::RealtimeCore,
    error::{ChatError, GameError},
    ui::state::AppState,
};

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub ticket: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    // An invalid, expired, or already-consumed ticket never reaches the
    // upgrade.
    let user_id = match state.core.tickets.validate_and_consume(&query.ticket).await {
        Ok(user_id) => user_id,
        Err(err) => {
            tracing::warn!(%err, "rejected websocket upgrade");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let (handle, rx) = match state.core.register_connection(user_id) {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(user_id = %err.user_id, limit = err.limit, "connection limit reached");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    tracing::info!(user_id = %user_id, conn_id = %handle.conn_id, "websocket connected");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, handle, rx)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    handle: ConnectionHandle,
    mut rx: mpsc::Receiver<ServerFrame>,
) {
    let (mut sender, mut receiver) = socket.split();

    handle.send(ServerFrame::Connected {
        user_id: handle.user_id,
    });

    // Single-writer pump: frames from the hubs plus a protocol-level
    // ping on the heartbeat interval. Any write error ends the pump.
    let write_handle = handle.clone();
    let heartbeat = state.core.config.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::error!(%err, "unserializable outbound frame");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                _ = write_handle.closed() => break,
            }
        }
    });

    // Read pump: every inbound message, pings and pongs included,
    // refreshes the deadline. Silence for two heartbeat intervals kills
    // the connection.
    let core = Arc::clone(&state.core);
    let read_handle = handle.clone();
    let read_deadline = state.core.config.read_deadline();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let message = match next_inbound(&mut receiver, read_deadline).await {
                Inbound::Frame(message) => message,
                Inbound::DeadlineExceeded => {
                    tracing::info!(conn_id = %read_handle.conn_id, "read deadline exceeded");
                    break;
                }
                Inbound::Ended => break,
            };

            match message {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => dispatch(&core, &read_handle, frame).await,
                    Err(err) => {
                        // Malformed frame: tell the sender, keep the
                        // connection.
                        read_handle.send(ServerFrame::Error {
                            code: ErrorCode::Protocol,
                            message: format!("unparseable frame: {err}"),
                        });
                    }
                },
                Message::Pong(_) => core.presence.touch(read_handle.user_id).await,
                // The protocol-level pong is produced by axum itself.
                Message::Ping(_) => {}
                Message::Binary(_) => {
                    // Binary is protocol corruption on this endpoint.
                    read_handle.send(ServerFrame::Error {
                        code: ErrorCode::Protocol,
                        message: "binary frames are not supported".to_string(),
                    });
                    break;
                }
                Message::Close(_) => break,
            }
        }
    });

    // Whichever pump ends first takes the other one down with it.
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    state.core.cleanup_connection(&handle);
    tracing::info!(user_id = %handle.user_id, conn_id = %handle.conn_id, "websocket disconnected");
}

enum Inbound {
    Frame(Message),
    DeadlineExceeded,
    Ended,
}

/// Waits for the next inbound message. A peer silent past the deadline
/// (two heartbeat intervals, so one lost ping is forgiven) is treated
/// as gone.
async fn next_inbound<S>(receiver: &mut S, deadline: Duration) -> Inbound
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    match tokio::time::timeout(deadline, receiver.next()).await {
        Err(_) => Inbound::DeadlineExceeded,
        Ok(None) => Inbound::Ended,
        Ok(Some(Err(err))) => {
            tracing::debug!(%err, "websocket error");
            Inbound::Ended
        }
        Ok(Some(Ok(message))) => Inbound::Frame(message),
    }
}

/// Routes one parsed client frame. Rejections surface as `error` frames
/// on the sending connection only.
async fn dispatch(core: &Arc<RealtimeCore>, handle: &ConnectionHandle, frame: ClientFrame) {
    let user_id = handle.user_id;
    match frame {
        ClientFrame::Ping => {
            core.presence.touch(user_id).await;
            handle.send(ServerFrame::Pong);
        }
        ClientFrame::Message {
            conversation_id,
            content,
        } => {
            if let Err(err) = core.chat.send_message(user_id, conversation_id, content).await {
                send_chat_error(handle, err);
            }
        }
        ClientFrame::Typing {
            conversation_id,
            is_typing,
        } => {
            if let Err(err) = core.chat.typing(user_id, conversation_id, is_typing).await {
                send_chat_error(handle, err);
            }
        }
        ClientFrame::Read { conversation_id } => {
            if let Err(err) = core.chat.read(user_id, conversation_id).await {
                send_chat_error(handle, err);
            }
        }
        ClientFrame::CreateRoom { game } => match core.games.create_room(handle, game) {
            Ok(state) => {
                handle.send(ServerFrame::RoomState { state });
            }
            Err(err) => send_game_error(handle, err),
        },
        ClientFrame::JoinRoom { room } => match game_room_id(handle, &room) {
            // The room itself answers with `room_state`, either through
            // the activation broadcast or directly on re-attach.
            Some(room_id) => {
                if let Err(err) = core.games.join_room(handle, room_id).await {
                    send_game_error(handle, err);
                }
            }
            None => {}
        },
        ClientFrame::LeaveRoom { room } => match game_room_id(handle, &room) {
            Some(room_id) => match core.games.leave_room(handle, room_id).await {
                Ok(state) => {
                    handle.send(ServerFrame::RoomState { state });
                }
                Err(err) => send_game_error(handle, err),
            },
            None => {}
        },
        ClientFrame::Rematch { room } => match game_room_id(handle, &room) {
            Some(room_id) => match core.games.rematch(handle, room_id).await {
                Ok(state) => {
                    handle.send(ServerFrame::RoomState { state });
                }
                Err(err) => send_game_error(handle, err),
            },
            None => {}
        },
        ClientFrame::MakeMove { room, data } => match game_room_id(handle, &room) {
            Some(room_id) => {
                if let Err(err) = core.games.make_move(user_id, room_id, &data).await {
                    send_game_error(handle, err);
                }
            }
            None => {}
        },
        ClientFrame::RoomMessage { room, text } => match game_room_id(handle, &room) {
            Some(room_id) => {
                if let Err(err) = core.games.room_message(user_id, room_id, text).await {
                    send_game_error(handle, err);
                }
            }
            None => {}
        },
    }
}

/// Conversations are membership-scoped, not join-scoped; room verbs
/// apply to game rooms only.
fn game_room_id(handle: &ConnectionHandle, room: &RoomId) -> Option<u64> {
    match room {
        RoomId::Game(id) => Some(*id),
        RoomId::Conversation(_) => {
            handle.send(ServerFrame::Error {
                code: ErrorCode::Protocol,
                message: "room operations apply to game rooms".to_string(),
            });
            None
        }
    }
}

fn send_chat_error(handle: &ConnectionHandle, err: ChatError) {
    handle.send(ServerFrame::Error {
        code: err.code(),
        message: err.to_string(),
    });
}

fn send_game_error(handle: &ConnectionHandle, err: GameError) {
    handle.send(ServerFrame::Error {
        code: err.code(),
        message: err.to_string(),
    });
}

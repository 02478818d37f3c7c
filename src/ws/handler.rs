//! WebSocket upgrade handler and per-connection session loop
//!
//! One task per client. The reader loop drains the socket in order and
//! dispatches each envelope; a writer task drains the connection's
//! outbound channel so broadcasts from other sessions and direct replies
//! share one ordered stream. Disconnect cleanup runs from a drop guard,
//! so it fires even when a handler aborts the task.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::GameError;
use crate::rooms::OutboundSender;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The player id bound to this connection, if any. Cleanup happens on
/// drop so the transport dying in any way still marks the seat offline.
struct SessionGuard {
    state: AppState,
    player_id: Option<String>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(player_id) = self.player_id.take() {
            self.state.rooms.handle_disconnect(&player_id);
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("new WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task: outbound channel -> socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut session = SessionGuard {
        state: state.clone(),
        player_id: None,
    };

    // Reader loop: one envelope at a time, in arrival order.
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = dispatch(&state, &mut session, &tx, &text).await;
                match serde_json::to_string(&reply) {
                    Ok(frame) => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "failed to encode reply"),
                }
            }
            Ok(Message::Binary(_)) => {
                warn!("ignoring binary frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("client closed connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    drop(session);
    writer.abort();
}

/// Decode one envelope and route it by action. Every failure becomes an
/// `error` reply; nothing here closes the connection.
async fn dispatch(
    state: &AppState,
    session: &mut SessionGuard,
    tx: &OutboundSender,
    text: &str,
) -> ServerMsg {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return ServerMsg::error("invalid payload"),
    };

    let msg: ClientMsg = match serde_json::from_value(value.clone()) {
        Ok(msg) => msg,
        Err(_) => {
            return match value.get("action").and_then(serde_json::Value::as_str) {
                Some(action) => ServerMsg::error(format!("unknown or invalid action: {action}")),
                None => ServerMsg::error("invalid payload"),
            };
        }
    };

    let result = match msg {
        ClientMsg::CreateRoom { player_name } => {
            let reply = state.rooms.create_room(player_name, tx.clone());
            if let ServerMsg::RoomCreated { player_id, .. } = &reply {
                session.player_id = Some(player_id.clone());
            }
            Ok(reply)
        }

        ClientMsg::JoinRoom {
            room_code,
            player_name,
        } => state
            .rooms
            .join_room(&room_code, player_name, tx.clone())
            .map(|reply| {
                if let ServerMsg::RoomJoined { player_id, .. } = &reply {
                    session.player_id = Some(player_id.clone());
                }
                reply
            }),

        ClientMsg::SelectProvince {
            player_id,
            province,
        } => state.rooms.select_province(&player_id, &province),

        ClientMsg::Ready { player_id, ready } => state.rooms.set_ready(&player_id, ready),

        ClientMsg::StartGame { player_id } => state.rooms.start_game(&player_id),

        ClientMsg::EndTurn { player_id } => state.rooms.end_turn(&player_id),

        ClientMsg::Diplomacy {
            player_id,
            action_type,
            target_id,
        } => state.rooms.diplomacy(&player_id, action_type, &target_id),

        ClientMsg::Chat { player_id, message } => state.rooms.chat(&player_id, message),

        ClientMsg::UpdateState {
            player_id,
            state: new_state,
        } => state.rooms.update_state(&player_id, new_state),

        ClientMsg::Reconnect {
            room_code,
            player_id,
            reconnect_token,
        } => state
            .rooms
            .reconnect(&room_code, &player_id, &reconnect_token, tx.clone())
            .map(|reply| {
                session.player_id = Some(player_id.clone());
                reply
            }),

        ClientMsg::SaveRoom { player_id } => save_room(state, &player_id).await,

        ClientMsg::LoadRoom { room_code } => load_room(state, &room_code).await,

        ClientMsg::Ping => Ok(ServerMsg::Pong),
    };

    result.unwrap_or_else(|e| ServerMsg::error(e.to_string()))
}

/// Persist the caller's room. The write runs on the blocking pool; the
/// caller gets a definite success/failure either way.
async fn save_room(state: &AppState, player_id: &str) -> Result<ServerMsg, GameError> {
    let (code, saved) = state.rooms.snapshot_for_save(player_id)?;
    match state.store.save(saved).await {
        Ok(()) => {
            state.rooms.notify_room_saved(&code);
            Ok(ServerMsg::success_with(format!("room saved: {code}")))
        }
        Err(e) => {
            error!(room = %code, error = %e, "failed to save room");
            Ok(ServerMsg::error("failed to save room"))
        }
    }
}

async fn load_room(state: &AppState, room_code: &str) -> Result<ServerMsg, GameError> {
    let code = room_code.to_uppercase();
    if state.rooms.is_active(&code) {
        return Err(GameError::RoomAlreadyActive);
    }
    match state.store.load(&code).await {
        Ok(Some(saved)) => state.rooms.install_loaded(saved),
        Ok(None) => Err(GameError::SaveNotFound),
        Err(e) => {
            error!(room = %code, error = %e, "failed to load room");
            Ok(ServerMsg::error("failed to load room"))
        }
    }
}

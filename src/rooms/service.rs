//! Room service - the single mutator of live session state
//!
//! Holds the three routing tables (room code -> room, player -> connection
//! handle, player -> room code) and every action handler. Each room sits
//! behind its own lock, so check-then-act sequences (claim a province,
//! validate a turn, verify a reconnect token) are atomic even though
//! handlers run on a multi-threaded runtime. No handler awaits while a
//! room lock is held: outbound delivery is a non-blocking channel push and
//! persistence I/O happens in the caller, outside the lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::game::diplomacy::{resolve_battle, BattleSide};
use crate::game::room::{Player, ProposalKind, Room, SavedRoom, WarLogEntry};
use crate::game::GameError;
use crate::util::ident;
use crate::util::time::iso_now;
use crate::ws::protocol::{DiplomacyAction, ServerMsg};

/// Per-connection outbound channel. Frames are pre-serialized so a
/// broadcast encodes once and clones cheaply per recipient. Unbounded:
/// the writer task drains continuously, and a send never blocks a handler
/// holding a room lock.
pub type OutboundSender = mpsc::UnboundedSender<String>;

pub struct RoomService {
    /// Active rooms, each behind its own lock.
    rooms: DashMap<String, Arc<Mutex<Room>>>,
    /// player id -> live connection handle
    connections: DashMap<String, OutboundSender>,
    /// player id -> room code
    player_rooms: DashMap<String, String>,
}

impl RoomService {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            player_rooms: DashMap::new(),
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn connected_players(&self) -> usize {
        self.connections.len()
    }

    pub fn is_active(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    // -- Routing helpers ---------------------------------------------------

    fn room_arc(&self, code: &str) -> Result<Arc<Mutex<Room>>, GameError> {
        self.rooms
            .get(code)
            .map(|r| r.value().clone())
            .ok_or(GameError::RoomNotFound)
    }

    /// Resolve an acting player to their room. Players not in the routing
    /// table (never joined, or dropped) cannot act.
    fn resolve(&self, player_id: &str) -> Result<(String, Arc<Mutex<Room>>), GameError> {
        let code = self
            .player_rooms
            .get(player_id)
            .map(|c| c.value().clone())
            .ok_or(GameError::PlayerNotFound)?;
        let room = self.room_arc(&code)?;
        Ok((code, room))
    }

    // -- Broadcast dispatch ------------------------------------------------

    /// Best-effort fan-out to every member with a live connection, minus
    /// `exclude`. A failed delivery is logged and skipped; it never aborts
    /// delivery to the rest.
    fn broadcast_room(&self, room: &Room, msg: &ServerMsg, exclude: Option<&str>) {
        let frame = match serde_json::to_string(msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, room = %room.code, "failed to encode broadcast");
                return;
            }
        };
        for p in &room.players {
            if exclude == Some(p.id.as_str()) {
                continue;
            }
            if let Some(tx) = self.connections.get(&p.id) {
                if tx.send(frame.clone()).is_err() {
                    debug!(player_id = %p.id, room = %room.code, "dropping broadcast to closed connection");
                }
            }
        }
    }

    /// Best-effort delivery to a single player. No-op without a live
    /// connection.
    fn unicast(&self, player_id: &str, msg: &ServerMsg) {
        let frame = match serde_json::to_string(msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode unicast");
                return;
            }
        };
        match self.connections.get(player_id) {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!(player_id = %player_id, "dropping unicast to closed connection");
                }
            }
            None => debug!(player_id = %player_id, "dropping unicast, no live connection"),
        }
    }

    // -- Lobby actions -----------------------------------------------------

    pub fn create_room(&self, player_name: String, tx: OutboundSender) -> ServerMsg {
        let player_id = ident::player_id();
        let reconnect_token = ident::reconnect_token();
        let player = Player::new(player_id.clone(), player_name.clone(), reconnect_token.clone());

        // Sample codes until one is free; collisions are only transient.
        let (code, view) = loop {
            let candidate = ident::room_code();
            match self.rooms.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    let room = Room::new(candidate.clone(), player);
                    let view = room.view();
                    entry.insert(Arc::new(Mutex::new(room)));
                    break (candidate, view);
                }
            }
        };

        self.connections.insert(player_id.clone(), tx);
        self.player_rooms.insert(player_id.clone(), code.clone());

        info!(room = %code, host = %player_name, "room created");

        ServerMsg::RoomCreated {
            success: true,
            room_code: code,
            player_id,
            reconnect_token,
            room: view,
        }
    }

    pub fn join_room(
        &self,
        room_code: &str,
        player_name: String,
        tx: OutboundSender,
    ) -> Result<ServerMsg, GameError> {
        let code = room_code.to_uppercase();
        let room_arc = self.room_arc(&code)?;
        let mut room = room_arc.lock();
        if !self.rooms.contains_key(&code) {
            // The room was garbage-collected while we waited for its lock.
            return Err(GameError::RoomNotFound);
        }

        if room.game_started {
            return Err(GameError::GameAlreadyStarted);
        }
        if room.is_full() {
            return Err(GameError::RoomFull);
        }

        let player_id = ident::player_id();
        let reconnect_token = ident::reconnect_token();
        let player = Player::new(player_id.clone(), player_name.clone(), reconnect_token.clone());
        let player_view = player.view();
        room.players.push(player);

        self.connections.insert(player_id.clone(), tx);
        self.player_rooms.insert(player_id.clone(), code.clone());

        info!(room = %code, player = %player_name, "player joined room");

        self.broadcast_room(
            &room,
            &ServerMsg::PlayerJoined {
                player: player_view,
                room: room.view(),
            },
            Some(player_id.as_str()),
        );

        Ok(ServerMsg::RoomJoined {
            success: true,
            player_id,
            reconnect_token,
            room: room.view(),
        })
    }

    pub fn select_province(&self, player_id: &str, province: &str) -> Result<ServerMsg, GameError> {
        let (code, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        room.select_province(player_id, province)?;

        if let Some(player) = room.player(player_id) {
            info!(room = %code, player = %player.name, province = %province, "province selected");
        }

        self.broadcast_room(
            &room,
            &ServerMsg::ProvinceSelected {
                player_id: player_id.to_string(),
                province: province.to_string(),
                room: room.view(),
            },
            None,
        );

        Ok(ServerMsg::success_with(format!("{province} selected")))
    }

    pub fn set_ready(&self, player_id: &str, ready: bool) -> Result<ServerMsg, GameError> {
        let (_, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        let player = room
            .player_mut(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        if player.province.is_empty() {
            return Err(GameError::NoProvinceSelected);
        }
        player.ready = ready;

        self.broadcast_room(
            &room,
            &ServerMsg::PlayerReady {
                player_id: player_id.to_string(),
                ready,
                room: room.view(),
            },
            None,
        );

        if room.all_ready() {
            self.broadcast_room(
                &room,
                &ServerMsg::AllReady {
                    message: "All players are ready! The host can start the game.".to_string(),
                },
                None,
            );
        }

        Ok(ServerMsg::success())
    }

    // -- Turn coordination -------------------------------------------------

    pub fn start_game(&self, player_id: &str) -> Result<ServerMsg, GameError> {
        let (code, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        room.start_game(player_id)?;

        let first_player = room
            .current_player_id
            .as_ref()
            .and_then(|id| room.player(id))
            .map(Player::view)
            .ok_or(GameError::PlayerNotFound)?;

        info!(room = %code, "game started");

        self.broadcast_room(
            &room,
            &ServerMsg::GameStarted {
                room: room.view(),
                first_player,
            },
            None,
        );

        Ok(ServerMsg::success())
    }

    pub fn end_turn(&self, player_id: &str) -> Result<ServerMsg, GameError> {
        let (_, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        let advance = room.end_turn(player_id)?;

        self.broadcast_room(
            &room,
            &ServerMsg::TurnEnded {
                previous_player: advance.previous,
                current_player: advance.current.clone(),
                room: room.view(),
                game_state: room.game_state.clone(),
            },
            None,
        );

        Ok(ServerMsg::Success {
            message: None,
            next_player: Some(advance.current),
        })
    }

    // -- Diplomacy ---------------------------------------------------------

    pub fn diplomacy(
        &self,
        player_id: &str,
        action: DiplomacyAction,
        target_id: &str,
    ) -> Result<ServerMsg, GameError> {
        let (_, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        let actor = room
            .player(player_id)
            .ok_or(GameError::PlayerNotFound)?
            .view();
        let target = room
            .player(target_id)
            .ok_or(GameError::TargetNotFound)?
            .view();

        match action {
            DiplomacyAction::ProposeAlliance => {
                room.propose(ProposalKind::Alliance, player_id, target_id);
                self.unicast(
                    target_id,
                    &ServerMsg::AllianceProposal {
                        message: format!(
                            "{} ({}) proposes an alliance!",
                            actor.name, actor.province
                        ),
                        from_player: actor,
                    },
                );
                Ok(ServerMsg::success_with("alliance proposal sent"))
            }

            DiplomacyAction::ProposeTrade => {
                room.propose(ProposalKind::Trade, player_id, target_id);
                self.unicast(
                    target_id,
                    &ServerMsg::TradeProposal {
                        message: format!(
                            "{} ({}) proposes a trade agreement!",
                            actor.name, actor.province
                        ),
                        from_player_id: player_id.to_string(),
                        from_player: actor,
                    },
                );
                Ok(ServerMsg::success_with("trade proposal sent"))
            }

            DiplomacyAction::ProposePeace => {
                if room.active_war_mut(player_id, target_id).is_none() {
                    return Err(GameError::NoActiveWar);
                }
                room.propose(ProposalKind::Peace, player_id, target_id);
                self.unicast(
                    target_id,
                    &ServerMsg::PeaceProposal {
                        message: format!("{} ({}) proposes peace!", actor.name, actor.province),
                        from_player_id: player_id.to_string(),
                        from_player: actor,
                    },
                );
                Ok(ServerMsg::success_with("peace proposal sent"))
            }

            DiplomacyAction::DeclareWar => {
                let war_id = room.declare_war(player_id, target_id);
                self.broadcast_room(
                    &room,
                    &ServerMsg::WarDeclared {
                        war_id,
                        message: format!(
                            "{} ({}) declared war on {} ({})!",
                            actor.name, actor.province, target.name, target.province
                        ),
                        attacker: actor,
                        defender: target,
                    },
                    None,
                );
                Ok(ServerMsg::success_with("war declared"))
            }

            DiplomacyAction::Battle => {
                let attacker_army = room
                    .player(player_id)
                    .map(Player::army)
                    .ok_or(GameError::PlayerNotFound)?;
                let defender_army = room
                    .player(target_id)
                    .map(Player::army)
                    .ok_or(GameError::TargetNotFound)?;

                let outcome = resolve_battle(attacker_army, defender_army, &mut room.rng);

                if let Some(p) = room.player_mut(player_id) {
                    p.set_army(outcome.attacker_army);
                }
                if let Some(p) = room.player_mut(target_id) {
                    p.set_army(outcome.defender_army);
                }

                let turn = room.current_turn;
                if let Some(war) = room.active_war_mut(player_id, target_id) {
                    war.battles.push(WarLogEntry::Battle {
                        turn,
                        winner: outcome.winner,
                        attacker_losses: outcome.attacker_losses,
                        defender_losses: outcome.defender_losses,
                    });
                }

                let result_msg = match outcome.winner {
                    BattleSide::Attacker => format!("{} won the battle!", actor.name),
                    BattleSide::Defender => format!("{} held the defense!", target.name),
                };
                let message = format!(
                    "{result_msg} Attacker losses: {}, defender losses: {}",
                    outcome.attacker_losses, outcome.defender_losses
                );

                // Views with post-battle armies.
                let attacker_view = room
                    .player(player_id)
                    .map(Player::view)
                    .ok_or(GameError::PlayerNotFound)?;
                let defender_view = room
                    .player(target_id)
                    .map(Player::view)
                    .ok_or(GameError::TargetNotFound)?;

                self.broadcast_room(
                    &room,
                    &ServerMsg::BattleResult {
                        attacker: attacker_view,
                        defender: defender_view,
                        winner: outcome.winner,
                        attacker_losses: outcome.attacker_losses,
                        defender_losses: outcome.defender_losses,
                        message,
                    },
                    None,
                );
                Ok(ServerMsg::success_with(result_msg))
            }

            DiplomacyAction::AcceptAlliance => {
                if !room.take_proposal(ProposalKind::Alliance, target_id, player_id) {
                    return Err(GameError::NoPendingProposal);
                }
                room.add_alliance(player_id, target_id);
                self.broadcast_room(
                    &room,
                    &ServerMsg::AllianceFormed {
                        message: format!("{} and {} formed an alliance!", actor.name, target.name),
                        player1: actor,
                        player2: target,
                    },
                    None,
                );
                Ok(ServerMsg::success_with("alliance formed"))
            }

            DiplomacyAction::RejectAlliance => {
                if !room.take_proposal(ProposalKind::Alliance, target_id, player_id) {
                    return Err(GameError::NoPendingProposal);
                }
                self.unicast(
                    target_id,
                    &ServerMsg::AllianceRejected {
                        message: format!("{} rejected your alliance proposal.", actor.name),
                        from_player: actor,
                    },
                );
                Ok(ServerMsg::success_with("alliance rejected"))
            }

            DiplomacyAction::AcceptTrade => {
                if !room.take_proposal(ProposalKind::Trade, target_id, player_id) {
                    return Err(GameError::NoPendingProposal);
                }
                room.add_trade_agreement(player_id, target_id);
                self.broadcast_room(
                    &room,
                    &ServerMsg::TradeAgreementFormed {
                        message: format!(
                            "{} and {} signed a trade agreement!",
                            actor.name, target.name
                        ),
                        player1: actor,
                        player2: target,
                    },
                    None,
                );
                Ok(ServerMsg::success_with("trade agreement formed"))
            }

            DiplomacyAction::RejectTrade => {
                if !room.take_proposal(ProposalKind::Trade, target_id, player_id) {
                    return Err(GameError::NoPendingProposal);
                }
                self.unicast(
                    target_id,
                    &ServerMsg::TradeRejected {
                        message: format!("{} rejected your trade proposal.", actor.name),
                        from_player: actor,
                    },
                );
                Ok(ServerMsg::success_with("trade rejected"))
            }

            DiplomacyAction::AcceptPeace => {
                if !room.take_proposal(ProposalKind::Peace, target_id, player_id) {
                    return Err(GameError::NoPendingProposal);
                }
                let turn = room.current_turn;
                let war = room
                    .active_war_mut(player_id, target_id)
                    .ok_or(GameError::NoActiveWar)?;
                war.status = crate::game::room::WarStatus::Peace;
                war.battles.push(WarLogEntry::PeaceAgreed { turn });
                let war_id = war.id.clone();

                self.broadcast_room(
                    &room,
                    &ServerMsg::PeaceAgreed {
                        war_id,
                        message: format!("{} and {} agreed to peace!", actor.name, target.name),
                        player1: actor,
                        player2: target,
                    },
                    None,
                );
                Ok(ServerMsg::success_with("peace agreed"))
            }

            DiplomacyAction::RejectPeace => {
                if !room.take_proposal(ProposalKind::Peace, target_id, player_id) {
                    return Err(GameError::NoPendingProposal);
                }
                self.unicast(
                    target_id,
                    &ServerMsg::PeaceRejected {
                        message: format!("{} rejected your peace proposal.", actor.name),
                        from_player: actor,
                    },
                );
                Ok(ServerMsg::success_with("peace rejected"))
            }
        }
    }

    // -- Chat and state sync -----------------------------------------------

    pub fn chat(&self, player_id: &str, message: String) -> Result<ServerMsg, GameError> {
        let (_, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        let from_player = room
            .player(player_id)
            .ok_or(GameError::PlayerNotFound)?
            .view();
        let timestamp = iso_now();

        room.game_state.messages.push(crate::game::room::ChatEntry {
            from_id: from_player.id.clone(),
            from_name: from_player.name.clone(),
            message: message.clone(),
            timestamp: timestamp.clone(),
        });

        self.broadcast_room(
            &room,
            &ServerMsg::ChatMessage {
                from_player,
                message,
                timestamp,
            },
            None,
        );

        Ok(ServerMsg::success())
    }

    /// Shallow-merge a new simulation snapshot into the player's blob and
    /// republish it to the rest of the room.
    pub fn update_state(
        &self,
        player_id: &str,
        state: serde_json::Value,
    ) -> Result<ServerMsg, GameError> {
        let serde_json::Value::Object(updates) = state else {
            return Err(GameError::InvalidStateUpdate);
        };

        let (_, room_arc) = self.resolve(player_id)?;
        let mut room = room_arc.lock();

        let player = room
            .player_mut(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        match &mut player.game_state {
            serde_json::Value::Object(blob) => {
                for (key, value) in updates {
                    blob.insert(key, value);
                }
            }
            other => *other = serde_json::Value::Object(updates),
        }
        player.last_activity = iso_now();
        let view = player.view();

        self.broadcast_room(
            &room,
            &ServerMsg::PlayerStateUpdated {
                player_id: player_id.to_string(),
                player: view,
            },
            Some(player_id),
        );

        Ok(ServerMsg::success())
    }

    // -- Reconnection and disconnect ---------------------------------------

    pub fn reconnect(
        &self,
        room_code: &str,
        player_id: &str,
        token: &str,
        tx: OutboundSender,
    ) -> Result<ServerMsg, GameError> {
        let code = room_code.to_uppercase();
        let room_arc = self.room_arc(&code)?;
        let mut room = room_arc.lock();
        if !self.rooms.contains_key(&code) {
            return Err(GameError::RoomNotFound);
        }

        // Validate before touching anything: a failed reconnect must leave
        // the player record and routing tables exactly as they were.
        let player = room.player(player_id).ok_or(GameError::PlayerNotFound)?;
        if player.reconnect_token != token {
            return Err(GameError::InvalidToken);
        }

        let player = room
            .player_mut(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        player.connected = true;
        player.last_activity = iso_now();
        player.disconnect_time = String::new();
        let player_view = player.view();

        self.connections.insert(player_id.to_string(), tx);
        self.player_rooms.insert(player_id.to_string(), code.clone());

        info!(room = %code, player = %player_view.name, "player reconnected");

        self.broadcast_room(
            &room,
            &ServerMsg::PlayerReconnected {
                player: player_view,
                room: room.view(),
            },
            Some(player_id),
        );

        Ok(ServerMsg::Reconnected {
            success: true,
            player_id: player_id.to_string(),
            room: room.view(),
        })
    }

    /// Transport-level disconnect cleanup. Marks the player offline,
    /// notifies the rest of the room, and garbage-collects the room as
    /// soon as its last member drops.
    pub fn handle_disconnect(&self, player_id: &str) {
        self.connections.remove(player_id);
        let Some((_, code)) = self.player_rooms.remove(player_id) else {
            return;
        };
        let Some(room_arc) = self.rooms.get(&code).map(|r| r.value().clone()) else {
            return;
        };
        let mut room = room_arc.lock();

        let Some(player) = room.player_mut(player_id) else {
            return;
        };
        player.connected = false;
        player.disconnect_time = iso_now();
        let player_view = player.view();

        info!(room = %code, player = %player_view.name, "player disconnected");

        self.broadcast_room(
            &room,
            &ServerMsg::PlayerDisconnected {
                player: player_view,
                room: room.view(),
            },
            None,
        );

        if room.all_disconnected() {
            self.rooms.remove(&code);
            info!(room = %code, "room deleted, no connected players left");
        }
    }

    // -- Persistence entry points ------------------------------------------

    /// Capture a snapshot for saving. Host only. The actual write happens
    /// in the caller, off the room lock.
    pub fn snapshot_for_save(&self, player_id: &str) -> Result<(String, SavedRoom), GameError> {
        let (code, room_arc) = self.resolve(player_id)?;
        let room = room_arc.lock();
        if room.host_id != player_id {
            return Err(GameError::NotHost("save the room"));
        }
        Ok((code, room.to_saved()))
    }

    /// Announce a completed save to the room.
    pub fn notify_room_saved(&self, code: &str) {
        if let Some(room_arc) = self.rooms.get(code).map(|r| r.value().clone()) {
            let room = room_arc.lock();
            self.broadcast_room(
                &room,
                &ServerMsg::RoomSaved {
                    room_code: code.to_string(),
                    message: format!("room saved: {code}"),
                },
                None,
            );
        }
    }

    /// Bring a loaded snapshot back into the active table. Every player
    /// starts disconnected; they rejoin via `reconnect`.
    pub fn install_loaded(&self, saved: SavedRoom) -> Result<ServerMsg, GameError> {
        let code = saved.code.clone();
        let room = Room::from_saved(saved);
        let view = room.view();

        match self.rooms.entry(code.clone()) {
            Entry::Occupied(_) => Err(GameError::RoomAlreadyActive),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(room)));
                info!(room = %code, "room restored from snapshot");
                Ok(ServerMsg::RoomLoaded {
                    success: true,
                    room_code: code.clone(),
                    message: format!("Room {code} restored; players can reconnect"),
                    room: view,
                })
            }
        }
    }

    #[cfg(test)]
    pub fn room_view(&self, code: &str) -> Option<crate::ws::protocol::RoomView> {
        self.rooms.get(code).map(|r| r.value().lock().view())
    }
}

impl Default for RoomService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn channel() -> (OutboundSender, UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    /// Drain every frame queued on a connection, parsed as JSON.
    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("broadcast frames are JSON"));
        }
        frames
    }

    fn event_types(frames: &[Value]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f["type"].as_str().unwrap_or("").to_string())
            .collect()
    }

    struct Seat {
        id: String,
        token: String,
        rx: UnboundedReceiver<String>,
    }

    fn create(svc: &RoomService, name: &str) -> (String, Seat) {
        let (tx, rx) = channel();
        match svc.create_room(name.to_string(), tx) {
            ServerMsg::RoomCreated {
                room_code,
                player_id,
                reconnect_token,
                ..
            } => (
                room_code,
                Seat {
                    id: player_id,
                    token: reconnect_token,
                    rx,
                },
            ),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    fn join(svc: &RoomService, code: &str, name: &str) -> Seat {
        let (tx, rx) = channel();
        match svc.join_room(code, name.to_string(), tx).expect("join") {
            ServerMsg::RoomJoined {
                player_id,
                reconnect_token,
                ..
            } => Seat {
                id: player_id,
                token: reconnect_token,
                rx,
            },
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    /// Two seated players with distinct provinces, game not yet started.
    fn lobby() -> (RoomService, String, Seat, Seat) {
        let svc = RoomService::new();
        let (code, host) = create(&svc, "Alice");
        let guest = join(&svc, &code, "Bob");
        svc.select_province(&host.id, "Rumelia").unwrap();
        svc.select_province(&guest.id, "Egypt").unwrap();
        (svc, code, host, guest)
    }

    fn started() -> (RoomService, String, Seat, Seat) {
        let (svc, code, host, guest) = lobby();
        svc.start_game(&host.id).unwrap();
        (svc, code, host, guest)
    }

    // -- Rooms -------------------------------------------------------------

    #[test]
    fn create_room_issues_code_id_and_token() {
        let svc = RoomService::new();
        let (code, host) = create(&svc, "Alice");

        assert_eq!(code.len(), 6);
        assert_eq!(host.id.len(), 12);
        assert_eq!(host.token.len(), 32);
        assert!(svc.is_active(&code));
        assert_eq!(svc.connected_players(), 1);
    }

    #[test]
    fn join_unknown_room_fails() {
        let svc = RoomService::new();
        let (tx, _rx) = channel();
        assert_eq!(
            svc.join_room("ZZZZZZ", "Bob".to_string(), tx).unwrap_err(),
            GameError::RoomNotFound
        );
    }

    #[test]
    fn join_is_case_insensitive_on_code() {
        let svc = RoomService::new();
        let (code, _host) = create(&svc, "Alice");
        let (tx, _rx) = channel();
        assert!(svc
            .join_room(&code.to_lowercase(), "Bob".to_string(), tx)
            .is_ok());
    }

    #[test]
    fn join_started_room_fails_without_membership_change() {
        let (svc, code, _host, _guest) = started();
        let (tx, _rx) = channel();

        assert_eq!(
            svc.join_room(&code, "Carol".to_string(), tx).unwrap_err(),
            GameError::GameAlreadyStarted
        );
        assert_eq!(svc.room_view(&code).unwrap().players.len(), 2);
    }

    #[test]
    fn join_full_room_fails() {
        let svc = RoomService::new();
        let (code, _host) = create(&svc, "Alice");
        for i in 1..crate::game::room::DEFAULT_MAX_PLAYERS {
            join(&svc, &code, &format!("Player{i}"));
        }

        let (tx, _rx) = channel();
        assert_eq!(
            svc.join_room(&code, "Extra".to_string(), tx).unwrap_err(),
            GameError::RoomFull
        );
    }

    #[test]
    fn join_notifies_existing_members() {
        let svc = RoomService::new();
        let (code, mut host) = create(&svc, "Alice");
        let _guest = join(&svc, &code, "Bob");

        let frames = drain(&mut host.rx);
        assert_eq!(event_types(&frames), vec!["player_joined"]);
        assert_eq!(frames[0]["player"]["name"], "Bob");
    }

    // -- Provinces ---------------------------------------------------------

    #[test]
    fn select_taken_province_fails() {
        let svc = RoomService::new();
        let (code, host) = create(&svc, "Alice");
        let guest = join(&svc, &code, "Bob");

        svc.select_province(&host.id, "Rumelia").unwrap();
        assert_eq!(
            svc.select_province(&guest.id, "Rumelia").unwrap_err(),
            GameError::ProvinceUnavailable
        );
    }

    #[test]
    fn select_province_broadcasts_remaining_list() {
        let svc = RoomService::new();
        let (code, mut host) = create(&svc, "Alice");
        let _guest = join(&svc, &code, "Bob");
        drain(&mut host.rx);

        svc.select_province(&host.id, "Rumelia").unwrap();

        let frames = drain(&mut host.rx);
        assert_eq!(event_types(&frames), vec!["province_selected"]);
        let available = frames[0]["room"]["available_provinces"].as_array().unwrap();
        assert!(!available.iter().any(|p| p == "Rumelia"));
    }

    // -- Ready -------------------------------------------------------------

    #[test]
    fn ready_requires_a_province() {
        let svc = RoomService::new();
        let (_code, host) = create(&svc, "Alice");
        assert_eq!(
            svc.set_ready(&host.id, true).unwrap_err(),
            GameError::NoProvinceSelected
        );
    }

    #[test]
    fn all_ready_broadcast_fires_once_everyone_is_ready() {
        let (svc, _code, mut host, guest) = lobby();
        drain(&mut host.rx);

        svc.set_ready(&host.id, true).unwrap();
        let frames = drain(&mut host.rx);
        assert_eq!(event_types(&frames), vec!["player_ready"]);

        svc.set_ready(&guest.id, true).unwrap();
        let frames = drain(&mut host.rx);
        assert_eq!(event_types(&frames), vec!["player_ready", "all_ready"]);
    }

    // -- Turn flow (full scenario) ------------------------------------------

    #[test]
    fn two_player_turn_scenario() {
        let (svc, code, mut host, mut guest) = lobby();

        svc.start_game(&host.id).unwrap();
        let frames = drain(&mut guest.rx);
        let started = frames
            .iter()
            .find(|f| f["type"] == "game_started")
            .expect("game_started broadcast");
        assert_eq!(started["room"]["game_started"], true);
        assert_eq!(started["room"]["current_player_id"], host.id.as_str());
        assert_eq!(started["first_player"]["id"], host.id.as_str());

        // Host ends their turn: guest is up, still turn 1.
        let reply = svc.end_turn(&host.id).unwrap();
        assert!(
            matches!(&reply, ServerMsg::Success { next_player: Some(p), .. } if p == &guest.id)
        );
        let view = svc.room_view(&code).unwrap();
        assert_eq!(view.current_player_id.as_deref(), Some(guest.id.as_str()));
        assert_eq!(view.current_turn, 1);

        // Guest ends theirs: ring wraps, turn 2, calendar advances a day.
        svc.end_turn(&guest.id).unwrap();
        let view = svc.room_view(&code).unwrap();
        assert_eq!(view.current_player_id.as_deref(), Some(host.id.as_str()));
        assert_eq!(view.current_turn, 2);
        assert_eq!(view.game_state.day, 2);

        let frames = drain(&mut host.rx);
        assert!(event_types(&frames).contains(&"turn_ended".to_string()));
    }

    #[test]
    fn end_turn_out_of_order_is_rejected() {
        let (svc, _code, _host, guest) = started();
        assert_eq!(
            svc.end_turn(&guest.id).unwrap_err(),
            GameError::NotYourTurn
        );
    }

    // -- Diplomacy ---------------------------------------------------------

    #[test]
    fn alliance_proposal_is_unicast_to_target() {
        let (svc, _code, mut host, mut guest) = started();
        drain(&mut host.rx);
        drain(&mut guest.rx);

        svc.diplomacy(&host.id, DiplomacyAction::ProposeAlliance, &guest.id)
            .unwrap();

        assert_eq!(event_types(&drain(&mut guest.rx)), vec!["alliance_proposal"]);
        assert!(drain(&mut host.rx).is_empty(), "proposer gets no broadcast");
    }

    #[test]
    fn accept_alliance_requires_pending_proposal() {
        let (svc, code, host, guest) = started();

        assert_eq!(
            svc.diplomacy(&guest.id, DiplomacyAction::AcceptAlliance, &host.id)
                .unwrap_err(),
            GameError::NoPendingProposal
        );

        svc.diplomacy(&host.id, DiplomacyAction::ProposeAlliance, &guest.id)
            .unwrap();
        svc.diplomacy(&guest.id, DiplomacyAction::AcceptAlliance, &host.id)
            .unwrap();

        let view = svc.room_view(&code).unwrap();
        assert_eq!(view.game_state.alliances.len(), 1);
    }

    #[test]
    fn reject_trade_consumes_proposal_and_notifies_proposer() {
        let (svc, code, mut host, guest) = started();
        drain(&mut host.rx);

        svc.diplomacy(&host.id, DiplomacyAction::ProposeTrade, &guest.id)
            .unwrap();
        svc.diplomacy(&guest.id, DiplomacyAction::RejectTrade, &host.id)
            .unwrap();

        assert_eq!(event_types(&drain(&mut host.rx)), vec!["trade_rejected"]);
        assert!(svc.room_view(&code).unwrap().game_state.trade_agreements.is_empty());

        // Consumed: accepting afterwards is invalid.
        assert_eq!(
            svc.diplomacy(&guest.id, DiplomacyAction::AcceptTrade, &host.id)
                .unwrap_err(),
            GameError::NoPendingProposal
        );
    }

    #[test]
    fn declare_war_and_battle_update_armies_and_log() {
        let (svc, code, host, guest) = started();

        svc.diplomacy(&host.id, DiplomacyAction::DeclareWar, &guest.id)
            .unwrap();
        svc.diplomacy(&host.id, DiplomacyAction::Battle, &guest.id)
            .unwrap();

        let view = svc.room_view(&code).unwrap();
        assert_eq!(view.game_state.wars.len(), 1);
        assert_eq!(view.game_state.wars[0].battles.len(), 1);

        // Both sides start at 500; battle losses land in [10%, 70%].
        for player in &view.players {
            let army = player.game_state["army"].as_u64().unwrap();
            assert!((150..=450).contains(&army), "army out of range: {army}");
        }
    }

    #[test]
    fn peace_requires_war_and_flips_status() {
        let (svc, code, host, guest) = started();

        assert_eq!(
            svc.diplomacy(&host.id, DiplomacyAction::ProposePeace, &guest.id)
                .unwrap_err(),
            GameError::NoActiveWar
        );

        svc.diplomacy(&host.id, DiplomacyAction::DeclareWar, &guest.id)
            .unwrap();
        svc.diplomacy(&host.id, DiplomacyAction::ProposePeace, &guest.id)
            .unwrap();
        svc.diplomacy(&guest.id, DiplomacyAction::AcceptPeace, &host.id)
            .unwrap();

        let view = svc.room_view(&code).unwrap();
        assert_eq!(view.game_state.wars.len(), 1, "war record is kept");
        assert_eq!(
            view.game_state.wars[0].status,
            crate::game::room::WarStatus::Peace
        );
    }

    #[test]
    fn diplomacy_with_unknown_target_fails() {
        let (svc, _code, host, _guest) = started();
        assert_eq!(
            svc.diplomacy(&host.id, DiplomacyAction::DeclareWar, "nobody")
                .unwrap_err(),
            GameError::TargetNotFound
        );
    }

    // -- Chat / state sync --------------------------------------------------

    #[test]
    fn chat_reaches_everyone_and_lands_in_history() {
        let (svc, code, mut host, mut guest) = lobby();
        drain(&mut host.rx);
        drain(&mut guest.rx);

        svc.chat(&host.id, "hello".to_string()).unwrap();

        for rx in [&mut host.rx, &mut guest.rx] {
            let frames = drain(rx);
            assert_eq!(event_types(&frames), vec!["chat_message"]);
            assert_eq!(frames[0]["message"], "hello");
        }
        assert_eq!(svc.room_view(&code).unwrap().game_state.messages.len(), 1);
    }

    #[test]
    fn update_state_merges_and_excludes_sender() {
        let (svc, code, mut host, mut guest) = lobby();
        drain(&mut host.rx);
        drain(&mut guest.rx);

        svc.update_state(&host.id, json!({"gold": 1500, "morale": "high"}))
            .unwrap();

        assert!(drain(&mut host.rx).is_empty());
        let frames = drain(&mut guest.rx);
        assert_eq!(event_types(&frames), vec!["player_state_updated"]);

        let view = svc.room_view(&code).unwrap();
        let blob = &view.players[0].game_state;
        assert_eq!(blob["gold"], 1500);
        assert_eq!(blob["morale"], "high");
        // Untouched keys survive the merge.
        assert_eq!(blob["army"], 500);
    }

    #[test]
    fn update_state_rejects_non_object() {
        let (svc, _code, host, _guest) = lobby();
        assert_eq!(
            svc.update_state(&host.id, json!(42)).unwrap_err(),
            GameError::InvalidStateUpdate
        );
    }

    // -- Disconnect / reconnect --------------------------------------------

    #[test]
    fn disconnect_notifies_room_and_keeps_it_while_members_remain() {
        let (svc, code, host, mut guest) = lobby();
        drain(&mut guest.rx);

        svc.handle_disconnect(&host.id);

        let frames = drain(&mut guest.rx);
        assert_eq!(event_types(&frames), vec!["player_disconnected"]);
        assert_eq!(frames[0]["player"]["connected"], false);
        assert!(svc.is_active(&code));
        assert_eq!(svc.connected_players(), 1);
    }

    #[test]
    fn room_is_garbage_collected_when_last_member_drops() {
        let (svc, code, host, guest) = lobby();

        svc.handle_disconnect(&host.id);
        svc.handle_disconnect(&guest.id);

        assert!(!svc.is_active(&code));
        assert_eq!(svc.active_rooms(), 0);
    }

    #[test]
    fn disconnected_player_cannot_act() {
        let (svc, _code, host, _guest) = started();
        svc.handle_disconnect(&host.id);

        assert_eq!(
            svc.end_turn(&host.id).unwrap_err(),
            GameError::PlayerNotFound
        );
    }

    #[test]
    fn reconnect_with_wrong_token_mutates_nothing() {
        let (svc, code, host, _guest) = lobby();
        svc.handle_disconnect(&host.id);

        let (tx, _rx) = channel();
        assert_eq!(
            svc.reconnect(&code, &host.id, "wrong-token", tx).unwrap_err(),
            GameError::InvalidToken
        );

        let view = svc.room_view(&code).unwrap();
        let player = view.players.iter().find(|p| p.id == host.id).unwrap();
        assert!(!player.connected);
        assert_eq!(svc.connected_players(), 1);
    }

    #[test]
    fn reconnect_with_valid_token_restores_the_seat() {
        let (svc, code, host, mut guest) = lobby();
        svc.handle_disconnect(&host.id);
        drain(&mut guest.rx);

        let (tx, _rx) = channel();
        let reply = svc.reconnect(&code, &host.id, &host.token, tx).unwrap();
        assert!(matches!(reply, ServerMsg::Reconnected { success: true, .. }));

        let view = svc.room_view(&code).unwrap();
        let player = view.players.iter().find(|p| p.id == host.id).unwrap();
        assert!(player.connected);
        // Province survives the round trip untouched.
        assert_eq!(player.province, "Rumelia");

        assert_eq!(event_types(&drain(&mut guest.rx)), vec!["player_reconnected"]);
    }

    #[test]
    fn reconnect_to_unknown_room_fails() {
        let svc = RoomService::new();
        let (tx, _rx) = channel();
        assert_eq!(
            svc.reconnect("ZZZZZZ", "p1", "token", tx).unwrap_err(),
            GameError::RoomNotFound
        );
    }

    #[test]
    fn reconnect_unknown_player_fails() {
        let (svc, code, _host, _guest) = lobby();
        let (tx, _rx) = channel();
        assert_eq!(
            svc.reconnect(&code, "stranger", "token", tx).unwrap_err(),
            GameError::PlayerNotFound
        );
    }

    // -- Persistence entry points ------------------------------------------

    #[test]
    fn snapshot_is_host_only() {
        let (svc, code, host, guest) = started();

        assert_eq!(
            svc.snapshot_for_save(&guest.id).unwrap_err(),
            GameError::NotHost("save the room")
        );

        let (saved_code, saved) = svc.snapshot_for_save(&host.id).unwrap();
        assert_eq!(saved_code, code);
        assert_eq!(saved.players.len(), 2);
        assert!(saved.game_started);
    }

    #[test]
    fn loaded_room_requires_reconnect_with_original_token() {
        let (svc, code, host, guest) = started();
        let (_, saved) = svc.snapshot_for_save(&host.id).unwrap();

        // Simulate a restart: everyone drops, the room is collected.
        svc.handle_disconnect(&host.id);
        svc.handle_disconnect(&guest.id);
        assert!(!svc.is_active(&code));

        let reply = svc.install_loaded(saved).unwrap();
        assert!(matches!(reply, ServerMsg::RoomLoaded { success: true, .. }));

        let view = svc.room_view(&code).unwrap();
        assert!(view.players.iter().all(|p| !p.connected));
        assert!(view.game_started);

        let (tx, _rx) = channel();
        assert_eq!(
            svc.reconnect(&code, &host.id, "bogus", tx).unwrap_err(),
            GameError::InvalidToken
        );
        let (tx, _rx) = channel();
        svc.reconnect(&code, &host.id, &host.token, tx).unwrap();
        assert_eq!(svc.connected_players(), 1);
    }

    #[test]
    fn install_loaded_rejects_active_code() {
        let (svc, _code, host, _guest) = started();
        let (_, saved) = svc.snapshot_for_save(&host.id).unwrap();

        assert_eq!(
            svc.install_loaded(saved).unwrap_err(),
            GameError::RoomAlreadyActive
        );
    }
}

//! WebSocket protocol message definitions
//! These are the wire types for client-server communication
//!
//! Inbound envelopes are tagged by `action`, outbound by `type`. The
//! `diplomacy` action carries its sub-action in `action_type` because the
//! envelope tag already occupies the `action` key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::diplomacy::BattleSide;
use crate::game::room::GameState;

fn default_player_name() -> String {
    "Anonymous".to_string()
}

fn default_true() -> bool {
    true
}

fn default_state() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Open a new room; the sender becomes host and first seat
    CreateRoom {
        #[serde(default = "default_player_name")]
        player_name: String,
    },

    /// Join an existing room by code
    JoinRoom {
        room_code: String,
        #[serde(default = "default_player_name")]
        player_name: String,
    },

    /// Claim a province in the lobby
    SelectProvince { player_id: String, province: String },

    /// Toggle readiness
    Ready {
        player_id: String,
        #[serde(default = "default_true")]
        ready: bool,
    },

    /// Start the game (host only)
    StartGame { player_id: String },

    /// Pass the turn to the next seat
    EndTurn { player_id: String },

    /// Diplomatic action against another room member
    Diplomacy {
        player_id: String,
        action_type: DiplomacyAction,
        target_id: String,
    },

    /// Room-wide chat message
    Chat {
        player_id: String,
        #[serde(default)]
        message: String,
    },

    /// Replace/merge the sender's simulation snapshot
    UpdateState {
        player_id: String,
        #[serde(default = "default_state")]
        state: Value,
    },

    /// Resume a dropped seat with the reconnect token
    Reconnect {
        room_code: String,
        player_id: String,
        reconnect_token: String,
    },

    /// Persist the room (host only)
    SaveRoom { player_id: String },

    /// Restore a saved room so its players can reconnect
    LoadRoom { room_code: String },

    /// Liveness probe
    Ping,
}

/// Diplomacy sub-actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiplomacyAction {
    ProposeAlliance,
    DeclareWar,
    Battle,
    ProposeTrade,
    AcceptAlliance,
    RejectAlliance,
    AcceptTrade,
    RejectTrade,
    ProposePeace,
    AcceptPeace,
    RejectPeace,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Direct reply: room opened, caller seated as host
    RoomCreated {
        success: bool,
        room_code: String,
        player_id: String,
        reconnect_token: String,
        room: RoomView,
    },

    /// Direct reply: caller seated in an existing room
    RoomJoined {
        success: bool,
        player_id: String,
        reconnect_token: String,
        room: RoomView,
    },

    /// Broadcast: someone else took a seat
    PlayerJoined { player: PlayerView, room: RoomView },

    /// Broadcast: a member claimed a province
    ProvinceSelected {
        player_id: String,
        province: String,
        room: RoomView,
    },

    /// Broadcast: a member changed readiness
    PlayerReady {
        player_id: String,
        ready: bool,
        room: RoomView,
    },

    /// Broadcast: every member is ready, the host may start
    AllReady { message: String },

    /// Broadcast: the game began
    GameStarted {
        room: RoomView,
        first_player: PlayerView,
    },

    /// Broadcast: the turn passed
    TurnEnded {
        previous_player: String,
        current_player: String,
        room: RoomView,
        game_state: GameState,
    },

    /// Unicast to the target of an alliance offer
    AllianceProposal { from_player: PlayerView, message: String },

    /// Unicast to the target of a trade offer
    TradeProposal {
        from_player: PlayerView,
        from_player_id: String,
        message: String,
    },

    /// Unicast to the target of a peace offer
    PeaceProposal {
        from_player: PlayerView,
        from_player_id: String,
        message: String,
    },

    /// Broadcast: a war was opened
    WarDeclared {
        war_id: String,
        attacker: PlayerView,
        defender: PlayerView,
        message: String,
    },

    /// Broadcast: a battle resolved; views carry post-battle armies
    BattleResult {
        attacker: PlayerView,
        defender: PlayerView,
        winner: BattleSide,
        attacker_losses: u64,
        defender_losses: u64,
        message: String,
    },

    /// Broadcast: alliance accepted
    AllianceFormed {
        player1: PlayerView,
        player2: PlayerView,
        message: String,
    },

    /// Unicast to the original proposer
    AllianceRejected { from_player: PlayerView, message: String },

    /// Broadcast: trade agreement accepted
    TradeAgreementFormed {
        player1: PlayerView,
        player2: PlayerView,
        message: String,
    },

    /// Unicast to the original proposer
    TradeRejected { from_player: PlayerView, message: String },

    /// Broadcast: an active war ended in peace (the record stays)
    PeaceAgreed {
        war_id: String,
        player1: PlayerView,
        player2: PlayerView,
        message: String,
    },

    /// Unicast to the original proposer
    PeaceRejected { from_player: PlayerView, message: String },

    /// Broadcast chat line
    ChatMessage {
        from_player: PlayerView,
        message: String,
        timestamp: String,
    },

    /// Broadcast: a member pushed a new simulation snapshot
    PlayerStateUpdated { player_id: String, player: PlayerView },

    /// Direct reply: reconnection accepted
    Reconnected {
        success: bool,
        player_id: String,
        room: RoomView,
    },

    /// Broadcast: a dropped member came back
    PlayerReconnected { player: PlayerView, room: RoomView },

    /// Broadcast: a member's transport dropped
    PlayerDisconnected { player: PlayerView, room: RoomView },

    /// Broadcast: the room was persisted
    RoomSaved { room_code: String, message: String },

    /// Direct reply: a saved room is active again, awaiting reconnects
    RoomLoaded {
        success: bool,
        room_code: String,
        room: RoomView,
        message: String,
    },

    /// Direct reply to `ping`
    Pong,

    /// Generic command acknowledgement
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_player: Option<String>,
    },

    /// Error reply; the connection stays open
    Error { message: String },
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::Success {
            message: None,
            next_player: None,
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
            next_player: None,
        }
    }
}

/// Player info as seen on the wire. The reconnect token is deliberately
/// absent: it goes only to its owner, once, inside the direct
/// create/join reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub province: String,
    pub ready: bool,
    pub connected: bool,
    pub game_state: Value,
}

/// Full room state as seen on the wire. `available_provinces` is
/// recomputed for every view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub code: String,
    pub host_id: String,
    pub players: Vec<PlayerView>,
    pub max_players: usize,
    pub game_started: bool,
    pub current_turn: u32,
    pub current_player_id: Option<String>,
    pub available_provinces: Vec<String>,
    pub game_state: GameState,
}

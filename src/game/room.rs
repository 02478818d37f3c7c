//! Room state - membership, turn rotation, calendar, diplomatic records
//!
//! A `Room` is the authoritative record of one game session. Seat order is
//! join order and doubles as the turn ring; it is never reshuffled. All
//! mutation happens under the room's lock in the service layer, so the
//! methods here are plain synchronous state transitions.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::game::error::GameError;
use crate::game::provinces::PROVINCES;
use crate::util::time::iso_now;
use crate::ws::protocol::{PlayerView, RoomView};

pub const DEFAULT_MAX_PLAYERS: usize = 20;

/// Fixed month lengths; the game calendar is not leap-year aware.
const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Pending diplomatic proposals are dropped after this long without a
/// response.
const PROPOSAL_TTL: Duration = Duration::from_secs(600);

/// One player's seat in a room.
///
/// `game_state` is the player's simulation snapshot. The coordinator
/// stores and republishes it without interpreting it, with one exception:
/// the battle resolver reads the `army` field.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub province: String,
    pub ready: bool,
    pub connected: bool,
    pub reconnect_token: String,
    pub last_activity: String,
    pub disconnect_time: String,
    pub game_state: Value,
}

impl Player {
    pub fn new(id: String, name: String, reconnect_token: String) -> Self {
        Self {
            id,
            name,
            province: String::new(),
            ready: false,
            connected: true,
            reconnect_token,
            last_activity: iso_now(),
            disconnect_time: String::new(),
            game_state: initial_player_state(),
        }
    }

    /// Wire representation. Never includes the reconnect token.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id.clone(),
            name: self.name.clone(),
            province: self.province.clone(),
            ready: self.ready,
            connected: self.connected,
            game_state: self.game_state.clone(),
        }
    }

    /// Current army size from the opaque snapshot, defaulting when the
    /// client never reported one.
    pub fn army(&self) -> u64 {
        self.game_state
            .get("army")
            .and_then(Value::as_u64)
            .unwrap_or(100)
    }

    pub fn set_army(&mut self, army: u64) {
        if let Value::Object(map) = &mut self.game_state {
            map.insert("army".to_string(), json!(army));
        }
    }
}

/// Starting simulation snapshot for a newly seated player.
pub fn initial_player_state() -> Value {
    json!({
        "gold": 1000,
        "population": 10000,
        "army": 500,
        "resources": {
            "food": 100,
            "wood": 100,
            "stone": 50,
            "iron": 25
        },
        "buildings": []
    })
}

/// Shared game state: calendar plus the diplomatic ledger and chat log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub alliances: Vec<Alliance>,
    pub wars: Vec<War>,
    pub trade_agreements: Vec<TradeAgreement>,
    pub messages: Vec<ChatEntry>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            year: 1520,
            month: 1,
            day: 1,
            alliances: Vec::new(),
            wars: Vec::new(),
            trade_agreements: Vec::new(),
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alliance {
    pub player1: String,
    pub player2: String,
    pub started_turn: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeAgreement {
    pub player1: String,
    pub player2: String,
    pub started_turn: u32,
}

/// War records are append-only: peace flips the status and logs an event,
/// but the record itself is never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct War {
    pub id: String,
    pub attacker: String,
    pub defender: String,
    pub status: WarStatus,
    pub started_turn: u32,
    pub battles: Vec<WarLogEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarStatus {
    Active,
    Peace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WarLogEntry {
    Battle {
        turn: u32,
        winner: crate::game::diplomacy::BattleSide,
        attacker_losses: u64,
        defender_losses: u64,
    },
    PeaceAgreed {
        turn: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatEntry {
    pub from_id: String,
    pub from_name: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalKind {
    Alliance,
    Trade,
    Peace,
}

/// A diplomatic offer awaiting accept/reject. Transient: lives only in
/// the active room, never serialized.
#[derive(Debug)]
struct PendingProposal {
    kind: ProposalKind,
    from: String,
    to: String,
    created_at: Instant,
}

/// Result of a successful `end_turn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnAdvance {
    pub previous: String,
    pub current: String,
    pub wrapped: bool,
}

pub struct Room {
    pub code: String,
    pub host_id: String,
    /// Seat order; fixed once assigned.
    pub players: Vec<Player>,
    pub max_players: usize,
    pub game_started: bool,
    pub current_turn: u32,
    pub current_player_id: Option<String>,
    pub game_state: GameState,
    proposals: Vec<PendingProposal>,
    /// Battle roll source, seeded per room.
    pub rng: ChaCha8Rng,
}

impl Room {
    pub fn new(code: String, host: Player) -> Self {
        let host_id = host.id.clone();
        Self {
            code,
            host_id,
            players: vec![host],
            max_players: DEFAULT_MAX_PLAYERS,
            game_started: false,
            current_turn: 0,
            current_player_id: None,
            game_state: GameState::default(),
            proposals: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.player(id).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn all_disconnected(&self) -> bool {
        self.players.iter().all(|p| !p.connected)
    }

    /// Catalog minus provinces already claimed by a member. Recomputed on
    /// every call, never stored.
    pub fn available_provinces(&self) -> Vec<String> {
        PROVINCES
            .iter()
            .filter(|prov| !self.players.iter().any(|p| p.province == **prov))
            .map(|prov| prov.to_string())
            .collect()
    }

    /// Claim a province for a member. Fails if the province is unknown or
    /// already held by any member, including the caller.
    pub fn select_province(&mut self, player_id: &str, province: &str) -> Result<(), GameError> {
        if !self.available_provinces().iter().any(|p| p == province) {
            return Err(GameError::ProvinceUnavailable);
        }
        let player = self
            .player_mut(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        player.province = province.to_string();
        Ok(())
    }

    /// Every member ready, with a province, and enough of them to play.
    pub fn all_ready(&self) -> bool {
        self.players.len() >= 2 && self.players.iter().all(|p| p.ready && !p.province.is_empty())
    }

    pub fn start_game(&mut self, caller: &str) -> Result<(), GameError> {
        if self.host_id != caller {
            return Err(GameError::NotHost("start the game"));
        }
        if self.players.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }
        for p in &self.players {
            if p.province.is_empty() {
                return Err(GameError::PlayerMissingProvince(p.name.clone()));
            }
        }

        self.game_started = true;
        self.current_turn = 1;
        self.current_player_id = Some(self.players[0].id.clone());
        Ok(())
    }

    /// Advance the turn ring. On wrap the turn counter increments and the
    /// calendar moves one day.
    pub fn end_turn(&mut self, caller: &str) -> Result<TurnAdvance, GameError> {
        if self.current_player_id.as_deref() != Some(caller) {
            return Err(GameError::NotYourTurn);
        }

        let idx = self
            .players
            .iter()
            .position(|p| p.id == caller)
            .ok_or(GameError::PlayerNotFound)?;
        let next_idx = (idx + 1) % self.players.len();
        let next_id = self.players[next_idx].id.clone();
        self.current_player_id = Some(next_id.clone());

        let wrapped = next_idx == 0;
        if wrapped {
            self.current_turn += 1;
            self.advance_calendar();
        }

        Ok(TurnAdvance {
            previous: caller.to_string(),
            current: next_id,
            wrapped,
        })
    }

    fn advance_calendar(&mut self) {
        let state = &mut self.game_state;
        state.day += 1;
        if state.day > MONTH_LENGTHS[(state.month - 1) as usize] {
            state.day = 1;
            state.month += 1;
            if state.month > 12 {
                state.month = 1;
                state.year += 1;
            }
        }
    }

    // -- Diplomacy ---------------------------------------------------------

    /// Record a pending proposal. Re-proposing the same (kind, pair)
    /// refreshes the existing entry instead of stacking a duplicate.
    pub fn propose(&mut self, kind: ProposalKind, from: &str, to: &str) {
        self.prune_proposals(PROPOSAL_TTL);
        if let Some(existing) = self
            .proposals
            .iter_mut()
            .find(|p| p.kind == kind && p.from == from && p.to == to)
        {
            existing.created_at = Instant::now();
            return;
        }
        self.proposals.push(PendingProposal {
            kind,
            from: from.to_string(),
            to: to.to_string(),
            created_at: Instant::now(),
        });
    }

    /// Consume the pending proposal matching (kind, from, to). Returns
    /// false if none is live, in which case the response is invalid.
    pub fn take_proposal(&mut self, kind: ProposalKind, from: &str, to: &str) -> bool {
        self.prune_proposals(PROPOSAL_TTL);
        match self
            .proposals
            .iter()
            .position(|p| p.kind == kind && p.from == from && p.to == to)
        {
            Some(idx) => {
                self.proposals.remove(idx);
                true
            }
            None => false,
        }
    }

    fn prune_proposals(&mut self, ttl: Duration) {
        self.proposals.retain(|p| p.created_at.elapsed() < ttl);
    }

    #[cfg(test)]
    pub fn expire_all_proposals(&mut self) {
        self.prune_proposals(Duration::ZERO);
    }

    pub fn add_alliance(&mut self, player1: &str, player2: &str) {
        let turn = self.current_turn;
        self.game_state.alliances.push(Alliance {
            player1: player1.to_string(),
            player2: player2.to_string(),
            started_turn: turn,
        });
    }

    pub fn add_trade_agreement(&mut self, player1: &str, player2: &str) {
        let turn = self.current_turn;
        self.game_state.trade_agreements.push(TradeAgreement {
            player1: player1.to_string(),
            player2: player2.to_string(),
            started_turn: turn,
        });
    }

    /// Open a war between two members. Returns the new war id.
    pub fn declare_war(&mut self, attacker: &str, defender: &str) -> String {
        let id = format!(
            "war_{}_{}_{}",
            self.current_turn,
            short_id(attacker),
            short_id(defender)
        );
        let turn = self.current_turn;
        self.game_state.wars.push(War {
            id: id.clone(),
            attacker: attacker.to_string(),
            defender: defender.to_string(),
            status: WarStatus::Active,
            started_turn: turn,
            battles: Vec::new(),
        });
        id
    }

    /// The active war between two members, regardless of which side
    /// declared it.
    pub fn active_war_mut(&mut self, a: &str, b: &str) -> Option<&mut War> {
        self.game_state.wars.iter_mut().find(|w| {
            w.status == WarStatus::Active
                && ((w.attacker == a && w.defender == b) || (w.attacker == b && w.defender == a))
        })
    }

    // -- Views and snapshots ----------------------------------------------

    pub fn view(&self) -> RoomView {
        RoomView {
            code: self.code.clone(),
            host_id: self.host_id.clone(),
            players: self.players.iter().map(Player::view).collect(),
            max_players: self.max_players,
            game_started: self.game_started,
            current_turn: self.current_turn,
            current_player_id: self.current_player_id.clone(),
            available_provinces: self.available_provinces(),
            game_state: self.game_state.clone(),
        }
    }

    pub fn to_saved(&self) -> SavedRoom {
        SavedRoom {
            code: self.code.clone(),
            host_id: self.host_id.clone(),
            max_players: self.max_players,
            game_started: self.game_started,
            current_turn: self.current_turn,
            current_player_id: self.current_player_id.clone(),
            game_state: self.game_state.clone(),
            players: self
                .players
                .iter()
                .map(|p| SavedPlayer {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    province: p.province.clone(),
                    ready: p.ready,
                    reconnect_token: p.reconnect_token.clone(),
                    game_state: p.game_state.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a room from a snapshot. Every player starts disconnected
    /// and must present their original reconnect token to rejoin.
    pub fn from_saved(saved: SavedRoom) -> Self {
        Self {
            code: saved.code,
            host_id: saved.host_id,
            players: saved
                .players
                .into_iter()
                .map(|p| Player {
                    id: p.id,
                    name: p.name,
                    province: p.province,
                    ready: p.ready,
                    connected: false,
                    reconnect_token: p.reconnect_token,
                    last_activity: iso_now(),
                    disconnect_time: String::new(),
                    game_state: p.game_state,
                })
                .collect(),
            max_players: saved.max_players,
            game_started: saved.game_started,
            current_turn: saved.current_turn,
            current_player_id: saved.current_player_id,
            game_state: saved.game_state,
            proposals: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..4).unwrap_or(id)
}

/// Durable snapshot of a room, the unit of persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedRoom {
    pub code: String,
    pub host_id: String,
    pub max_players: usize,
    pub game_started: bool,
    pub current_turn: u32,
    pub current_player_id: Option<String>,
    pub game_state: GameState,
    pub players: Vec<SavedPlayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedPlayer {
    pub id: String,
    pub name: String,
    pub province: String,
    pub ready: bool,
    pub reconnect_token: String,
    pub game_state: Value,
}

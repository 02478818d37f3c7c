//! Game domain model - rooms, players, turn rotation, diplomacy

pub mod diplomacy;
pub mod error;
pub mod provinces;
pub mod room;

pub use diplomacy::{resolve_battle, BattleOutcome, BattleSide};
pub use error::GameError;
pub use room::{GameState, Player, Room, SavedPlayer, SavedRoom};

//! Error taxonomy for room and game actions
//!
//! Every variant maps to an `error` reply on the wire; none of them
//! terminate the connection. Room state is never mutated on the error
//! path.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("room not found")]
    RoomNotFound,

    #[error("game already started")]
    GameAlreadyStarted,

    #[error("room is full")]
    RoomFull,

    #[error("player not found")]
    PlayerNotFound,

    #[error("target player not found")]
    TargetNotFound,

    #[error("province is not available")]
    ProvinceUnavailable,

    #[error("select a province first")]
    NoProvinceSelected,

    #[error("{0} has not selected a province yet")]
    PlayerMissingProvince(String),

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("at least 2 players are required")]
    NotEnoughPlayers,

    #[error("it is not your turn")]
    NotYourTurn,

    #[error("invalid reconnect token")]
    InvalidToken,

    #[error("no pending proposal to respond to")]
    NoPendingProposal,

    #[error("no active war with this player")]
    NoActiveWar,

    #[error("room is already active")]
    RoomAlreadyActive,

    #[error("no saved room with this code")]
    SaveNotFound,

    #[error("state update must be a JSON object")]
    InvalidStateUpdate,
}

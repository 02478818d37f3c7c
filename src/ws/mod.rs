//! WebSocket gateway - connection handling and wire protocol

pub mod handler;
pub mod protocol;

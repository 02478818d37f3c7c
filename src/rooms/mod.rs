//! Room coordination - the single owner of all live session state

pub mod service;

pub use service::{OutboundSender, RoomService};

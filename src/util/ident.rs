//! Random identifier generation - room codes, player ids, reconnect tokens

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Room codes are short so players can read them aloud.
pub const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const PLAYER_ID_LEN: usize = 12;
const PLAYER_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Reconnect tokens carry enough entropy that guessing one is infeasible.
pub const RECONNECT_TOKEN_LEN: usize = 32;

/// Generate a room code candidate. Uniqueness against the active room
/// table is the caller's responsibility (retry on collision).
pub fn room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())] as char)
        .collect()
}

/// Generate a player id. No dedup check: 12 chars over a 36-symbol
/// alphabet makes collisions effectively impossible.
pub fn player_id() -> String {
    let mut rng = rand::thread_rng();
    (0..PLAYER_ID_LEN)
        .map(|_| PLAYER_ID_CHARSET[rng.gen_range(0..PLAYER_ID_CHARSET.len())] as char)
        .collect()
}

/// Generate a reconnect token. Issued once per player and never reissued.
pub fn reconnect_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECONNECT_TOKEN_LEN)
        .map(char::from)
        .collect()
}

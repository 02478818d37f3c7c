//! Flat-file snapshots - one file per room code
//!
//! The same snapshot the keyed table stores, written to
//! `<data-dir>/<CODE>.json` with a `saved_at` stamp. Room codes map
//! directly to file names, so anything that is not plain alphanumeric is
//! refused before touching the filesystem.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::game::room::SavedRoom;
use crate::store::StoreError;
use crate::util::time::iso_now;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(flatten)]
    room: SavedRoom,
    saved_at: String,
}

pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn save(&self, room: &SavedRoom) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let text = serde_json::to_string_pretty(&SnapshotFile {
            room: room.clone(),
            saved_at: iso_now(),
        })?;
        fs::write(self.dir.join(format!("{}.json", room.code)), text)?;
        Ok(())
    }

    pub fn load(&self, code: &str) -> Result<Option<SavedRoom>, StoreError> {
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(None);
        }
        let path = self.dir.join(format!("{code}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&text)?;
        Ok(Some(file.room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::{GameState, SavedPlayer};
    use serde_json::json;

    fn saved_room(code: &str) -> SavedRoom {
        SavedRoom {
            code: code.to_string(),
            host_id: "p1".to_string(),
            max_players: 20,
            game_started: false,
            current_turn: 0,
            current_player_id: None,
            game_state: GameState::default(),
            players: vec![SavedPlayer {
                id: "p1".to_string(),
                name: "Alice".to_string(),
                province: String::new(),
                ready: false,
                reconnect_token: "tok".to_string(),
                game_state: json!({"gold": 1000}),
            }],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotDir::new(dir.path().join("saves"));

        let room = saved_room("AAA111");
        store.save(&room).unwrap();

        assert_eq!(store.load("AAA111").unwrap(), Some(room));
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotDir::new(dir.path().join("saves"));
        assert!(store.load("NOPE42").unwrap().is_none());
    }

    #[test]
    fn load_refuses_non_alphanumeric_codes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotDir::new(dir.path().to_path_buf());
        assert!(store.load("../etc/passwd").unwrap().is_none());
        assert!(store.load("").unwrap().is_none());
    }

    #[test]
    fn snapshot_file_carries_saved_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotDir::new(dir.path().to_path_buf());
        store.save(&saved_room("AAA111")).unwrap();

        let text = fs::read_to_string(dir.path().join("AAA111.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("saved_at").is_some());
        assert_eq!(value["code"], "AAA111");
    }
}

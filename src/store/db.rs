//! Keyed snapshot table
//!
//! One file on disk holding every saved room as a row keyed by room code,
//! with creation/update timestamps preserved across re-saves. Writes go
//! through a temp file and rename so a crash mid-write cannot truncate
//! the whole table.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::game::room::SavedRoom;
use crate::store::StoreError;
use crate::util::time::iso_now;

/// One row of the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRow {
    pub data: SavedRoom,
    pub created_at: String,
    pub updated_at: String,
    pub game_started: bool,
}

pub struct RoomDatabase {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the table file.
    lock: Mutex<()>,
}

impl RoomDatabase {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Upsert a room. `created_at` survives re-saves; `updated_at` always
    /// moves forward.
    pub fn save(&self, room: &SavedRoom) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut table = self.read_table()?;

        let now = iso_now();
        let created_at = table
            .get(&room.code)
            .map(|row| row.created_at.clone())
            .unwrap_or_else(|| now.clone());

        table.insert(
            room.code.clone(),
            RoomRow {
                data: room.clone(),
                created_at,
                updated_at: now,
                game_started: room.game_started,
            },
        );

        self.write_table(&table)
    }

    pub fn load(&self, code: &str) -> Result<Option<SavedRoom>, StoreError> {
        let _guard = self.lock.lock();
        let table = self.read_table()?;
        Ok(table.get(code).map(|row| row.data.clone()))
    }

    pub fn delete(&self, code: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock();
        let mut table = self.read_table()?;
        let removed = table.remove(code).is_some();
        if removed {
            self.write_table(&table)?;
        }
        Ok(removed)
    }

    /// Delete rows whose `updated_at` is older than `cutoff`. Returns the
    /// number of rows removed. Rows with unparseable timestamps are kept.
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.lock.lock();
        let mut table = self.read_table()?;
        let before = table.len();

        table.retain(|code, row| match DateTime::parse_from_rfc3339(&row.updated_at) {
            Ok(updated) => {
                let keep = updated.with_timezone(&Utc) >= cutoff;
                if !keep {
                    warn!(room = %code, "removing stale room snapshot");
                }
                keep
            }
            Err(_) => true,
        });

        let removed = before - table.len();
        if removed > 0 {
            self.write_table(&table)?;
        }
        Ok(removed)
    }

    fn read_table(&self) -> Result<BTreeMap<String, RoomRow>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_table(&self, table: &BTreeMap<String, RoomRow>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(table)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    #[cfg(test)]
    fn row(&self, code: &str) -> Option<RoomRow> {
        self.read_table().ok()?.get(code).cloned()
    }
}

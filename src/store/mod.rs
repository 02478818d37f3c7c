//! Durable room snapshots
//!
//! Two backends with identical semantics: a keyed table in a single file
//! and one flat file per room code. `save` writes both; `load` prefers
//! the table and falls back to the flat file. All disk I/O runs on the
//! blocking pool so a slow write never stalls message delivery on the
//! connection tasks, while callers still await a definite result.

pub mod db;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::game::room::SavedRoom;

pub use db::RoomDatabase;
pub use snapshot::SnapshotDir;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("background store task failed")]
    Background,
}

#[derive(Clone)]
pub struct RoomStore {
    db: Arc<RoomDatabase>,
    files: Arc<SnapshotDir>,
}

impl RoomStore {
    pub fn new(db_path: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            db: Arc::new(RoomDatabase::new(db_path)),
            files: Arc::new(SnapshotDir::new(data_dir)),
        }
    }

    /// Upsert the snapshot into both backends.
    pub async fn save(&self, room: SavedRoom) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        let files = Arc::clone(&self.files);
        tokio::task::spawn_blocking(move || {
            db.save(&room)?;
            files.save(&room)
        })
        .await
        .map_err(|_| StoreError::Background)?
    }

    /// Fetch a snapshot by room code: keyed table first, flat file second.
    pub async fn load(&self, code: &str) -> Result<Option<SavedRoom>, StoreError> {
        let db = Arc::clone(&self.db);
        let files = Arc::clone(&self.files);
        let code = code.to_string();
        tokio::task::spawn_blocking(move || match db.load(&code)? {
            Some(room) => Ok(Some(room)),
            None => files.load(&code),
        })
        .await
        .map_err(|_| StoreError::Background)?
    }

    /// Retention pass over the keyed table. Explicit only: nothing calls
    /// this on a schedule.
    pub async fn cleanup_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<usize, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.cleanup_older_than(cutoff))
            .await
            .map_err(|_| StoreError::Background)?
    }
}

//! Application state shared across connections

use std::sync::Arc;

use crate::config::Config;
use crate::rooms::RoomService;
use crate::store::RoomStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The single owner of all live room/connection state
    pub rooms: Arc<RoomService>,
    /// Durable snapshot backends
    pub store: RoomStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let store = RoomStore::new(config.db_path.clone(), config.data_dir.clone());
        let rooms = Arc::new(RoomService::new());

        Self {
            config,
            rooms,
            store,
        }
    }
}

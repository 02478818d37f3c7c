//! Time utilities

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Current wall-clock time as an ISO-8601 string, used for activity
/// stamps and persistence timestamps
pub fn iso_now() -> String {
    Utc::now().to_rfc3339()
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_now_parses_back() {
        let stamp = iso_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }

    #[test]
    fn unix_millis_is_nonzero() {
        assert!(unix_millis() > 0);
    }
}

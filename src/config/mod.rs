//! Configuration module - CLI arguments plus environment

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "province-game-server")]
#[command(about = "Room coordination server for a multiplayer province strategy game")]
pub struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8765)]
    pub port: u16,

    /// Directory for flat-file room snapshots
    #[arg(long, default_value = "saved_rooms")]
    pub data_dir: PathBuf,

    /// Path of the keyed snapshot table
    #[arg(long, default_value = "rooms.db.json")]
    pub db_path: PathBuf,

    /// Run one retention pass at startup, deleting saved rooms not
    /// updated within this many hours
    #[arg(long)]
    pub cleanup_older_than_hours: Option<u64>,
}

/// Resolved application configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Flat-file snapshot directory
    pub data_dir: PathBuf,
    /// Keyed snapshot table path
    pub db_path: PathBuf,
    /// Optional one-shot retention threshold
    pub cleanup_older_than_hours: Option<u64>,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let server_addr = format!("{}:{}", args.host, args.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            data_dir: args.data_dir,
            db_path: args.db_path,
            cleanup_older_than_hours: args.cleanup_older_than_hours,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let args = Args::try_parse_from(["province-game-server"]).unwrap();
        let config = Config::from_args(args).unwrap();

        assert_eq!(config.server_addr.to_string(), "0.0.0.0:8765");
        assert_eq!(config.data_dir, PathBuf::from("saved_rooms"));
        assert_eq!(config.db_path, PathBuf::from("rooms.db.json"));
        assert!(config.cleanup_older_than_hours.is_none());
    }

    #[test]
    fn host_and_port_flags_override_defaults() {
        let args = Args::try_parse_from([
            "province-game-server",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
        ])
        .unwrap();
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.server_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn unparseable_host_is_rejected() {
        let args =
            Args::try_parse_from(["province-game-server", "--host", "not an address"]).unwrap();
        assert!(matches!(
            Config::from_args(args),
            Err(ConfigError::InvalidAddress)
        ));
    }
}

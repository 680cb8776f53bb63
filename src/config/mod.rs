//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// PostgREST base URL of the persistence gateway
    pub database_url: String,
    /// Service-role key for the gateway (server only, bypasses RLS)
    pub database_service_key: String,
    /// JWT secret for verifying tokens issued by the auth service
    pub jwt_secret: String,

    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Maximum ELO difference for pairing two queued players
    pub elo_threshold: i32,
    /// Seconds between matchmaking pairing sweeps
    pub pairing_interval_secs: u64,
    /// Duration of each match phase in seconds
    pub phase_seconds: u64,
    /// Turn count after which a match is force-ended
    pub max_turns: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting providers usually inject PORT; fall back to SERVER_ADDR
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_service_key: env::var("DATABASE_SERVICE_KEY")
                .map_err(|_| ConfigError::Missing("DATABASE_SERVICE_KEY"))?,
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN")
                .map_err(|_| ConfigError::Missing("CLIENT_ORIGIN"))?,

            elo_threshold: parse_or("ELO_THRESHOLD", 200)?,
            pairing_interval_secs: parse_or("PAIRING_INTERVAL_SECS", 2)?,
            phase_seconds: parse_or("PHASE_SECONDS", 60)?,
            max_turns: parse_or("MAX_TURNS", 30)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database location and pool sizing.
    pub database: DatabaseConfig,
    /// HTTP server bind address.
    pub http: HttpConfig,
    /// Uploaded asset storage.
    pub uploads: UploadConfig,
    /// Logging level and format.
    pub logging: LoggingConfig,
    /// HTTP client behavior for remote participant sessions.
    pub client: ClientConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Maximum pool connections.
    pub max_connections: u32,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Address the API server binds to.
    pub bind: SocketAddr,
}

/// Uploaded asset configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory brand images are written to.
    pub dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// Line-delimited JSON output.
    Json,
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/iat.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let bind_raw = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string());
        let http = HttpConfig {
            bind: bind_raw.parse().map_err(|_| AppError::Config {
                message: format!("BIND_ADDR is not a valid socket address: {}", bind_raw),
            })?,
        };

        let uploads = UploadConfig {
            dir: PathBuf::from(
                env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            ),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let client = ClientConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
        };

        Ok(Config {
            database,
            http,
            uploads,
            logging,
            client,
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

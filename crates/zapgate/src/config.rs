//! Environment-driven configuration.
//!
//! Every knob has a default so the service starts with no environment at
//! all; malformed numeric values fall back to the default with a warning
//! instead of refusing to boot.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

// ============================================================================
// Defaults
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_clients_file() -> PathBuf {
    PathBuf::from("./clients.json")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("./.zap_sessions")
}

fn default_message_prefix() -> String {
    "Pergunta:".to_string()
}

/// 5 MiB, matching the historical request body limit.
fn default_request_size_limit() -> usize {
    5 * 1024 * 1024
}

fn default_request_timeout() -> u64 {
    300
}

fn default_qr_poll_interval_ms() -> u64 {
    1000
}

fn default_qr_wait_timeout() -> u64 {
    60
}

fn default_send_timeout() -> u64 {
    30
}

/// Every 4 hours, matching the historical cleanup cron.
fn default_cleanup_interval() -> u64 {
    4 * 60 * 60
}

fn default_bridge_command() -> String {
    "zapgate-bridge".to_string()
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to (`HOST`).
    pub host: String,
    /// Port to listen on (`PORT`).
    pub port: u16,
    /// Path of the persisted session snapshot (`CLIENTS_FILE_PATH`).
    pub clients_file: PathBuf,
    /// Directory holding per-client bridge session data (`SESSIONS_DIR`).
    pub sessions_dir: PathBuf,
    /// Prefix an inbound message must carry to be relayed (`MESSAGE_PREFIX`).
    pub message_prefix: String,
    /// Maximum request body size in bytes (`REQUEST_SIZE_LIMIT_BYTES`).
    pub request_size_limit: usize,
    /// Whole-request timeout in seconds (`REQUEST_TIMEOUT_SECONDS`).
    pub request_timeout_seconds: u64,
    /// QR cache poll interval in milliseconds (`QR_POLL_INTERVAL_MS`).
    pub qr_poll_interval_ms: u64,
    /// Upper bound on waiting for a QR code, seconds (`QR_WAIT_TIMEOUT_SECONDS`).
    pub qr_wait_timeout_seconds: u64,
    /// Upper bound on waiting for a send acknowledgement, seconds
    /// (`SEND_TIMEOUT_SECONDS`).
    pub send_timeout_seconds: u64,
    /// Stale-session sweep interval in seconds, 0 disables
    /// (`CLEANUP_INTERVAL_SECONDS`).
    pub cleanup_interval_seconds: u64,
    /// Bridge executable spawned per client (`BRIDGE_COMMAND`).
    pub bridge_command: String,
    /// Extra arguments for the bridge, whitespace-separated (`BRIDGE_ARGS`).
    pub bridge_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            clients_file: default_clients_file(),
            sessions_dir: default_sessions_dir(),
            message_prefix: default_message_prefix(),
            request_size_limit: default_request_size_limit(),
            request_timeout_seconds: default_request_timeout(),
            qr_poll_interval_ms: default_qr_poll_interval_ms(),
            qr_wait_timeout_seconds: default_qr_wait_timeout(),
            send_timeout_seconds: default_send_timeout(),
            cleanup_interval_seconds: default_cleanup_interval(),
            bridge_command: default_bridge_command(),
            bridge_args: Vec::new(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            host: env_string("HOST", default_host),
            port: env_parse("PORT", default_port),
            clients_file: env_path("CLIENTS_FILE_PATH", default_clients_file),
            sessions_dir: env_path("SESSIONS_DIR", default_sessions_dir),
            message_prefix: env_string("MESSAGE_PREFIX", default_message_prefix),
            request_size_limit: env_parse("REQUEST_SIZE_LIMIT_BYTES", default_request_size_limit),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", default_request_timeout),
            qr_poll_interval_ms: env_parse("QR_POLL_INTERVAL_MS", default_qr_poll_interval_ms),
            qr_wait_timeout_seconds: env_parse("QR_WAIT_TIMEOUT_SECONDS", default_qr_wait_timeout),
            send_timeout_seconds: env_parse("SEND_TIMEOUT_SECONDS", default_send_timeout),
            cleanup_interval_seconds: env_parse(
                "CLEANUP_INTERVAL_SECONDS",
                default_cleanup_interval,
            ),
            bridge_command: env_string("BRIDGE_COMMAND", default_bridge_command),
            bridge_args: std::env::var("BRIDGE_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    pub fn qr_poll_interval(&self) -> Duration {
        Duration::from_millis(self.qr_poll_interval_ms)
    }

    pub fn qr_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_wait_timeout_seconds)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }
}

// ============================================================================
// Env Helpers
// ============================================================================

fn env_string(key: &str, default: fn() -> String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default(),
    }
}

fn env_path(key: &str, default: fn() -> PathBuf) -> PathBuf {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => default(),
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: fn() -> T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid value in environment, using default");
                default()
            }
        },
        Err(_) => default(),
    }
}

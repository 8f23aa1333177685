//! Server configuration from TOML or environment

use ledepeche::DispatchSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::ApiError;

/// Default host address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port number
pub const DEFAULT_PORT: u16 = 47270;

/// Default CORS origins (localhost for development)
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Maximum number of WebSocket connections
pub const MAX_WS_CONNECTIONS: usize = 100;

/// WebSocket heartbeat interval in seconds
pub const WS_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Delay between submissions, sized to the provider's rate limit
pub const DEFAULT_PACING_INTERVAL_MS: u64 = 110;

/// Delay before the loading indicator resets
pub const DEFAULT_LOADING_RESET_DELAY_MS: u64 = 5_000;

/// Upper bound on one provider submission
pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 10_000;

/// Maximum accepted upload size (5 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Typed number lists at or above this size must be uploaded as a file
pub const DEFAULT_MAX_TYPED_DESTINATIONS: usize = 1000;

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "LESERVE_CONFIG";

/// Server configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,

    /// Maximum WebSocket connections
    pub max_ws_connections: usize,

    /// WebSocket heartbeat interval in seconds
    pub ws_heartbeat_interval_secs: u64,

    /// Enable request logging
    pub enable_logging: bool,

    /// Log level for tracing
    pub log_level: String,

    /// Sleep after each submission in milliseconds
    pub pacing_interval_ms: u64,

    /// Delay before `loading` resets to `null`, in milliseconds
    pub loading_reset_delay_ms: u64,

    /// Provider submission timeout in milliseconds
    pub submit_timeout_ms: u64,

    /// Messaging provider API root
    pub provider_base_url: String,

    /// Capacity of the progress broadcast channel
    pub event_buffer: usize,

    /// Maximum request body size for uploads
    pub max_upload_bytes: usize,

    /// Limit on typed (not uploaded) destinations
    pub max_typed_destinations: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            max_ws_connections: MAX_WS_CONNECTIONS,
            ws_heartbeat_interval_secs: WS_HEARTBEAT_INTERVAL_SECS,
            enable_logging: true,
            log_level: "info".to_string(),
            pacing_interval_ms: DEFAULT_PACING_INTERVAL_MS,
            loading_reset_delay_ms: DEFAULT_LOADING_RESET_DELAY_MS,
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT_MS,
            provider_base_url: ledepeche::provider::DEFAULT_TELNYX_BASE_URL.to_string(),
            event_buffer: ledepeche::emitter::DEFAULT_EVENT_BUFFER,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_typed_destinations: DEFAULT_MAX_TYPED_DESTINATIONS,
        }
    }
}

impl ServerConfig {
    /// Load config: defaults, then the TOML file named by `LESERVE_CONFIG`, then env overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the named config file cannot be read or parsed.
    pub fn load() -> Result<Self, ApiError> {
        let base = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// Load config from a TOML file; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApiError::internal(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ApiError::internal(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Apply environment overrides
    ///
    /// Environment variables:
    /// - `LESERVE_HOST` - Server host
    /// - `LESERVE_PORT` - Server port
    /// - `LESERVE_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
    /// - `LESERVE_PACING_MS` - Pacing interval in milliseconds
    /// - `LESERVE_PROVIDER_URL` - Messaging provider API root
    fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("LESERVE_HOST") {
            self.host = host;
        }

        if let Ok(port_str) = std::env::var("LESERVE_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.port = port;
            }
        }

        if let Ok(log_level) = std::env::var("LESERVE_LOG_LEVEL") {
            self.log_level = log_level;
        }

        if let Ok(pacing) = std::env::var("LESERVE_PACING_MS") {
            if let Ok(pacing) = pacing.parse::<u64>() {
                self.pacing_interval_ms = pacing;
            }
        }

        if let Ok(url) = std::env::var("LESERVE_PROVIDER_URL") {
            self.provider_base_url = url;
        }

        self
    }

    /// Get the socket address for the server
    ///
    /// # Errors
    ///
    /// Returns an error message if host and port do not form an address.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("Invalid address: {}", e))
    }

    /// Get the full server URL
    #[must_use]
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the WebSocket URL
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/ws/events", self.host, self.port)
    }

    /// Timing knobs for the dispatch controller
    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            pacing_interval: Duration::from_millis(self.pacing_interval_ms),
            loading_reset_delay: Duration::from_millis(self.loading_reset_delay_ms),
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be zero".to_string());
        }

        if self.host.is_empty() {
            return Err("Host cannot be empty".to_string());
        }

        if self.max_ws_connections == 0 {
            return Err("Max WebSocket connections must be greater than zero".to_string());
        }

        if self.ws_heartbeat_interval_secs == 0 {
            return Err("Heartbeat interval must be greater than zero".to_string());
        }

        if self.pacing_interval_ms == 0 {
            return Err("Pacing interval must be greater than zero".to_string());
        }

        if self.submit_timeout_ms == 0 {
            return Err("Submit timeout must be greater than zero".to_string());
        }

        if self.event_buffer == 0 {
            return Err("Event buffer must be greater than zero".to_string());
        }

        if self.provider_base_url.trim().is_empty() {
            return Err("Provider base URL cannot be empty".to_string());
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.log_level
                ));
            }
        }

        Ok(())
    }
}

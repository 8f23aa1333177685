//! leserve - HTTP/WebSocket Server
//!
//! *Le Serve* (The Server) - Axum-based HTTP/WebSocket front end for the bulk
//! dispatch controller: run start and cancel, provider delivery webhooks, and
//! a live progress stream.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// API error types
pub mod error;

/// HTTP handlers for REST endpoints
pub mod handlers;

/// Server configuration from TOML or environment
pub mod config;

/// WebSocket event broadcasting
pub mod websocket;

/// API response types matching frontend contract
pub mod responses;

/// Server instance management
pub mod server;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use handlers::{build_app, create_router, AppState};
pub use server::LeServeServer;
pub use websocket::WsManager;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level. Output goes to stderr. Calling
/// this twice keeps the first subscriber.
pub fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.log_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

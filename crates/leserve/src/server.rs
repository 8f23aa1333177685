//! Server instance management

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::handlers::{build_app, AppState};

/// LeServe HTTP/WebSocket server
///
/// Manages Axum server lifecycle including startup and graceful shutdown.
pub struct LeServeServer {
    /// Server configuration
    config: ServerConfig,

    /// Dispatch components shared with every handler
    state: AppState,
}

impl LeServeServer {
    /// Create a server that sends through the Telnyx API
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the provider
    /// client cannot be built.
    pub fn new(config: ServerConfig) -> Result<Self, ApiError> {
        if let Err(e) = config.validate() {
            return Err(ApiError::internal(format!("Invalid config: {}", e)));
        }

        let state = AppState::with_telnyx(config.clone()).map_err(|e| {
            error!("Failed to initialize dispatch state: {}", e);
            e
        })?;

        Ok(Self { config, state })
    }

    /// Create a server around prepared state
    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config.as_ref().clone(),
            state,
        }
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, ApiError> {
        self.config
            .socket_addr()
            .map_err(|e| ApiError::internal(format!("Failed to parse address: {}", e)))
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(&self) -> Result<(), ApiError> {
        let addr = self.socket_addr()?;

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind to {}: {:?}", addr, e);
            ApiError::internal(format!("Failed to bind to {}: {}", addr, e))
        })?;

        info!("Server listening on: {}", self.server_url());
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl+C or TERM
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ApiError> {
        let app = build_app(self.state.clone());

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get server URL
    #[must_use]
    pub fn server_url(&self) -> String {
        self.config.server_url()
    }

    /// Get WebSocket URL
    #[must_use]
    pub fn websocket_url(&self) -> String {
        self.config.websocket_url()
    }
}

/// Resolves on Ctrl+C or, on unix, TERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix;
        match unix::signal(unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("Received TERM signal");
            }
            Err(e) => {
                error!("Failed to install TERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

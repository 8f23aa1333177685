//! HTTP handlers for REST endpoints

use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, ConnectInfo, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use http::{HeaderValue, Method};
use ledepeche::{
    parse_numbers, prepare_destinations, Credentials, DeliveryStatusReconciler, DeliveryWebhook,
    DispatchController, MessageProvider, ProgressEmitter, RunRequest, RunSnapshot, RunState,
    TelnyxClient,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{ApiError, ApiResult};
use crate::responses::{CancelResponse, HealthResponse, HookResponse, StartRunResponse};
use crate::websocket::{ConnectionState, WsManager, MAX_WS_FRAME_SIZE, MAX_WS_MESSAGE_SIZE};

/// JSON carried in the `data` field of a start-run form
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRunData {
    /// Provider API key
    pub api_key: String,

    /// Messaging profile the run sends from
    #[serde(alias = "msgProfileId")]
    pub messaging_profile_id: String,

    /// Message body
    pub message: String,

    /// Typed numbers, used when no file is uploaded
    pub numbers: Option<String>,
}

/// Body of a cancel request
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CancelRequest {
    /// `false` turns the request into a no-op
    pub stop_sending: Option<bool>,

    /// Only signal this run
    pub run_id: Option<Uuid>,
}

/// Query parameters for the event stream
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WsQuery {
    /// Only receive run-scoped events for this run
    pub run_id: Option<Uuid>,
}

/// State shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Dispatch state machine
    pub controller: DispatchController,

    /// Delivery callback handler
    pub reconciler: DeliveryStatusReconciler,

    /// WebSocket sessions
    pub ws: WsManager,

    /// Immutable server configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the dispatch components around `provider`
    pub fn new(config: ServerConfig, provider: Arc<dyn MessageProvider>) -> Self {
        let emitter = ProgressEmitter::new(config.event_buffer);
        let controller = DispatchController::new(
            Arc::new(RunState::new()),
            emitter.clone(),
            provider,
            config.dispatch_settings(),
        );
        let reconciler = DeliveryStatusReconciler::new(emitter.clone());
        let ws = WsManager::new(
            emitter,
            Duration::from_secs(config.ws_heartbeat_interval_secs),
        );

        Self {
            controller,
            reconciler,
            ws,
            config: Arc::new(config),
        }
    }

    /// Wire the dispatch components around the Telnyx client
    ///
    /// # Errors
    ///
    /// Returns an error if the provider HTTP client cannot be built.
    pub fn with_telnyx(config: ServerConfig) -> ApiResult<Self> {
        let client = TelnyxClient::new(
            config.provider_base_url.clone(),
            Duration::from_millis(config.submit_timeout_ms),
        )
        .map_err(|e| ApiError::internal(format!("Failed to create provider client: {}", e)))?;
        Ok(Self::new(config, Arc::new(client)))
    }
}

/// POST /api/message - Start a dispatch run from a multipart form
pub async fn start_run(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    let mut data: Option<StartRunData> = None;
    let mut file: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "data" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid data field: {}", e)))?;
                data = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| ApiError::bad_request(format!("Invalid data JSON: {}", e)))?,
                );
            }
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid file field: {}", e)))?;
                if !bytes.is_empty() {
                    let content = String::from_utf8(bytes.to_vec())
                        .map_err(|_| ApiError::validation("Uploaded file must be UTF-8 text"))?;
                    file = Some(content);
                }
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::validation("Missing data field"))?;

    let raw = match file {
        Some(content) => content,
        None => {
            let numbers = data
                .numbers
                .filter(|numbers| !numbers.trim().is_empty())
                .ok_or_else(|| {
                    ApiError::validation("Either provide a file of numbers or enter the numbers")
                })?;
            if parse_numbers(&numbers).len() >= state.config.max_typed_destinations {
                return Err(ApiError::validation(
                    "Too many numbers, upload a file instead",
                ));
            }
            numbers
        }
    };

    let destinations = prepare_destinations(parse_numbers(&raw));
    let ticket = state.controller.start(RunRequest {
        destinations,
        message: data.message,
        credentials: Credentials::new(data.api_key, data.messaging_profile_id),
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id: ticket.run_id,
            destinations: ticket.destinations,
        }),
    ))
}

/// POST /api/stop-sending - Ask the active run to stop
pub async fn stop_sending(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<CancelResponse>> {
    let request: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid cancel request: {}", e)))?
    };

    if request.stop_sending == Some(false) {
        return Ok(Json(CancelResponse::from_signalled(None)));
    }

    let signalled = state.controller.cancel(request.run_id);
    Ok(Json(CancelResponse::from_signalled(signalled)))
}

/// GET /api/runs/current - Active and most recent run
pub async fn current_run(State(state): State<AppState>) -> Json<RunSnapshot> {
    Json(state.controller.run_state().snapshot())
}

/// POST /api/hook - Provider delivery webhook
pub async fn delivery_hook(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<HookResponse>)> {
    let webhook: DeliveryWebhook = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid webhook payload: {}", e)))?;

    let outcome = state.reconciler.reconcile_webhook(webhook)?;
    let status = if outcome.published.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((status, Json(HookResponse::from_outcome(&outcome))))
}

/// GET /ws/events - Live progress stream
pub async fn ws_events(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let ip_addr = connect_info.map(|ConnectInfo(addr)| addr.to_string());
    let mut connection = ConnectionState::new(Uuid::new_v4().to_string(), ip_addr);
    if let Some(run_id) = query.run_id {
        connection.subscribe(run_id);
    }
    let conn_id = connection.id.clone();

    let events = state.ws.emitter.subscribe();
    if !state
        .ws
        .try_register(connection.clone(), state.config.max_ws_connections)
        .await
    {
        warn!("Rejecting WebSocket: connection limit reached");
        return Err(ApiError::unavailable("Too many WebSocket connections"));
    }

    let manager = state.ws.clone();
    let on_failure = state.ws.clone();
    Ok(ws
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .max_frame_size(MAX_WS_FRAME_SIZE)
        .on_failed_upgrade(move |e| {
            warn!("WebSocket upgrade failed for {}: {}", conn_id, e);
            tokio::spawn(async move { on_failure.unregister_connection(&conn_id).await });
        })
        .on_upgrade(move |socket| manager.serve_socket(socket, connection, events))
        .into_response())
}

/// GET /api/health - Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "leserve".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: state.ws.connection_count().await,
        phase: state.controller.run_state().phase(),
    })
}

/// Create router with all API endpoints
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/health", axum::routing::get(health_check))
        .route("/api/message", axum::routing::post(start_run))
        .route("/api/stop-sending", axum::routing::post(stop_sending))
        .route("/api/runs/current", axum::routing::get(current_run))
        .route("/api/hook", axum::routing::post(delivery_hook))
        .route("/ws/events", axum::routing::get(ws_events))
}

/// Router with state and middleware applied
pub fn build_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = create_router()
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors);

    if config.enable_logging {
        info!("Request logging enabled");
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    }
}

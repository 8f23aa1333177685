// Integration tests for the leserve HTTP/WebSocket surface
//
// These tests drive the router with a stub provider:
// - Multipart run start and its validation
// - Single-flight rejection
// - Cancel requests
// - Delivery webhooks
// - The live event stream over a real socket

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use ledepeche::{
    Credentials, MessageProvider, OutboundMessage, ProviderError, RunPhase, SubmissionReceipt,
};
use leserve::{build_app, AppState, ServerConfig};
use rstest::rstest;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "leserve-test-boundary";

// ============================================================================
// TEST HELPERS
// ============================================================================

#[derive(Default)]
struct StubProvider {
    seen: Mutex<Vec<String>>,
}

impl StubProvider {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl MessageProvider for StubProvider {
    async fn submit(
        &self,
        _credentials: &Credentials,
        message: OutboundMessage,
    ) -> Result<SubmissionReceipt, ProviderError> {
        self.seen.lock().expect("seen lock").push(message.to);
        Ok(SubmissionReceipt { message_id: None })
    }
}

fn config(pacing_ms: u64) -> ServerConfig {
    ServerConfig {
        pacing_interval_ms: pacing_ms,
        enable_logging: false,
        ..ServerConfig::default()
    }
}

fn state_with(pacing_ms: u64) -> (AppState, Arc<StubProvider>) {
    let provider = Arc::new(StubProvider::default());
    let state = AppState::new(config(pacing_ms), provider.clone());
    (state, provider)
}

fn data_field(numbers: Option<&str>) -> String {
    let mut data = json!({
        "apiKey": "KEY",
        "messagingProfileId": "profile-1",
        "message": "hello there",
    });
    if let Some(numbers) = numbers {
        data["numbers"] = json!(numbers);
    }
    data.to_string()
}

fn multipart_request(data: &str, file: Option<&[u8]>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"data\"\r\n\r\n{data}\r\n"
        )
        .as_bytes(),
    );
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"numbers.txt\"\r\nContent-Type: text/plain\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/message")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request builds")
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_app(state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is JSON")
    };
    (status, body)
}

async fn wait_idle(state: &AppState) {
    for _ in 0..200 {
        if state.controller.run_state().phase() == RunPhase::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run did not finish");
}

// ============================================================================
// HEALTH AND SNAPSHOT
// ============================================================================

#[tokio::test]
async fn test_health_reports_idle() {
    let (state, _) = state_with(1);
    let (status, body) = send(&state, get_request("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "leserve");
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["active_connections"], 0);
}

#[tokio::test]
async fn test_current_run_before_any_run() {
    let (state, _) = state_with(1);
    let (status, body) = send(&state, get_request("/api/runs/current")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "idle");
    assert!(body.get("activeRun").is_none());
    assert!(body.get("lastRun").is_none());
}

// ============================================================================
// RUN START
// ============================================================================

#[tokio::test]
async fn test_start_with_typed_numbers() {
    let (state, provider) = state_with(1);
    let request = multipart_request(&data_field(Some("15551230001, 15551230002")), None);
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["destinations"], 2);
    assert!(body["runId"].is_string());

    wait_idle(&state).await;
    // Submissions are detached; give the last one a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(provider.seen(), vec!["+15551230001", "+15551230002"]);

    let (_, snapshot) = send(&state, get_request("/api/runs/current")).await;
    assert_eq!(snapshot["lastRun"]["phase"], "completed");
    assert_eq!(snapshot["lastRun"]["submitted"], 2);
}

#[tokio::test]
async fn test_file_takes_precedence_over_typed_numbers() {
    let (state, provider) = state_with(1);
    let request = multipart_request(
        &data_field(Some("19990000000")),
        Some(b"15551230001,+15551230002,15551230003"),
    );
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["destinations"], 3);

    wait_idle(&state).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!provider.seen().contains(&"+19990000000".to_string()));
    assert_eq!(provider.seen().len(), 3);
}

#[tokio::test]
async fn test_start_without_numbers_is_rejected() {
    let (state, provider) = state_with(1);
    let (status, body) = send(&state, multipart_request(&data_field(None), None)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["error"],
        "Either provide a file of numbers or enter the numbers"
    );
    assert!(provider.seen().is_empty());
}

#[tokio::test]
async fn test_too_many_typed_numbers_is_rejected() {
    let (state, _) = state_with(1);
    let numbers = (0..1000)
        .map(|i| format!("1555{:07}", i))
        .collect::<Vec<_>>()
        .join(",");
    let (status, body) = send(&state, multipart_request(&data_field(Some(&numbers)), None)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Too many numbers, upload a file instead");
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let (state, _) = state_with(1);
    let data = json!({
        "apiKey": "KEY",
        "messagingProfileId": "profile-1",
        "message": "   ",
        "numbers": "15551230001",
    })
    .to_string();
    let (status, body) = send(&state, multipart_request(&data, None)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_malformed_data_json_is_bad_request() {
    let (state, _) = state_with(1);
    let (status, _) = send(&state, multipart_request("{not json", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_utf8_file_is_rejected() {
    let (state, _) = state_with(1);
    let request = multipart_request(&data_field(None), Some(&[0xff, 0xfe, 0x00, 0x31]));
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let (state, _) = state_with(60_000);
    let (first, body) = send(&state, multipart_request(&data_field(Some("1,2")), None)).await;
    assert_eq!(first, StatusCode::ACCEPTED);

    let (second, conflict) = send(&state, multipart_request(&data_field(Some("3")), None)).await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(conflict["code"], "RUN_IN_PROGRESS");

    let (_, snapshot) = send(&state, get_request("/api/runs/current")).await;
    assert_eq!(snapshot["phase"], "dispatching");
    assert_eq!(snapshot["activeRun"]["runId"], body["runId"]);

    state.controller.cancel(None);
    wait_idle(&state).await;
}

// ============================================================================
// CANCEL
// ============================================================================

#[tokio::test]
async fn test_stop_sending_without_run() {
    let (state, _) = state_with(1);
    let (status, body) = send(&state, json_request("/api/stop-sending", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_stop_sending_cancels_active_run() {
    let (state, provider) = state_with(60_000);
    let (_, started) = send(&state, multipart_request(&data_field(Some("1,2,3")), None)).await;

    let (status, body) = send(
        &state,
        json_request("/api/stop-sending", json!({ "stopSending": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["runId"], started["runId"]);

    wait_idle(&state).await;
    assert!(provider.seen().len() <= 1);

    let (_, snapshot) = send(&state, get_request("/api/runs/current")).await;
    assert_eq!(snapshot["lastRun"]["phase"], "cancelled");
}

#[tokio::test]
async fn test_stop_sending_false_is_noop() {
    let (state, _) = state_with(60_000);
    send(&state, multipart_request(&data_field(Some("1,2")), None)).await;

    let (_, body) = send(
        &state,
        json_request("/api/stop-sending", json!({ "stopSending": false })),
    )
    .await;
    assert_eq!(body["cancelled"], false);
    assert_eq!(state.controller.run_state().phase(), RunPhase::Dispatching);

    state.controller.cancel(None);
    wait_idle(&state).await;
}

// ============================================================================
// DELIVERY WEBHOOK
// ============================================================================

fn webhook(status: &str) -> Value {
    json!({
        "data": {
            "event_type": "message.finalized",
            "payload": {
                "to": [{ "phone_number": "+15551230001", "status": status }]
            }
        }
    })
}

#[rstest]
#[case("sent")]
#[case("delivered")]
#[case("failed")]
#[case("delivery_failed")]
#[tokio::test]
async fn test_hook_recognized_status_is_created(#[case] delivery: &str) {
    let (state, _) = state_with(1);
    let mut events = state.controller.emitter().subscribe();

    let (status, body) = send(&state, json_request("/api/hook", webhook(delivery))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body["response"],
        format!("Message to +15551230001 {}", delivery)
    );

    let event = events.try_recv().expect("status event published");
    assert_eq!(event.name(), "status");
}

#[tokio::test]
async fn test_hook_unrecognized_status_is_ok() {
    let (state, _) = state_with(1);
    let (status, body) = send(&state, json_request("/api/hook", webhook("queued"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Ignored status queued for +15551230001");
}

#[tokio::test]
async fn test_hook_without_recipients_is_rejected() {
    let (state, _) = state_with(1);
    let body = json!({ "data": { "payload": { "to": [] } } });
    let (status, _) = send(&state, json_request("/api/hook", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_hook_malformed_body_is_bad_request() {
    let (state, _) = state_with(1);
    let (status, _) = send(&state, json_request("/api/hook", json!({ "nope": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// EVENT STREAM
// ============================================================================

#[tokio::test]
async fn test_ws_receives_status_events() {
    let (state, _) = state_with(1);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port binds");
    let addr = listener.local_addr().expect("local addr");
    let app = build_app(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/events", addr))
        .await
        .expect("websocket connects");

    for _ in 0..200 {
        if state.ws.connection_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.ws.connection_count().await, 1);

    state
        .reconciler
        .on_provider_callback("+15551230001", "sent")
        .expect("sent is tracked");

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).expect("frame is JSON");
                    if frame["event"] != "heartbeat" {
                        return frame;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("socket closed early: {:?}", other),
            }
        }
    })
    .await
    .expect("status frame arrives");

    assert_eq!(frame["event"], "status");
    assert_eq!(frame["payload"]["destination"], "+15551230001");
    assert_eq!(frame["payload"]["status"], "sent");
    assert!(frame.get("runId").is_none());
}

#[tokio::test]
async fn test_ws_connection_limit_is_enforced() {
    let provider = Arc::new(StubProvider::default());
    let state = AppState::new(
        ServerConfig {
            max_ws_connections: 1,
            ..config(1)
        },
        provider,
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port binds");
    let addr = listener.local_addr().expect("local addr");
    let app = build_app(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let url = format!("ws://{}/ws/events", addr);
    let (_first, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("first websocket connects");
    assert_eq!(state.ws.connection_count().await, 1);

    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 503);
        }
        other => panic!("second websocket should be refused: {:?}", other.map(|_| ())),
    }
    assert_eq!(state.ws.connection_count().await, 1);
}

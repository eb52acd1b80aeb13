//! HTTP and WebSocket surface of the relay.
//!
//! Everything except `/health` sits behind the optional API key. Handlers
//! translate requests into [`RelayRequest`]s and render the actor's reply as
//! JSON; none of them touch relay state directly.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::http::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::hooks::HookEvent;
use crate::hub::{ClientSender, ConnId};
use crate::inject::InjectError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::DetectedAgent;
use crate::relay::{ChatSource, RelayError, RelayHandle, RelayRequest};
use crate::transcript::read_all_messages;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const SERVICE_NAME: &str = "agent-mobile-relay";

type JsonResponse = (StatusCode, axum::Json<Value>);

#[derive(Clone)]
struct ApiState {
    relay: RelayHandle,
    api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(relay: RelayHandle, api_key: Option<String>) -> axum::Router {
    use axum::{middleware, routing, Router};

    let state = ApiState {
        relay,
        api_key: api_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
    };

    let protected = Router::new()
        .route("/hooks", routing::post(post_hook))
        .route("/detector/sync", routing::post(post_detector_sync))
        .route("/agents", routing::get(list_agents))
        .route("/agents/{id}", routing::get(get_agent))
        .route("/agents/{id}/chat", routing::get(get_chat))
        .route("/agents/{id}/queue", routing::get(dequeue))
        .route("/agents/{id}/queue/peek", routing::get(peek_queue))
        .route("/agents/{id}/send", routing::post(send_message))
        .route("/agents/{id}/interrupt", routing::post(interrupt))
        .route("/ws", routing::get(mobile_ws))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", routing::get(health))
        .merge(protected)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

fn unauthorized_error_envelope() -> Value {
    json!({
        "error": {
            "code": "unauthorized",
            "message": "Missing or invalid API key",
            "retryable": false,
            "statusCode": 401,
        }
    })
}

async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<ApiState>,
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, JsonResponse> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    // X-API-Key header or Authorization: Bearer <token>
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| {
            request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|value| !value.is_empty())
        });

    if provided != Some(expected) {
        return Err((
            StatusCode::UNAUTHORIZED,
            axum::Json(unauthorized_error_envelope()),
        ));
    }

    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

fn error_status(error: &RelayError) -> StatusCode {
    match error {
        RelayError::UnknownAgent(_) => StatusCode::NOT_FOUND,
        RelayError::MissingField(_) => StatusCode::BAD_REQUEST,
        RelayError::Inject(InjectError::TimedOut(_)) => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Inject(_) => StatusCode::BAD_GATEWAY,
        RelayError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: RelayError) -> JsonResponse {
    (
        error_status(&error),
        axum::Json(json!({ "success": false, "error": error.to_string() })),
    )
}

async fn health(axum::extract::State(state): axum::extract::State<ApiState>) -> axum::Json<Value> {
    let snapshot = state
        .relay
        .ask(|reply| RelayRequest::Health { reply })
        .await;
    let (status, agent_count, client_count) = match snapshot {
        Ok(snapshot) => ("ok", snapshot.agent_count, snapshot.client_count),
        Err(_) => ("degraded", 0, 0),
    };
    axum::Json(json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "agentCount": agent_count,
        "wsConnections": client_count,
    }))
}

async fn post_hook(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::Json(body): axum::Json<Value>,
) -> JsonResponse {
    let event: HookEvent = match serde_json::from_value(body) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(error = %error, "rejecting malformed hook body");
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({
                    "success": false,
                    "error": "Missing required fields: eventType, agentId",
                })),
            );
        }
    };

    match state
        .relay
        .ask(|reply| RelayRequest::Hook { event, reply })
        .await
        .and_then(|result| result)
    {
        Ok(agent) => (
            StatusCode::OK,
            axum::Json(json!({ "success": true, "agent": agent })),
        ),
        Err(error) => error_response(error),
    }
}

async fn post_detector_sync(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::Json(body): axum::Json<Value>,
) -> JsonResponse {
    let agents: Vec<DetectedAgent> = match body
        .get("agents")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
    {
        Ok(Some(agents)) => agents,
        Ok(None) => return error_response(RelayError::MissingField("agents")),
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "success": false, "error": error.to_string() })),
            )
        }
    };

    match state
        .relay
        .ask(|reply| RelayRequest::DetectorSync { agents, reply })
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            axum::Json(json!({
                "success": true,
                "created": outcome.created,
                "removed": outcome.removed,
            })),
        ),
        Err(error) => error_response(error),
    }
}

async fn list_agents(axum::extract::State(state): axum::extract::State<ApiState>) -> JsonResponse {
    match state.relay.ask(|reply| RelayRequest::ListAgents { reply }).await {
        Ok(agents) => (StatusCode::OK, axum::Json(json!({ "agents": agents }))),
        Err(error) => error_response(error),
    }
}

async fn get_agent(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::extract::Path(agent_id): axum::extract::Path<String>,
) -> JsonResponse {
    let snapshot = state
        .relay
        .ask(|reply| RelayRequest::Snapshot {
            agent_id: agent_id.clone(),
            reply,
        })
        .await;
    match snapshot {
        Ok(Some(snapshot)) => match serde_json::to_value(snapshot) {
            Ok(body) => (StatusCode::OK, axum::Json(body)),
            Err(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "success": false, "error": error.to_string() })),
            ),
        },
        Ok(None) => error_response(RelayError::UnknownAgent(agent_id)),
        Err(error) => error_response(error),
    }
}

async fn get_chat(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::extract::Path(agent_id): axum::extract::Path<String>,
) -> JsonResponse {
    let source = state
        .relay
        .ask(|reply| RelayRequest::Chat {
            agent_id: agent_id.clone(),
            reply,
        })
        .await
        .and_then(|result| result);

    let messages = match source {
        Ok(ChatSource::Transcript { path, fallback }) => {
            let messages = read_all_messages(&path).await;
            if messages.is_empty() {
                fallback
            } else {
                messages
            }
        }
        Ok(ChatSource::History(history)) => history,
        Err(error) => return error_response(error),
    };

    (
        StatusCode::OK,
        axum::Json(json!({ "agentId": agent_id, "messages": messages })),
    )
}

async fn dequeue(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::extract::Path(agent_id): axum::extract::Path<String>,
) -> JsonResponse {
    let result = state
        .relay
        .ask(|reply| RelayRequest::Dequeue {
            agent_id: agent_id.clone(),
            reply,
        })
        .await;
    match result {
        Ok((message, remaining)) => (
            StatusCode::OK,
            axum::Json(json!({
                "agentId": agent_id,
                "message": message,
                "remaining": remaining,
            })),
        ),
        Err(error) => error_response(error),
    }
}

async fn peek_queue(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::extract::Path(agent_id): axum::extract::Path<String>,
) -> JsonResponse {
    let result = state
        .relay
        .ask(|reply| RelayRequest::Peek {
            agent_id: agent_id.clone(),
            reply,
        })
        .await;
    match result {
        Ok((count, messages)) => (
            StatusCode::OK,
            axum::Json(json!({
                "agentId": agent_id,
                "count": count,
                "messages": messages,
            })),
        ),
        Err(error) => error_response(error),
    }
}

async fn send_message(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::extract::Path(agent_id): axum::extract::Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> JsonResponse {
    let message = body
        .get("message")
        .or_else(|| body.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let instant = body.get("instant").and_then(Value::as_bool).unwrap_or(false);

    let result = state
        .relay
        .ask(|reply| RelayRequest::Send {
            agent_id: agent_id.clone(),
            message,
            instant,
            reply,
        })
        .await
        .and_then(|result| result);
    match result {
        Ok(receipt) => (
            StatusCode::OK,
            axum::Json(json!({
                "success": true,
                "agentId": receipt.agent_id,
                "hint": receipt.hint,
            })),
        ),
        Err(error) => error_response(error),
    }
}

async fn interrupt(
    axum::extract::State(state): axum::extract::State<ApiState>,
    axum::extract::Path(agent_id): axum::extract::Path<String>,
) -> JsonResponse {
    let result = state
        .relay
        .ask(|reply| RelayRequest::Interrupt {
            agent_id: agent_id.clone(),
            reply,
        })
        .await
        .and_then(|result| result);
    match result {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(json!({ "success": true, "agentId": agent_id })),
        ),
        Err(error) => error_response(error),
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("malformed JSON: {0}")]
    Malformed(serde_json::Error),
    #[error("invalid command: {0}")]
    Invalid(serde_json::Error),
}

/// Malformed JSON and well-formed JSON that is not a command are told apart:
/// the first is dropped, the second earns an `error` reply.
fn decode_client_frame(text: &str) -> Result<ClientMessage, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
    serde_json::from_value(value).map_err(FrameError::Invalid)
}

async fn mobile_ws(
    ws: axum::extract::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<ApiState>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_mobile_ws(socket, state.relay))
}

async fn handle_mobile_ws(mut socket: WebSocket, relay: RelayHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = match relay
        .ask(|reply| RelayRequest::Connect {
            tx: tx.clone(),
            reply,
        })
        .await
    {
        Ok(conn_id) => conn_id,
        Err(error) => {
            tracing::warn!(error = %error, "could not register WS client");
            return;
        }
    };

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(conn_id, error = %error, "failed to encode frame");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_text(&relay, conn_id, &tx, text.as_str()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(conn_id, error = %error, "WS receive failed");
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = relay.tell(RelayRequest::Disconnect { conn_id }).await;
}

/// Returns false once the relay is gone.
async fn handle_client_text(
    relay: &RelayHandle,
    conn_id: ConnId,
    tx: &ClientSender,
    text: &str,
) -> bool {
    match decode_client_frame(text) {
        Ok(command) => relay
            .tell(RelayRequest::Command { conn_id, command })
            .await
            .is_ok(),
        Err(FrameError::Malformed(error)) => {
            tracing::warn!(conn_id, error = %error, "ignoring malformed client frame");
            true
        }
        Err(error @ FrameError::Invalid(_)) => {
            let _ = tx.send(ServerMessage::error(error.to_string()));
            true
        }
    }
}


#[cfg(test)]
mod route_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{decode_client_frame, router, FrameError};
    use crate::inject::{DisabledInjector, InjectFuture, InputInjector};
    use crate::protocol::ClientMessage;
    use crate::relay::{spawn_relay, RelaySettings};

    fn live_router() -> axum::Router {
        let relay = spawn_relay(RelaySettings::default(), Arc::new(DisabledInjector));
        router(relay, None)
    }

    async fn call(
        router: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .method(method)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request should build");
        let response = router
            .clone()
            .oneshot(request)
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn hook_then_snapshot_includes_activity() {
        let router = live_router();
        let (status, body) = call(
            &router,
            "POST",
            "/hooks",
            Some(json!({
                "eventType": "PreToolUse",
                "agentId": "a1",
                "data": { "tool_name": "Grep" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agent"]["id"], "a1");

        let (status, body) = call(&router, "GET", "/agents/a1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "a1");
        assert_eq!(body["activity"][0]["content"], "▶ Grep");
    }

    #[tokio::test]
    async fn unknown_agent_is_404() {
        let router = live_router();
        let (status, _) = call(&router, "GET", "/agents/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = json!({ "message": "hi" });
        let (status, body) = call(&router, "POST", "/agents/nope/send", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn malformed_hook_is_400() {
        let router = live_router();
        let body = json!({ "eventType": "Stop" });
        let (status, _) = call(&router, "POST", "/hooks", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_queue_and_dequeue_round_trip() {
        let router = live_router();
        call(
            &router,
            "POST",
            "/hooks",
            Some(json!({ "eventType": "SessionStart", "agentId": "a1" })),
        )
        .await;

        let (status, body) = call(&router, "POST", "/agents/a1/send", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required field: message");

        let body = json!({ "message": "continue" });
        let (status, body) = call(&router, "POST", "/agents/a1/send", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agentId"], "a1");

        let (_, body) = call(&router, "GET", "/agents/a1/queue/peek", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["messages"][0]["text"], "continue");

        let (_, body) = call(&router, "GET", "/agents/a1/queue", None).await;
        assert_eq!(body["message"]["text"], "continue");
        assert_eq!(body["remaining"], 0);

        let (_, body) = call(&router, "GET", "/agents/a1/queue", None).await;
        assert_eq!(body["message"], Value::Null);
    }

    #[tokio::test]
    async fn instant_send_without_injector_is_502() {
        let router = live_router();
        call(
            &router,
            "POST",
            "/hooks",
            Some(json!({ "eventType": "SessionStart", "agentId": "a1" })),
        )
        .await;

        let (status, body) = call(
            &router,
            "POST",
            "/agents/a1/send",
            Some(json!({ "message": "go", "instant": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "no injector configured");

        let (status, _) = call(&router, "POST", "/agents/a1/interrupt", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    struct StalledInjector;

    impl InputInjector for StalledInjector {
        fn inject<'a>(&'a self, _agent_id: &'a str, _text: &'a str) -> InjectFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        }

        fn interrupt<'a>(&'a self, _agent_id: &'a str) -> InjectFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn stalled_injector_is_504() {
        let settings = RelaySettings {
            inject_timeout: Duration::from_millis(20),
            ..RelaySettings::default()
        };
        let router = router(spawn_relay(settings, Arc::new(StalledInjector)), None);
        call(
            &router,
            "POST",
            "/hooks",
            Some(json!({ "eventType": "SessionStart", "agentId": "a1" })),
        )
        .await;

        let (status, body) = call(
            &router,
            "POST",
            "/agents/a1/send",
            Some(json!({ "message": "go", "instant": true })),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("timed out"));

        let (status, _) = call(&router, "POST", "/agents/a1/interrupt", None).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn detector_sync_creates_and_removes() {
        let router = live_router();
        let (status, body) = call(
            &router,
            "POST",
            "/detector/sync",
            Some(json!({ "agents": [{ "id": "claude-1", "kind": "terminal" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], json!(["claude-1"]));

        let body = json!({ "agents": [] });
        let (_, body) = call(&router, "POST", "/detector/sync", Some(body)).await;
        assert_eq!(body["removed"], json!(["claude-1"]));

        let (_, body) = call(&router, "GET", "/agents", None).await;
        assert_eq!(body["agents"], json!([]));
    }

    #[tokio::test]
    async fn detector_sync_ignores_blank_ids() {
        let router = live_router();
        let (status, body) = call(
            &router,
            "POST",
            "/detector/sync",
            Some(json!({ "agents": [{ "id": "" }, { "id": "  " }, { "id": "claude-2" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], json!(["claude-2"]));

        let (_, body) = call(&router, "GET", "/agents", None).await;
        assert_eq!(body["agents"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_without_transcript_returns_empty_history() {
        let router = live_router();
        call(
            &router,
            "POST",
            "/hooks",
            Some(json!({ "eventType": "SessionStart", "agentId": "a1" })),
        )
        .await;
        let (status, body) = call(&router, "GET", "/agents/a1/chat", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "agentId": "a1", "messages": [] }));
    }

    #[test]
    fn client_frames_are_classified() {
        assert_eq!(
            decode_client_frame(r#"{"type":"subscribe","agentId":"a1"}"#).unwrap(),
            ClientMessage::Subscribe {
                agent_id: "a1".into()
            }
        );
        assert!(matches!(
            decode_client_frame("{not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_frame(r#"{"type":"dance"}"#),
            Err(FrameError::Invalid(_))
        ));
        assert!(matches!(
            decode_client_frame(r#"{"type":"send_message","agentId":"a1"}"#),
            Err(FrameError::Invalid(_))
        ));
    }
}

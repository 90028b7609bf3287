//! WebSocket server + REST endpoints for the approval dashboard.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{QueueEvent, Resolution};
use crate::audit::Actor;
use crate::conversation::ConsentStatus;
use crate::engine::DecisionEngine;
use crate::error::{ApprovalError, Error};
use crate::profile::{Mood, RedlineSpec, SafetyMode};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
}

/// Build the Axum router with dashboard WebSocket and REST routes.
pub fn dashboard_routes(engine: Arc<DecisionEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/{id}/resolve", post(resolve_approval))
        .route("/api/conversations/{id}/mood", post(set_mood))
        .route("/api/conversations/{id}/safety_mode", post(set_safety_mode))
        .route("/api/contacts/consent", post(set_consent))
        .route("/api/redlines", post(add_redline))
        .route("/api/redlines/{id}", delete(remove_redline))
        .route("/api/audit", get(query_audit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mirrorme"
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.engine))
}

async fn handle_socket(mut socket: WebSocket, engine: Arc<DecisionEngine>) {
    info!("WebSocket client connected");

    // Send all pending requests on connect
    let pending = engine.queue().pending().await;
    let sync = QueueEvent::Sync { pending };
    if let Ok(json) = serde_json::to_string(&sync) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            warn!("Failed to send initial sync, client disconnected");
            return;
        }
    }

    let mut rx = engine.queue().subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        let pending = engine.queue().pending().await;
                        let sync = QueueEvent::Sync { pending };
                        if let Ok(json) = serde_json::to_string(&sync) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {} // inbound messages are ignored
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

// ── Approvals ───────────────────────────────────────────────────────

async fn list_approvals(State(state): State<AppState>) -> impl IntoResponse {
    let pending = state.engine.queue().pending().await;
    Json(pending)
}

#[derive(Deserialize)]
struct ResolveRequest {
    #[serde(flatten)]
    resolution: Resolution,
    #[serde(default = "default_operator")]
    operator: String,
}

fn default_operator() -> String {
    "dashboard".into()
}

async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> impl IntoResponse {
    let request_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid request ID"})),
            );
        }
    };

    match state
        .engine
        .resolve_approval(request_id, body.resolution, &body.operator)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(serde_json::json!(request))),
        Err(Error::Approval(ApprovalError::NotFound(_))) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Request not found"})),
        ),
        Err(Error::Approval(ApprovalError::AlreadyResolved(_))) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "Request already resolved"})),
        ),
        Err(Error::Approval(ApprovalError::NothingToSend(_))) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"error": "No candidate text; edit or deny"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

// ── Conversation overrides ──────────────────────────────────────────

#[derive(Deserialize)]
struct MoodRequest {
    /// Omit to clear the override.
    mood: Option<String>,
}

async fn set_mood(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MoodRequest>,
) -> impl IntoResponse {
    let conversation_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid conversation ID"})),
            );
        }
    };
    // Unknown mood names are operator typos, not a request for the default.
    let mood = match body.mood.as_deref() {
        Some(name) => match Mood::try_parse(name) {
            Some(mood) => Some(mood),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": format!("Unknown mood: {name}")})),
                );
            }
        },
        None => None,
    };

    match state
        .engine
        .tracker()
        .set_mood_override(conversation_id, mood)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "mood": mood.map(|m| m.as_str()),
            })),
        ),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Conversation not found"})),
        ),
    }
}

#[derive(Deserialize)]
struct SafetyModeRequest {
    /// Omit to clear the override.
    mode: Option<String>,
}

async fn set_safety_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SafetyModeRequest>,
) -> impl IntoResponse {
    let conversation_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid conversation ID"})),
            );
        }
    };
    let mode = body.mode.as_deref().map(SafetyMode::parse);

    let result = state
        .engine
        .tracker()
        .set_safety_override(conversation_id, mode)
        .await;
    match result {
        Ok(()) => {
            let _ = state
                .engine
                .audit()
                .record_admin(
                    Some(conversation_id),
                    "safety_mode_changed",
                    Actor::Human {
                        operator: default_operator(),
                    },
                    mode.map(|m| m.as_str()),
                )
                .await;
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "mode": mode.map(|m| m.as_str()),
                })),
            )
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Conversation not found"})),
        ),
    }
}

// ── Consent ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ConsentRequest {
    channel: String,
    contact_id: String,
    status: String,
}

async fn set_consent(
    State(state): State<AppState>,
    Json(body): Json<ConsentRequest>,
) -> impl IntoResponse {
    let status = ConsentStatus::parse(&body.status);

    match state
        .engine
        .tracker()
        .set_consent(&body.channel, &body.contact_id, status)
        .await
    {
        Ok(contact) => {
            let _ = state
                .engine
                .audit()
                .record_admin(
                    None,
                    "consent_changed",
                    Actor::Human {
                        operator: default_operator(),
                    },
                    Some(&format!(
                        "{}/{} -> {}",
                        body.channel,
                        body.contact_id,
                        status.as_str()
                    )),
                )
                .await;
            (StatusCode::OK, Json(serde_json::json!(contact)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

// ── Redlines ────────────────────────────────────────────────────────

async fn add_redline(
    State(state): State<AppState>,
    Json(spec): Json<RedlineSpec>,
) -> impl IntoResponse {
    let user_id = state.engine.user_id().to_string();
    let rule_id = spec.id.clone();

    match state.engine.profiles().add_redline(&user_id, spec).await {
        Ok(()) => {
            let _ = state
                .engine
                .audit()
                .record_admin(
                    None,
                    "redline_added",
                    Actor::Human {
                        operator: default_operator(),
                    },
                    Some(&rule_id),
                )
                .await;
            (StatusCode::OK, Json(serde_json::json!({"id": rule_id})))
        }
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn remove_redline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user_id = state.engine.user_id().to_string();

    match state.engine.profiles().remove_redline(&user_id, &id).await {
        Ok(true) => {
            let _ = state
                .engine
                .audit()
                .record_admin(
                    None,
                    "redline_removed",
                    Actor::Human {
                        operator: default_operator(),
                    },
                    Some(&id),
                )
                .await;
            (StatusCode::OK, Json(serde_json::json!({"id": id})))
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Rule not found"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

// ── Audit ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AuditQuery {
    decision_id: Option<Uuid>,
    conversation_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn query_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let audit = state.engine.audit();
    let result = if let Some(decision_id) = query.decision_id {
        audit.by_decision(decision_id).await
    } else if let Some(conversation_id) = query.conversation_id {
        audit.by_conversation(conversation_id).await
    } else {
        let to = query.to.unwrap_or_else(Utc::now);
        let from = to - chrono::Duration::hours(24);
        audit.by_range(query.from.unwrap_or(from), to).await
    };

    match result {
        Ok(records) => (StatusCode::OK, Json(serde_json::json!(records))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::approval::ApprovalQueue;
    use crate::audit::AuditLog;
    use crate::channels::ChannelManager;
    use crate::config::EngineConfig;
    use crate::conversation::ConversationTracker;
    use crate::error::GenerationError;
    use crate::generation::{ContextMessage, GenerationService};
    use crate::profile::{PersonalityProfile, ProfileStore};
    use crate::store::{Database, LibSqlBackend};

    struct FixedGenerator;

    #[async_trait]
    impl GenerationService for FixedGenerator {
        async fn generate(
            &self,
            _profile: &PersonalityProfile,
            _context: &[ContextMessage],
            _mood: Mood,
        ) -> Result<String, GenerationError> {
            Ok("ok".into())
        }
    }

    async fn test_engine() -> Arc<DecisionEngine> {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let profiles = ProfileStore::new(Arc::clone(&db));
        profiles.ensure_bootstrap("owner").await.unwrap();
        let tracker = ConversationTracker::new(Arc::clone(&db));
        let queue = ApprovalQueue::open(Arc::clone(&db)).await.unwrap();
        let audit = Arc::new(AuditLog::new(Arc::clone(&db)));
        DecisionEngine::new(
            db,
            tracker,
            profiles,
            queue,
            audit,
            Arc::new(FixedGenerator),
            Arc::new(ChannelManager::new()),
            EngineConfig::default(),
            "owner",
        )
    }

    fn mood_request(conversation_id: Uuid, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/conversations/{conversation_id}/mood"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn misspelled_mood_is_rejected_not_defaulted() {
        let engine = test_engine().await;
        let conversation_id = engine
            .tracker()
            .resolve("mock", "alice", None, "owner")
            .await
            .unwrap();

        let app = dashboard_routes(Arc::clone(&engine));
        let response = app
            .oneshot(mood_request(conversation_id, r#"{"mood":"savge"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let conversation = engine.tracker().get(conversation_id).await.unwrap();
        assert_eq!(conversation.mood_override, None);
    }

    #[tokio::test]
    async fn known_mood_sets_and_clears_the_override() {
        let engine = test_engine().await;
        let conversation_id = engine
            .tracker()
            .resolve("mock", "alice", None, "owner")
            .await
            .unwrap();

        let response = dashboard_routes(Arc::clone(&engine))
            .oneshot(mood_request(conversation_id, r#"{"mood":"savage"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let conversation = engine.tracker().get(conversation_id).await.unwrap();
        assert_eq!(conversation.mood_override, Some(Mood::Savage));

        let response = dashboard_routes(Arc::clone(&engine))
            .oneshot(mood_request(conversation_id, r#"{}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let conversation = engine.tracker().get(conversation_id).await.unwrap();
        assert_eq!(conversation.mood_override, None);
    }
}

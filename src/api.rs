//! REST API Server for the technician ledger
//!
//! Exposes the orchestrator via HTTP endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::LedgerError;
use crate::models::ReportPeriod;
use crate::orchestrator::Orchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(err: LedgerError) -> ApiResult {
    let status = match err {
        LedgerError::Busy => StatusCode::CONFLICT,
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(err.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Session keys are derived from whatever id the client sends, so free-form
/// ids and UUIDs map to the same stable key space.
fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn session_key(value: Option<&str>) -> uuid::Uuid {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string("default-session"),
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let message = req.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message is empty".into())),
        );
    }

    let session_id = session_key(req.session_id.as_deref()).to_string();
    info!(session = %session_id, "Chat request");

    match state.orchestrator.submit(&session_id, message).await {
        Ok(reply) => ok(serde_json::json!({
            "session_id": session_id,
            "intent": reply.intent,
            "text": reply.text,
            "transaction_id": reply.transaction_id,
        })),
        Err(e) => failure(e),
    }
}

async fn edit_handler(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let session_id = session_key(Some(&id)).to_string();

    match state.orchestrator.begin_edit(&session_id).await {
        Ok(editable) => ok(serde_json::json!({
            "session_id": session_id,
            "edit_mode": editable.is_some(),
            "editable": editable,
        })),
        Err(e) => failure(e),
    }
}

async fn report_handler(State(state): State<ApiState>, Query(query): Query<ReportQuery>) -> ApiResult {
    let period = match query.period.as_deref().unwrap_or_default().parse::<ReportPeriod>() {
        Ok(period) => period,
        Err(message) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message))),
    };

    match state.orchestrator.report(period).await {
        Ok(report) => {
            let text = report.render();
            ok(serde_json::json!({ "report": report, "text": text }))
        }
        Err(e) => failure(e),
    }
}

async fn stats_handler(State(state): State<ApiState>) -> ApiResult {
    match state.orchestrator.today_stats().await {
        Ok(stats) => {
            let net = stats.net();
            ok(serde_json::json!({ "stats": stats, "net": net }))
        }
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:id/edit", post(edit_handler))
        .route("/api/report", get(report_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

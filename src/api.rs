//! REST API server for the financial insight pipeline
//!
//! Thin transport over the orchestrator: no business logic lives here, the
//! handlers only parse identities, forward to the pipeline, and wrap results
//! in the response envelope the frontend expects.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::PipelineError;
use crate::models::Language;
use crate::orchestrator::InsightOrchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub user_id: Option<String>,
    /// The raw financial form; field coercion happens in the pipeline
    #[serde(flatten)]
    pub form: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub user_id: Option<String>,
    pub language: String,
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

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<InsightOrchestrator>,
}

/// =============================
/// Helpers — identity parsing
/// =============================

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

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::InputInvalid(_) => StatusCode::BAD_REQUEST,
        PipelineError::NoAnalysis => StatusCode::NOT_FOUND,
        PipelineError::UpstreamUnavailable { .. } | PipelineError::UpstreamRejected { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analyze Endpoint
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    info!(user_id = ?user_id, "Received analyze request");

    match state.orchestrator.analyze(user_id, req.form).await {
        Ok(bundle) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "user_id": user_id,
                "bundle": bundle,
            }))),
        ),
        // A superseded run is not a user-facing failure: the newer
        // submission's results are the ones on screen
        Err(e) if e.is_stale() => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "user_id": user_id,
                "superseded": true,
            }))),
        ),
        Err(e) => (
            status_for(&e),
            Json(ApiResponse::error(format!("Analysis failed: {}", e))),
        ),
    }
}

/// =============================
/// Current Analysis Endpoint
/// =============================

async fn current_analysis(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(Some(&user_id), "anonymous-user");

    // Fall back to the durable store so a page reload after a process
    // restart still sees the last committed analysis
    let bundle = match state.orchestrator.current(user_id).await {
        Some(bundle) => Some(bundle),
        None => match state.orchestrator.restore(user_id).await {
            Ok(restored) => restored,
            Err(e) => {
                return (
                    status_for(&e),
                    Json(ApiResponse::error(format!("Restore failed: {}", e))),
                )
            }
        },
    };

    match bundle {
        Some(bundle) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "user_id": user_id,
                "bundle": bundle,
                "state": state.orchestrator.state(user_id).await,
            }))),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("No analysis for this user".to_string())),
        ),
    }
}

/// =============================
/// Podcast Audio Endpoint
/// =============================

async fn podcast_audio(
    State(state): State<ApiState>,
    Query(query): Query<AudioQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(query.user_id.as_deref(), "anonymous-user");

    let Some(language) = Language::parse(&query.language) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "Unsupported language: {}",
                query.language
            ))),
        );
    };

    info!(user_id = ?user_id, language = %language, "Received audio request");

    match state.orchestrator.request_audio(user_id, language).await {
        Ok(artifact) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "audio_url": artifact.location,
                "language": artifact.language,
                "synthesized_at": artifact.synthesized_at,
            }))),
        ),
        Err(e) => (
            status_for(&e),
            Json(ApiResponse::error(format!("Audio synthesis failed: {}", e))),
        ),
    }
}

/// =============================
/// Pipeline State Endpoint
/// =============================

async fn pipeline_state(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Json<ApiResponse> {
    let user_id = parse_or_stable_uuid(Some(&user_id), "anonymous-user");
    let current = state.orchestrator.state(user_id).await;
    Json(ApiResponse::success(current))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<InsightOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/finance/analyze", post(analyze))
        .route("/api/finance/analysis/:user_id", get(current_analysis))
        .route("/api/finance/state/:user_id", get(pipeline_state))
        .route("/api/finance/podcast/audio", post(podcast_audio))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<InsightOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use railguard_core::{DetectorOverrides, DetectorResult, MessageStatus, TurnOutcome, Verdict};
use railguard_detectors::{DetectorKind, DetectorUsage, Preset, MAX_BATCH};
use railguard_pipeline::{ChatRequest, ExportFormat, SessionStats, MAX_CHAT_BATCH};
use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_HISTORY_LIMIT: usize = 50;

// ============================================================================
// Health and metrics
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` when the backend answers and every detector loaded
    pub status: String,
    pub backend: BackendHealth,
    pub detectors: Vec<DetectorStatus>,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendHealth {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub name: String,
    pub loaded: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let rail = &state.rail;
    let healthy = rail.generator().health_check().await;
    let detectors: Vec<DetectorStatus> = rail
        .orchestrator()
        .registry()
        .health()
        .into_iter()
        .map(|h| DetectorStatus {
            name: h.name,
            loaded: h.loaded,
        })
        .collect();

    let degraded = !healthy || detectors.iter().any(|d| !d.loaded);
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        backend: BackendHealth {
            name: rail.generator().name().to_string(),
            healthy,
        },
        detectors,
        active_sessions: rail.sessions().len(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// ============================================================================
// Chat endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub message_id: Option<String>,

    #[serde(alias = "message")]
    pub text: String,

    #[serde(default)]
    pub config: DetectorOverrides,
}

/// Run one message through the rail and return its outcome.
///
/// The rail runs on its own task so a client hanging up does not abandon
/// a turn that already holds a sequence number.
pub async fn send_message(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<TurnOutcome>, AppError> {
    let Json(req) = body?;
    let request = ChatRequest {
        session_id: req.session_id,
        message_id: req.message_id,
        text: req.text,
        overrides: req.config,
    };

    let rail = state.rail.clone();
    let outcome = tokio::spawn(async move { rail.submit(request).await }).await??;

    match outcome.status {
        MessageStatus::Failed { kind } => Err(AppError::Failed {
            message_id: outcome.message_id,
            kind,
        }),
        _ => Ok(Json(outcome)),
    }
}

pub async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let handle = state.rail.sessions().create();
    Json(json!({ "session_id": handle.id() }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub session_id: String,
    pub limit: Option<usize>,
}

pub async fn get_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let messages = state.rail.sessions().history(&query.session_id, limit);
    Ok(Json(json!({
        "session_id": query.session_id,
        "count": messages.len(),
        "messages": messages,
    })))
}

pub async fn clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let new_id = state.rail.sessions().clear(&session_id);
    Json(json!({
        "previous_session_id": session_id,
        "session_id": new_id,
    }))
}

pub async fn get_session_config(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let config = state.rail.sessions().session_config(&session_id);
    Json(json!({
        "session_id": session_id,
        "config": config,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub session_id: String,
    pub config: DetectorOverrides,
}

pub async fn update_session_config(
    State(state): State<AppState>,
    body: Result<Json<UpdateConfigRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body?;
    let config = state
        .rail
        .sessions()
        .configure(&req.session_id, &req.config)?;
    Ok(Json(json!({
        "session_id": req.session_id,
        "config": config,
    })))
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.rail.sessions().list();
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

pub async fn session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, AppError> {
    Ok(Json(state.rail.sessions().stats(&session_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub session_id: String,
    #[serde(default)]
    pub format: ExportFormat,
}

pub async fn export_session(
    State(state): State<AppState>,
    body: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body?;
    let content = state.rail.sessions().export(&req.session_id, req.format)?;
    let content_type = match req.format {
        ExportFormat::Json => "application/json",
        ExportFormat::Text => "text/plain; charset=utf-8",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], content))
}

#[derive(Debug, Deserialize)]
pub struct BatchChatRequest {
    pub messages: Vec<String>,
    #[serde(default)]
    pub config: DetectorOverrides,
}

/// Run several messages through the rail in a new session
pub async fn batch_chat(
    State(state): State<AppState>,
    body: Result<Json<BatchChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body?;
    let rail = state.rail.clone();
    let batch =
        tokio::spawn(async move { rail.submit_batch(&req.messages, &req.config).await }).await??;
    Ok(Json(json!({
        "batch_id": batch.session_id,
        "message_count": batch.results.len(),
        "max_batch": MAX_CHAT_BATCH,
        "results": batch.results,
    })))
}

// ============================================================================
// Detector endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub name: String,
    pub description: String,
    pub loaded: bool,
    pub enabled: bool,
    pub threshold: f32,
    pub input_phase: bool,
    pub output_phase: bool,
}

pub async fn list_detectors(State(state): State<AppState>) -> Json<Vec<DetectorInfo>> {
    let rail = &state.rail;
    let orchestrator = rail.orchestrator();
    let settings = rail.settings();

    let detectors = orchestrator
        .registry()
        .health()
        .into_iter()
        .map(|h| {
            let defaults = orchestrator.config().settings(&h.name);
            DetectorInfo {
                description: DetectorKind::from_name(&h.name)
                    .map(|k| k.description().to_string())
                    .unwrap_or_default(),
                loaded: h.loaded,
                enabled: defaults.enabled,
                threshold: defaults.threshold,
                input_phase: settings.input_detectors.contains(&h.name),
                output_phase: settings.output_detectors.contains(&h.name),
                name: h.name,
            }
        })
        .collect();
    Json(detectors)
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub detectors: Option<Vec<String>>,
}

pub async fn detect(
    State(state): State<AppState>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<Verdict>, AppError> {
    let Json(req) = body?;
    let verdict = state
        .rail
        .detect(req.session_id.as_deref(), &req.text, req.detectors.as_deref())
        .await?;
    Ok(Json(verdict))
}

#[derive(Debug, Deserialize)]
pub struct TestDetectorRequest {
    pub detector: String,
    pub text: String,
    #[serde(default, alias = "sensitivity")]
    pub threshold: Option<f32>,
}

pub async fn test_detector(
    State(state): State<AppState>,
    body: Result<Json<TestDetectorRequest>, JsonRejection>,
) -> Result<Json<DetectorResult>, AppError> {
    let Json(req) = body?;
    let result = state
        .rail
        .test_detector(&req.detector, &req.text, req.threshold)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub texts: Vec<String>,
    #[serde(default)]
    pub detectors: Option<Vec<String>>,
}

pub async fn batch_detect(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body?;
    let results = state
        .rail
        .batch(&req.texts, req.detectors.as_deref())
        .await?;
    Ok(Json(json!({
        "count": results.len(),
        "max_batch": MAX_BATCH,
        "results": results,
    })))
}

#[derive(Debug, Serialize)]
pub struct DetectorStatsResponse {
    pub total_detectors: usize,
    pub active_detectors: usize,
    pub active_detector_names: Vec<String>,
    pub detectors: Vec<DetectorUsage>,
}

/// Loaded-and-enabled counts plus per-detector usage since startup
pub async fn detector_stats(State(state): State<AppState>) -> Json<DetectorStatsResponse> {
    let orchestrator = state.rail.orchestrator();
    let health = orchestrator.registry().health();
    let active: Vec<String> = health
        .iter()
        .filter(|h| h.loaded && orchestrator.config().settings(&h.name).enabled)
        .map(|h| h.name.clone())
        .collect();

    Json(DetectorStatsResponse {
        total_detectors: health.len(),
        active_detectors: active.len(),
        active_detector_names: active,
        detectors: orchestrator.usage(),
    })
}

pub async fn list_presets() -> impl IntoResponse {
    let presets: BTreeMap<&str, DetectorOverrides> = Preset::ALL
        .into_iter()
        .map(|p| (p.name(), p.overrides()))
        .collect();
    Json(json!({ "presets": presets }))
}

#[derive(Debug, Deserialize)]
pub struct ApplyPresetRequest {
    pub session_id: String,
}

/// Merge a preset's thresholds into a session's detector config
pub async fn apply_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<ApplyPresetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let preset = Preset::from_name(&name).ok_or(AppError::PresetNotFound(name))?;
    let Json(req) = body?;
    let config = state
        .rail
        .sessions()
        .configure(&req.session_id, &preset.overrides())?;
    Ok(Json(json!({
        "session_id": req.session_id,
        "preset": preset.name(),
        "applied_config": preset.overrides(),
        "config": config,
    })))
}

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::agent::{AgentError, ConversationTurn};
use crate::alerts::{default_metrics, evaluate_alerts, AlertReport};
use crate::db::executor::QuickStats;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Attach a fresh alert snapshot to the returned turn.
    #[serde(default)]
    pub include_alerts: bool,
}

#[derive(Debug, Deserialize)]
pub struct AlertsParams {
    pub window: Option<usize>,
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub dataset_rows: usize,
    pub first_day: String,
    pub last_day: String,
}

/// Runs one conversation turn. Errors name the failing stage and surface the
/// raw diagnostic; nothing is retried or reinterpreted.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<ConversationTurn>, (StatusCode, String)> {
    info!("Question: {}", payload.question);

    let mut turn = state
        .agent
        .answer_question(&payload.question)
        .await
        .map_err(map_agent_error)?;

    if payload.include_alerts {
        let metrics = default_metrics(&state.executor).await.map_err(|e| {
            error!("Failed to build metric definitions: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
        let report = evaluate_alerts(&state.executor, &metrics, &state.config.alerts, None)
            .await
            .map_err(|e| {
                error!("Alert snapshot failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            })?;
        turn.alerts = Some(report.alerts);
    }

    Ok(Json(turn))
}

fn map_agent_error(err: AgentError) -> (StatusCode, String) {
    let status = match &err {
        AgentError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AgentError::Execution { .. } => StatusCode::BAD_REQUEST,
        AgentError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
    };
    error!("Turn failed: {}", err);
    (status, err.to_string())
}

/// Evaluates anomaly alerts on demand against the loaded dataset.
pub async fn alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertsParams>,
) -> Result<Json<AlertReport>, (StatusCode, String)> {
    let mut config = state.config.alerts.clone();
    if let Some(window) = params.window {
        if window < 2 {
            return Err((
                StatusCode::BAD_REQUEST,
                "window must be at least 2".to_string(),
            ));
        }
        config.window = window;
    }

    let metrics = default_metrics(&state.executor).await.map_err(|e| {
        error!("Failed to build metric definitions: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let report = evaluate_alerts(&state.executor, &metrics, &config, params.as_of)
        .await
        .map_err(|e| {
            error!("Alert evaluation failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(report))
}

pub async fn quick_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QuickStats>, (StatusCode, String)> {
    let stats = state.executor.quick_stats().await.map_err(|e| {
        error!("Quick stats failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(stats))
}

pub async fn schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<String>, (StatusCode, String)> {
    let context = state.executor.schema_context().await.map_err(|e| {
        error!("Schema context failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(context))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();

    let dataset_rows = state.executor.row_count().await.map_err(|e| {
        error!("Row count failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let (first_day, last_day) = state.executor.date_range().await.map_err(|e| {
        error!("Date range failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        dataset_rows,
        first_day: first_day.to_string(),
        last_day: last_day.to_string(),
    }))
}

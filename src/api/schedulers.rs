use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;
use crate::scheduler::LifecycleError;
use crate::store::models::{SchedulerConfig, SchedulerConfigDraft, SchedulerConfigPatch, SchedulerRun};

#[derive(Debug, Serialize)]
pub(crate) struct SchedulerConfigPayload {
    id: Uuid,
    season_id: Uuid,
    is_active: bool,
    is_paused: bool,
    days_of_week: Vec<i32>,
    start_hour: i32,
    end_hour: i32,
    interval_minutes: i32,
    interval_seconds: i32,
    last_run_at: Option<DateTime<Utc>>,
    last_run_status: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SchedulerConfig> for SchedulerConfigPayload {
    fn from(config: SchedulerConfig) -> Self {
        Self {
            id: config.id,
            season_id: config.season_id,
            is_active: config.is_active,
            is_paused: config.is_paused,
            days_of_week: config.days_of_week,
            start_hour: config.start_hour,
            end_hour: config.end_hour,
            interval_minutes: config.interval_minutes,
            interval_seconds: config.interval_seconds,
            last_run_at: config.last_run_at,
            last_run_status: config.last_run_status,
            created_at: config.created_at,
            updated_at: config.updated_at,
        }
    }
}

/// ダッシュボード向けのライブ状態付き設定。
#[derive(Debug, Serialize)]
pub(crate) struct SchedulerStatusPayload {
    #[serde(flatten)]
    config: SchedulerConfigPayload,
    season_name: Option<String>,
    total_matches: i64,
    is_running: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SchedulerRunPayload {
    id: Uuid,
    scheduler_config_id: Uuid,
    season_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    matches_fetched: i32,
    matches_new: i32,
    error_message: Option<String>,
}

impl From<SchedulerRun> for SchedulerRunPayload {
    fn from(run: SchedulerRun) -> Self {
        Self {
            id: run.id,
            scheduler_config_id: run.scheduler_config_id,
            season_id: run.season_id,
            started_at: run.started_at,
            finished_at: run.finished_at,
            status: run.status.as_str().to_string(),
            matches_fetched: run.matches_fetched,
            matches_new: run.matches_new,
            error_message: run.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SchedulerRunsPayload {
    data: Vec<SchedulerRunPayload>,
    count: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessagePayload {
    message: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateSchedulerRequest {
    #[serde(default)]
    days_of_week: Vec<i32>,
    #[serde(default = "default_start_hour")]
    start_hour: i32,
    #[serde(default = "default_end_hour")]
    end_hour: i32,
    #[serde(default = "default_interval_minutes")]
    interval_minutes: i32,
    #[serde(default)]
    interval_seconds: i32,
}

fn default_start_hour() -> i32 {
    18
}

fn default_end_hour() -> i32 {
    23
}

fn default_interval_minutes() -> i32 {
    30
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateSchedulerRequest {
    days_of_week: Option<Vec<i32>>,
    start_hour: Option<i32>,
    end_hour: Option<i32>,
    interval_minutes: Option<i32>,
    interval_seconds: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunsQuery {
    skip: Option<i64>,
    limit: Option<i64>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn lifecycle_error(err: LifecycleError) -> ApiError {
    let status = match &err {
        LifecycleError::NotFound | LifecycleError::SeasonNotFound => StatusCode::NOT_FOUND,
        LifecycleError::AlreadyExists | LifecycleError::InvalidTransition(_) => {
            StatusCode::CONFLICT
        }
        LifecycleError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::Internal(inner) => {
            error!(error = %format!("{inner:#}"), "scheduler operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "scheduler query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
        }),
    )
}

async fn enrich(state: &AppState, config: SchedulerConfig) -> Result<SchedulerStatusPayload, ApiError> {
    let season_name = state
        .dao()
        .season_name(config.season_id)
        .await
        .map_err(internal_error)?;
    let total_matches = state
        .dao()
        .season_match_count(config.season_id)
        .await
        .map_err(internal_error)?;
    let is_running = state.manager().is_running(config.season_id).await;

    Ok(SchedulerStatusPayload {
        config: config.into(),
        season_name,
        total_matches,
        is_running,
    })
}

pub(crate) async fn list_all(
    State(state): State<AppState>,
) -> Result<Json<Vec<SchedulerStatusPayload>>, ApiError> {
    let configs = state.dao().list_configs().await.map_err(internal_error)?;

    let mut payloads = Vec::with_capacity(configs.len());
    for config in configs {
        payloads.push(enrich(&state, config).await?);
    }
    Ok(Json(payloads))
}

pub(crate) async fn get_one(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
) -> Result<Json<SchedulerStatusPayload>, ApiError> {
    let config = state
        .dao()
        .config_by_season(season_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| lifecycle_error(LifecycleError::NotFound))?;

    Ok(Json(enrich(&state, config).await?))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
    Json(payload): Json<CreateSchedulerRequest>,
) -> Result<(StatusCode, Json<SchedulerConfigPayload>), ApiError> {
    let draft = SchedulerConfigDraft {
        days_of_week: payload.days_of_week,
        start_hour: payload.start_hour,
        end_hour: payload.end_hour,
        interval_minutes: payload.interval_minutes,
        interval_seconds: payload.interval_seconds,
    };

    let config = state
        .manager()
        .create(season_id, &draft)
        .await
        .map_err(lifecycle_error)?;

    Ok((StatusCode::CREATED, Json(config.into())))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
    Json(payload): Json<UpdateSchedulerRequest>,
) -> Result<Json<SchedulerConfigPayload>, ApiError> {
    let patch = SchedulerConfigPatch {
        days_of_week: payload.days_of_week,
        start_hour: payload.start_hour,
        end_hour: payload.end_hour,
        interval_minutes: payload.interval_minutes,
        interval_seconds: payload.interval_seconds,
    };

    let config = state
        .manager()
        .update(season_id, &patch)
        .await
        .map_err(lifecycle_error)?;

    Ok(Json(config.into()))
}

pub(crate) async fn delete(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
) -> Result<Json<MessagePayload>, ApiError> {
    state
        .manager()
        .delete(season_id)
        .await
        .map_err(lifecycle_error)?;

    Ok(Json(MessagePayload {
        message: "scheduler deleted",
    }))
}

pub(crate) async fn start(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
) -> Result<Json<SchedulerConfigPayload>, ApiError> {
    let config = state
        .manager()
        .start(season_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(config.into()))
}

pub(crate) async fn stop(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
) -> Result<Json<SchedulerConfigPayload>, ApiError> {
    let config = state
        .manager()
        .stop(season_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(config.into()))
}

pub(crate) async fn pause(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
) -> Result<Json<SchedulerConfigPayload>, ApiError> {
    let config = state
        .manager()
        .pause(season_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(config.into()))
}

pub(crate) async fn resume(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
) -> Result<Json<SchedulerConfigPayload>, ApiError> {
    let config = state
        .manager()
        .resume(season_id)
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(config.into()))
}

pub(crate) async fn runs(
    State(state): State<AppState>,
    Path(season_id): Path<Uuid>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<SchedulerRunsPayload>, ApiError> {
    let config = state
        .dao()
        .config_by_season(season_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| lifecycle_error(LifecycleError::NotFound))?;

    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let (runs, count) = state
        .dao()
        .runs_for_config(config.id, skip, limit)
        .await
        .map_err(internal_error)?;

    Ok(Json(SchedulerRunsPayload {
        data: runs.into_iter().map(SchedulerRunPayload::from).collect(),
        count,
    }))
}

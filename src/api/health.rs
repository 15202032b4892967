use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub(crate) struct ProbeReply {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ProbeReply {
    fn ok(status: &'static str) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    fn degraded(detail: String) -> Self {
        Self {
            status: "degraded",
            detail: Some(detail),
        }
    }
}

pub(crate) async fn live() -> Json<ProbeReply> {
    Json(ProbeReply::ok("live"))
}

/// readiness はデータベースに届くかどうかで判定する。
pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ProbeReply>, (StatusCode, Json<ProbeReply>)> {
    match sqlx::query("SELECT 1").execute(state.dao().pool()).await {
        Ok(_) => Ok(Json(ProbeReply::ok("ready"))),
        Err(err) => {
            error!(error = %err, "database readiness check failed");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ProbeReply::degraded(format!("database: {err}"))),
            ))
        }
    }
}

pub(crate) mod health;
pub(crate) mod schedulers;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/v1/schedulers", get(schedulers::list_all))
        .route(
            "/v1/seasons/{season_id}/scheduler",
            get(schedulers::get_one)
                .post(schedulers::create)
                .patch(schedulers::update)
                .delete(schedulers::delete),
        )
        .route(
            "/v1/seasons/{season_id}/scheduler/start",
            post(schedulers::start),
        )
        .route(
            "/v1/seasons/{season_id}/scheduler/stop",
            post(schedulers::stop),
        )
        .route(
            "/v1/seasons/{season_id}/scheduler/pause",
            post(schedulers::pause),
        )
        .route(
            "/v1/seasons/{season_id}/scheduler/resume",
            post(schedulers::resume),
        )
        .route(
            "/v1/seasons/{season_id}/scheduler/runs",
            get(schedulers::runs),
        )
        .with_state(state)
}

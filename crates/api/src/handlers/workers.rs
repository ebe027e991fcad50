use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use broker_core::models::NewWorkerEvent;
use serde::Deserialize;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub limit: Option<i64>,
}

pub async fn record_worker_event(
    State(state): State<AppState>,
    payload: Result<Json<NewWorkerEvent>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(event) = payload?;
    let stored = state.broker.telemetry.record(event).await?;
    Ok(success(stored))
}

pub async fn list_worker_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EventQuery>,
) -> ApiResult<impl IntoResponse> {
    let events = state.broker.telemetry.recent(&name, query.limit).await?;
    Ok(success(events))
}

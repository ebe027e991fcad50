use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use broker_core::models::TaskState;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PauseRequest {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedCount {
    pub deleted: u64,
}

/// 列出需要该能力的任务，默认只列 SCHEDULED
pub async fn list_executor_tasks(
    State(state): State<AppState>,
    Path(capability): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let task_state = query
        .state
        .as_deref()
        .map(|s| {
            s.to_ascii_uppercase()
                .parse::<TaskState>()
                .map_err(|_| ApiError::bad_request(format!("无效的任务状态: {s}")))
        })
        .transpose()?;
    let tasks = state
        .broker
        .tasks
        .list_by_executor(&capability, task_state, query.limit)
        .await?;
    Ok(success(tasks))
}

pub async fn delete_executor_tasks(
    State(state): State<AppState>,
    Path(capability): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.broker.tasks.delete_by_executor(&capability).await?;
    Ok(success(DeletedCount { deleted }))
}

pub async fn peek_executor(
    State(state): State<AppState>,
    Path(capability): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.broker.tasks.peek(&capability).await?;
    Ok(success(task))
}

/// 暂停能力，请求体可选：`{"ttl_seconds": n}`
pub async fn pause_executor(
    State(state): State<AppState>,
    Path(capability): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = if body.is_empty() {
        PauseRequest::default()
    } else {
        serde_json::from_slice::<PauseRequest>(&body)
            .map_err(|e| ApiError::bad_request(format!("无效的暂停请求: {e}")))?
    };
    let pause = state
        .broker
        .pauses
        .pause(&capability, request.ttl_seconds.map(Duration::from_secs))
        .await?;
    Ok(success(pause))
}

pub async fn resume_executor(
    State(state): State<AppState>,
    Path(capability): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let pause = state.broker.pauses.resume(&capability).await?;
    Ok(success(pause))
}

pub async fn pause_status(
    State(state): State<AppState>,
    Path(capability): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let pause = state.broker.pauses.status(&capability).await?;
    Ok(success(pause))
}

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    response::{IntoResponse, Response},
    Json,
};
use broker_core::models::ResultReport;
use broker_dispatcher::{ResultSubmission, ScheduleRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{ApiError, ApiResult},
    response::{empty_ok, success, ApiResponse},
    routes::AppState,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
}

/// 领取请求
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub worker: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// 调度任务
pub async fn schedule_task(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let task = state.broker.tasks.schedule(request).await?;
    Ok(success(ScheduledTask { id: task.id }))
}

/// 获取任务，完成的任务附带执行结果
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let details = state.broker.tasks.get_details(id).await?;
    Ok(success(details))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.broker.tasks.delete(id).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "任务 {id} 已删除"
    )))
}

/// 领取任务，没有可领取的任务时返回空的200响应
pub async fn assign_task(
    State(state): State<AppState>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    debug!(
        worker = %request.worker,
        hostname = request.hostname.as_deref().unwrap_or_default(),
        capabilities = ?request.capabilities,
        "Worker请求领取任务"
    );

    let assignment = state
        .broker
        .tasks
        .assign(&request.worker, &request.capabilities)
        .await?;
    Ok(match assignment {
        Some(assignment) => success(assignment).into_response(),
        None => empty_ok().into_response(),
    })
}

/// 上报执行结果
///
/// multipart字段：`result` 为JSON格式的结果，`stdout`/`stderr` 为可选的输出附件。
pub async fn report_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut report: Option<ResultReport> = None;
    let mut stdout = None;
    let mut stderr = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "result" => {
                let bytes = field.bytes().await?;
                report = Some(serde_json::from_slice(&bytes).map_err(|e| {
                    ApiError::bad_request(format!("result字段不是有效的JSON: {e}"))
                })?);
            }
            "stdout" => stdout = Some(field.bytes().await?.to_vec()),
            "stderr" => stderr = Some(field.bytes().await?.to_vec()),
            other => debug!("忽略未知的multipart字段: {}", other),
        }
    }

    let report = report.ok_or_else(|| ApiError::bad_request("缺少result字段"))?;
    let task = state
        .broker
        .results
        .report_result(
            id,
            ResultSubmission {
                report,
                stdout,
                stderr,
            },
        )
        .await?;
    Ok(success(task))
}

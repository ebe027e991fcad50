use axum::{
    routing::{get, post, put},
    Router,
};
use broker_dispatcher::Broker;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{
    executors::{
        delete_executor_tasks, list_executor_tasks, pause_executor, pause_status, peek_executor,
        resume_executor,
    },
    health::{health_check, render_metrics},
    packages::{create_package, delete_package, get_blob, get_package, list_package_versions},
    tasks::{assign_task, delete_task, get_task, report_result, schedule_task},
    workers::{list_worker_events, record_worker_event},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 运维
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // 任务
        .route("/tasks/schedule", post(schedule_task))
        .route("/tasks/assign", put(assign_task))
        .route(
            "/tasks/{id}",
            get(get_task).delete(delete_task).post(report_result),
        )
        // 执行器
        .route(
            "/executors/{capability}",
            get(list_executor_tasks).delete(delete_executor_tasks),
        )
        .route(
            "/executors/{capability}/pause",
            get(pause_status).post(pause_executor).delete(resume_executor),
        )
        .route("/executors/{capability}/peek", get(peek_executor))
        // 包与Blob
        .route("/packages/create", post(create_package))
        .route("/packages/{name}", get(list_package_versions))
        .route(
            "/packages/{name}/{version}",
            get(get_package).delete(delete_package),
        )
        .route("/blobs/{key}", get(get_blob))
        // Worker遥测
        .route("/workers/events", post(record_worker_event))
        .route("/workers/{name}/events", get(list_worker_events))
        .with_state(state)
}

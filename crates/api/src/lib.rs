//! # Broker API
//!
//! 任务代理的HTTP接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 任务
//! - `POST /tasks/schedule` - 调度任务
//! - `GET /tasks/{id}` - 获取任务（完成后附带结果）
//! - `DELETE /tasks/{id}` - 删除任务
//! - `PUT /tasks/assign` - Worker领取任务，无任务时返回空的200响应
//! - `POST /tasks/{id}` - 上报结果（multipart）
//!
//! ### 执行器
//! - `GET /executors/{cap}` - 能力积压，支持 `?state=&limit=`
//! - `DELETE /executors/{cap}` - 分批删除该能力的全部任务
//! - `GET|POST|DELETE /executors/{cap}/pause` - 暂停状态、暂停、恢复
//! - `GET /executors/{cap}/peek` - 查看队首任务
//!
//! ### 包
//! - `POST /packages/create` - 创建包（multipart）
//! - `GET|DELETE /packages/{name}/{version}` - 获取清单、删除
//! - `GET /packages/{name}` - 列出版本
//! - `GET /blobs/{key}` - 下载Blob
//!
//! ### Worker遥测与运维
//! - `POST /workers/events`、`GET /workers/{name}/events`
//! - `GET /health`、`GET /metrics`
//!
//! ## 响应格式
//!
//! 成功响应：
//! ```json
//! {"success": true, "data": {"id": 1}, "message": null, "timestamp": "2024-01-01T00:00:00Z"}
//! ```
//!
//! 错误响应：
//! ```json
//! {"error": {"message": "任务未找到: 7", "type": "TASK_NOT_FOUND", "code": 404, "timestamp": "..."}}
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Router};
use broker_core::config::ApiConfig;
use broker_dispatcher::Broker;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(broker: Broker, api_config: &ApiConfig, metrics: Option<PrometheusHandle>) -> Router {
    let state = AppState { broker, metrics };
    let body_limit = api_config.max_request_size_mb.saturating_mul(1024 * 1024);

    let mut app = create_routes(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(trace_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    api_config.request_timeout_seconds,
                )))
                .layer(axum::middleware::from_fn(request_logging)),
        );

    if api_config.cors_enabled {
        app = app.layer(cors_layer(&api_config.cors_origins));
    }
    app
}

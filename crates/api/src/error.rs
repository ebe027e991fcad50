use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use broker_core::BrokerError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Broker(#[from] BrokerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Broker(err) => match err {
                BrokerError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
                BrokerError::PackageNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "PACKAGE_NOT_FOUND")
                }
                BrokerError::BlobNotFound { .. } => (StatusCode::NOT_FOUND, "BLOB_NOT_FOUND"),
                // Worker把404视为本次尝试已终结
                BrokerError::StaleAttempt { .. } => (StatusCode::NOT_FOUND, "STALE_ATTEMPT"),
                BrokerError::DuplicatePackage { .. } => {
                    (StatusCode::BAD_REQUEST, "DUPLICATE_PACKAGE")
                }
                BrokerError::InvalidTaskConfig(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_TASK_CONFIG")
                }
                BrokerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("multipart解析失败: {}", err.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        let message = if status.is_server_error() {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

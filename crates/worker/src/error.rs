use reqwest::StatusCode;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Worker代理的错误分类，决定失败后是重试、放弃还是上报
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("请求被拒绝: HTTP {status} - {message}")]
    Unrecoverable { status: u16, message: String },

    #[error("暂时性失败: {0}")]
    Transient(String),

    #[error("执行尝试已过期: 任务 {task_id}")]
    StaleAttempt { task_id: i64 },

    #[error("任务执行失败: {0}")]
    Execution(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Configuration(String),
}

impl WorkerError {
    /// 根据HTTP状态码分类：4xx不可恢复，其余视为暂时性失败
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if status.is_client_error() {
            WorkerError::Unrecoverable {
                status: status.as_u16(),
                message,
            }
        } else {
            WorkerError::Transient(format!("HTTP {status} - {message}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => WorkerError::from_status(status, err.to_string()),
            None if err.is_decode() => WorkerError::Unrecoverable {
                status: 0,
                message: format!("响应解析失败: {err}"),
            },
            None => WorkerError::Transient(err.to_string()),
        }
    }
}

use thiserror::Error;

/// 任务代理错误类型定义
///
/// 调度校验、领取竞争、超时触发、过期结果属于稳态条件，
/// 只有存储层不可用才应作为致命错误上抛给调用方。
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("数据库错误: {0}")]
    Database(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("包未找到: {name}.{version}")]
    PackageNotFound { name: String, version: String },

    #[error("过期的执行尝试: 任务 {task_id} 上报尝试 {reported}，当前尝试 {current}")]
    StaleAttempt {
        task_id: i64,
        reported: i32,
        current: i32,
    },

    #[error("Blob未找到: {key}")]
    BlobNotFound { key: String },

    #[error("包已存在: {name}.{version}")]
    DuplicatePackage { name: String, version: String },

    #[error("无效的任务配置: {0}")]
    InvalidTaskConfig(String),

    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("Blob存储错误: {0}")]
    BlobStore(String),

    #[error("延迟队列错误: {0}")]
    Queue(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }

    pub fn package_not_found<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self::PackageNotFound {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn duplicate_package<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self::DuplicatePackage {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskConfig(msg.into())
    }

    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// 存储层或网络的暂时性失败，可由调用方按自身策略重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Database(_) | BrokerError::Queue(_) | BrokerError::Network(_)
        )
    }

    /// 正常运行中预期会出现的条件，不应按故障告警
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            BrokerError::TaskNotFound { .. }
                | BrokerError::PackageNotFound { .. }
                | BrokerError::BlobNotFound { .. }
                | BrokerError::StaleAttempt { .. }
                | BrokerError::DuplicatePackage { .. }
                | BrokerError::InvalidTaskConfig(_)
                | BrokerError::Validation(_)
        )
    }
}

impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        BrokerError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Internal(err.to_string())
    }
}

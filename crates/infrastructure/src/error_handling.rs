//! 仓储操作的错误上下文
//!
//! 把sqlx错误转换为 `BrokerError::Database` 时附带操作与实体描述，并记录日志。

use std::fmt;

use broker_core::BrokerError;
use sqlx::Error as SqlxError;
use tracing::error;

/// 仓储操作的上下文
#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Claim,
    Migrate,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "列表查询"),
            RepositoryOperation::Claim => write!(f, "领取"),
            RepositoryOperation::Migrate => write!(f, "迁移"),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    pub fn database_error(
        operation: RepositoryOperation,
        entity: impl fmt::Display,
        err: SqlxError,
    ) -> BrokerError {
        error!(operation = %operation, entity = %entity, error = %err, "数据库操作失败");
        BrokerError::Database(format!("{operation}{entity}失败: {err}"))
    }

    /// 唯一约束冲突
    pub fn is_unique_violation(err: &SqlxError) -> bool {
        matches!(err, SqlxError::Database(db_err) if db_err.is_unique_violation())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 延迟执行队列中的作业
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredJob {
    /// 领取时捕获的尝试编号，用于识别过期的检查
    DeadlineCheck { task_id: i64, attempt: i32 },
    Webhook { task_id: i64, url: String },
}

impl DeferredJob {
    pub fn kind(&self) -> &'static str {
        match self {
            DeferredJob::DeadlineCheck { .. } => "deadline_check",
            DeferredJob::Webhook { .. } => "webhook",
        }
    }

    pub fn task_id(&self) -> i64 {
        match self {
            DeferredJob::DeadlineCheck { task_id, .. } | DeferredJob::Webhook { task_id, .. } => {
                *task_id
            }
        }
    }
}

/// 已到期、等待处理的队列条目
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredEntry {
    pub id: i64,
    pub job: DeferredJob,
    pub due_at: DateTime<Utc>,
    /// 已尝试投递的次数
    pub deliveries: i32,
}

use async_trait::async_trait;

use crate::errors::BrokerResult;

/// 任务完成通知
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// 向 `url` 投递 `{"task_id": id}`
    async fn notify(&self, url: &str, task_id: i64) -> BrokerResult<()>;
}

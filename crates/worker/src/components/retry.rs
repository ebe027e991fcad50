use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::WorkerResult;

/// 固定间隔重试，只有暂时性失败会重试，其余错误立即返回
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> WorkerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WorkerResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    "{}失败（第{}/{}次），{:?}后重试: {}",
                    operation, attempt, max_attempts, delay, e
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use broker_core::{
    models::ExecutorPauseState, traits::ExecutorPauseRepository, BrokerError, BrokerResult,
};
use chrono::Utc;
use tracing::{info, instrument};

/// 执行器暂停控制器
///
/// 按能力设置的准入开关。暂停只影响之后的领取，已分配的任务不受影响；
/// 暂停与领取之间没有事务耦合，暂停瞬间可能还会放过一个任务。
pub struct ExecutorPauseController {
    repo: Arc<dyn ExecutorPauseRepository>,
}

impl ExecutorPauseController {
    pub fn new(repo: Arc<dyn ExecutorPauseRepository>) -> Self {
        Self { repo }
    }

    fn check_capability(capability: &str) -> BrokerResult<()> {
        if capability.trim().is_empty() {
            return Err(BrokerError::validation_error("能力名称不能为空"));
        }
        Ok(())
    }

    /// 暂停能力，`ttl` 到期后自动视为恢复；重复暂停会覆盖过期时间
    #[instrument(skip(self), fields(capability = %capability))]
    pub async fn pause(
        &self,
        capability: &str,
        ttl: Option<Duration>,
    ) -> BrokerResult<ExecutorPauseState> {
        Self::check_capability(capability)?;
        let expires_at = ttl
            .map(|ttl| {
                chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| BrokerError::validation_error("暂停时长超出范围"))
            })
            .transpose()?;

        let state = self.repo.set(capability, true, expires_at).await?;
        info!(expires_at = ?state.expires_at, "执行器 {} 已暂停", capability);
        Ok(state)
    }

    #[instrument(skip(self), fields(capability = %capability))]
    pub async fn resume(&self, capability: &str) -> BrokerResult<ExecutorPauseState> {
        Self::check_capability(capability)?;
        let state = self.repo.set(capability, false, None).await?;
        info!("执行器 {} 已恢复", capability);
        Ok(state)
    }

    /// 当前的显式状态，从未设置过的能力与已过期的暂停都返回未暂停
    pub async fn status(&self, capability: &str) -> BrokerResult<ExecutorPauseState> {
        Self::check_capability(capability)?;
        let Some(mut state) = self.repo.get(capability).await? else {
            return Ok(ExecutorPauseState::unpaused(capability));
        };
        if state.paused && !state.is_paused_at(Utc::now()) {
            state.paused = false;
        }
        Ok(state)
    }

    pub async fn is_paused(&self, capability: &str) -> BrokerResult<bool> {
        Ok(self
            .repo
            .get(capability)
            .await?
            .is_some_and(|state| state.is_paused_at(Utc::now())))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行器暂停状态
///
/// 以显式的布尔标志加可选过期时间表示，而不是依赖行是否存在。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorPauseState {
    pub capability: String,
    pub paused: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutorPauseState {
    /// 未暂停时的默认状态
    pub fn unpaused(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            paused: false,
            expires_at: None,
            updated_at: Utc::now(),
        }
    }

    /// 在给定时刻是否处于暂停中，过期的暂停视为未暂停
    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.paused && self.expires_at.map_or(true, |expiry| expiry > now)
    }
}

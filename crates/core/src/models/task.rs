use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, BrokerResult};

/// 任务定义
///
/// 一次被请求执行的工作单元。`config` 中只有调度需要的字段是强类型的，
/// 其余内容（命令行、环境变量等）原样透传给Worker。
///
/// # 状态流转
///
/// ```text
/// SCHEDULED --claim--> ASSIGNED --report--> COMPLETE (SUCCESS|FAILED)
///                         |
///                         +--timeout, attempts <  max--> SCHEDULED
///                         +--timeout, attempts >= max--> COMPLETE (TIMED_OUT)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub config: TaskConfig,
    pub state: TaskState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_time: DateTime<Utc>,
    pub assigned_worker: Option<String>,
    pub assigned_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub outcome: Option<TaskOutcome>,
    pub result_id: Option<i64>,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "COMPLETE")]
    Complete,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Assigned => "ASSIGNED",
            TaskState::Complete => "COMPLETE",
        }
    }
}

impl FromStr for TaskState {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(TaskState::Scheduled),
            "ASSIGNED" => Ok(TaskState::Assigned),
            "COMPLETE" => Ok(TaskState::Complete),
            _ => Err(BrokerError::Serialization(format!("无效的任务状态: {s}"))),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务结局，仅在 `state == COMPLETE` 时存在
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMED_OUT")]
    TimedOut,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "SUCCESS",
            TaskOutcome::Failed => "FAILED",
            TaskOutcome::TimedOut => "TIMED_OUT",
        }
    }

    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            TaskOutcome::Success
        } else {
            TaskOutcome::Failed
        }
    }
}

impl FromStr for TaskOutcome {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(TaskOutcome::Success),
            "FAILED" => Ok(TaskOutcome::Failed),
            "TIMED_OUT" => Ok(TaskOutcome::TimedOut),
            _ => Err(BrokerError::Serialization(format!("无效的任务结局: {s}"))),
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务所需的包引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

/// 任务配置
///
/// 调度器只解析 `executor_requirements`、`priority`、`timeout_seconds`、
/// `webhook`、`packages`，其余字段保存在 `extra` 中原样往返。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    #[serde(default)]
    pub executor_requirements: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(default)]
    pub packages: Vec<PackageRef>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskConfig {
    pub fn validate(&self) -> BrokerResult<()> {
        if self.executor_requirements.is_empty() {
            return Err(BrokerError::invalid_config("executor_requirements不能为空"));
        }
        if self
            .executor_requirements
            .iter()
            .any(|cap| cap.trim().is_empty())
        {
            return Err(BrokerError::invalid_config(
                "executor_requirements不能包含空字符串",
            ));
        }
        if self.timeout_seconds == Some(0) {
            return Err(BrokerError::invalid_config("timeout_seconds必须大于0"));
        }
        if let Some(webhook) = &self.webhook {
            if !(webhook.starts_with("http://") || webhook.starts_with("https://")) {
                return Err(BrokerError::invalid_config(format!(
                    "webhook必须是http(s) URL: {webhook}"
                )));
            }
        }
        for package in &self.packages {
            if package.name.trim().is_empty() || package.version.trim().is_empty() {
                return Err(BrokerError::invalid_config("包引用必须包含name和version"));
            }
        }
        Ok(())
    }

    /// 任务超时，未配置时使用默认值
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// 去重后的执行器需求，保持首次出现的顺序
    pub fn requirements(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.executor_requirements
            .iter()
            .filter(|cap| seen.insert(cap.as_str()))
            .cloned()
            .collect()
    }
}

/// 调度请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub config: TaskConfig,
    pub max_attempts: i32,
}

impl NewTask {
    pub fn new(name: impl Into<String>, config: TaskConfig) -> Self {
        Self {
            name: name.into(),
            config,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn validate(&self) -> BrokerResult<()> {
        if self.name.trim().is_empty() {
            return Err(BrokerError::validation_error("任务名称不能为空"));
        }
        if self.max_attempts < 1 {
            return Err(BrokerError::validation_error("max_attempts必须大于等于1"));
        }
        self.config.validate()
    }
}

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// 一次成功领取的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub capability: String,
    pub task: Task,
}

impl Task {
    pub fn is_complete(&self) -> bool {
        matches!(self.state, TaskState::Complete)
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self.state, TaskState::Assigned)
    }

    /// 是否还有剩余的执行尝试
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn requires(&self, capability: &str) -> bool {
        self.config
            .executor_requirements
            .iter()
            .any(|cap| cap == capability)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务 '{}' (ID: {}, 状态: {}, 尝试: {}/{})",
            self.name, self.id, self.state, self.attempts, self.max_attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_keeps_opaque_fields() {
        let raw = json!({
            "executor_requirements": ["macos"],
            "priority": 5,
            "command": ["sh", "-c", "echo hi"],
            "env": {"FOO": "bar"}
        });
        let config: TaskConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.priority, 5);
        assert_eq!(config.extra.get("command"), raw.get("command"));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back.get("env"), raw.get("env"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = TaskConfig {
            executor_requirements: vec!["android".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.webhook = Some("ftp://example.com".to_string());
        assert!(matches!(
            config.validate(),
            Err(BrokerError::InvalidTaskConfig(_))
        ));

        config.webhook = None;
        config.executor_requirements.push("  ".to_string());
        assert!(config.validate().is_err());

        let empty = TaskConfig::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_requirements_deduplicated_in_order() {
        let config = TaskConfig {
            executor_requirements: vec!["b".into(), "a".into(), "b".into()],
            ..Default::default()
        };
        assert_eq!(config.requirements(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_state_round_trip_strings() {
        for state in [TaskState::Scheduled, TaskState::Assigned, TaskState::Complete] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("CANCELLED".parse::<TaskState>().is_err());
        assert_eq!(TaskOutcome::from_exit_code(0), TaskOutcome::Success);
        assert_eq!(TaskOutcome::from_exit_code(2), TaskOutcome::Failed);
    }

    #[test]
    fn test_new_task_validation() {
        let config = TaskConfig {
            executor_requirements: vec!["linux".to_string()],
            ..Default::default()
        };
        assert!(NewTask::new("ok", config.clone()).validate().is_ok());
        assert!(NewTask::new("", config.clone()).validate().is_err());
        assert!(NewTask::new("x", config).with_max_attempts(0).validate().is_err());
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;

/// Worker遥测事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEventType {
    Startup,
    Shutdown,
    RecoverableFailure,
    UnrecoverableFailure,
    TaskAbandoned,
    DeviceDisconnected,
}

impl WorkerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerEventType::Startup => "STARTUP",
            WorkerEventType::Shutdown => "SHUTDOWN",
            WorkerEventType::RecoverableFailure => "RECOVERABLE_FAILURE",
            WorkerEventType::UnrecoverableFailure => "UNRECOVERABLE_FAILURE",
            WorkerEventType::TaskAbandoned => "TASK_ABANDONED",
            WorkerEventType::DeviceDisconnected => "DEVICE_DISCONNECTED",
        }
    }
}

impl FromStr for WorkerEventType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTUP" => Ok(WorkerEventType::Startup),
            "SHUTDOWN" => Ok(WorkerEventType::Shutdown),
            "RECOVERABLE_FAILURE" => Ok(WorkerEventType::RecoverableFailure),
            "UNRECOVERABLE_FAILURE" => Ok(WorkerEventType::UnrecoverableFailure),
            "TASK_ABANDONED" => Ok(WorkerEventType::TaskAbandoned),
            "DEVICE_DISCONNECTED" => Ok(WorkerEventType::DeviceDisconnected),
            _ => Err(BrokerError::Serialization(format!("无效的Worker事件类型: {s}"))),
        }
    }
}

impl fmt::Display for WorkerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Info => "INFO",
            EventSeverity::Warning => "WARNING",
            EventSeverity::Error => "ERROR",
        }
    }
}

impl FromStr for EventSeverity {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(EventSeverity::Info),
            "WARNING" => Ok(EventSeverity::Warning),
            "ERROR" => Ok(EventSeverity::Error),
            _ => Err(BrokerError::Serialization(format!("无效的事件级别: {s}"))),
        }
    }
}

/// 只追加的Worker事件日志，不会改变任务状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerEvent {
    pub id: i64,
    pub worker: String,
    pub event_type: WorkerEventType,
    pub severity: EventSeverity,
    pub info: String,
    pub task_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewWorkerEvent {
    pub worker: String,
    pub event_type: WorkerEventType,
    pub severity: EventSeverity,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub task_id: Option<i64>,
}

impl NewWorkerEvent {
    pub fn new(worker: impl Into<String>, event_type: WorkerEventType) -> Self {
        let severity = match event_type {
            WorkerEventType::Startup | WorkerEventType::Shutdown => EventSeverity::Info,
            WorkerEventType::RecoverableFailure
            | WorkerEventType::TaskAbandoned
            | WorkerEventType::DeviceDisconnected => EventSeverity::Warning,
            WorkerEventType::UnrecoverableFailure => EventSeverity::Error,
        };
        Self {
            worker: worker.into(),
            event_type,
            severity,
            info: String::new(),
            task_id: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务执行结果，由唯一的任务持有，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub id: i64,
    pub task_id: i64,
    pub exit_code: i32,
    pub execution_time_ms: Option<i64>,
    pub stdout_ref: Option<String>,
    pub stderr_ref: Option<String>,
    pub device_serial_number: Option<String>,
    pub result_metadata: serde_json::Map<String, serde_json::Value>,
    pub worker_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Worker上报的执行结果
///
/// `stdout`/`stderr` 以附件形式单独上传，写入Blob存储后以引用保存。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultReport {
    pub attempt: i32,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_serial_number: Option<String>,
    #[serde(default)]
    pub result_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_log: Option<String>,
}

/// 待持久化的结果记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskResult {
    pub exit_code: i32,
    pub execution_time_ms: Option<i64>,
    pub stdout_ref: Option<String>,
    pub stderr_ref: Option<String>,
    pub device_serial_number: Option<String>,
    pub result_metadata: serde_json::Map<String, serde_json::Value>,
    pub worker_log: Option<String>,
}

impl NewTaskResult {
    pub fn from_report(
        report: ResultReport,
        stdout_ref: Option<String>,
        stderr_ref: Option<String>,
    ) -> Self {
        Self {
            exit_code: report.exit_code,
            execution_time_ms: report.execution_time_ms,
            stdout_ref,
            stderr_ref,
            device_serial_number: report.device_serial_number,
            result_metadata: report.result_metadata,
            worker_log: report.worker_log,
        }
    }
}

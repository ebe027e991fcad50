use std::sync::Arc;

use broker_core::{
    models::{NewWorkerEvent, WorkerEvent},
    traits::WorkerEventRepository,
    BrokerError, BrokerResult,
};
use tracing::{info, warn};

pub const DEFAULT_EVENT_LIMIT: i64 = 50;

/// Worker遥测事件，只记录不影响任务状态
pub struct WorkerTelemetry {
    events: Arc<dyn WorkerEventRepository>,
}

impl WorkerTelemetry {
    pub fn new(events: Arc<dyn WorkerEventRepository>) -> Self {
        Self { events }
    }

    pub async fn record(&self, event: NewWorkerEvent) -> BrokerResult<WorkerEvent> {
        if event.worker.trim().is_empty() {
            return Err(BrokerError::validation_error("Worker名称不能为空"));
        }
        let stored = self.events.append(&event).await?;
        match stored.severity {
            broker_core::models::EventSeverity::Info => info!(
                worker = %stored.worker,
                "Worker事件 {}: {}",
                stored.event_type,
                stored.info
            ),
            _ => warn!(
                worker = %stored.worker,
                task_id = ?stored.task_id,
                "Worker事件 {}: {}",
                stored.event_type,
                stored.info
            ),
        }
        Ok(stored)
    }

    pub async fn recent(&self, worker: &str, limit: Option<i64>) -> BrokerResult<Vec<WorkerEvent>> {
        let limit = limit.unwrap_or(DEFAULT_EVENT_LIMIT).clamp(1, 500);
        self.events.list_recent(worker, limit).await
    }
}

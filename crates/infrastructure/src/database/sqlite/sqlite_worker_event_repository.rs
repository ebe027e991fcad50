use async_trait::async_trait;
use broker_core::{
    models::{NewWorkerEvent, WorkerEvent},
    traits::WorkerEventRepository,
    BrokerResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::instrument;

use crate::{
    database::mapping::MappingHelpers,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

pub struct SqliteWorkerEventRepository {
    pool: SqlitePool,
}

impl SqliteWorkerEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &SqliteRow) -> BrokerResult<WorkerEvent> {
        Ok(WorkerEvent {
            id: row.try_get("id")?,
            worker: row.try_get("worker")?,
            event_type: MappingHelpers::parsed(row, "event_type")?,
            severity: MappingHelpers::parsed(row, "severity")?,
            info: row.try_get("info")?,
            task_id: row.try_get("task_id")?,
            created_at: MappingHelpers::time(row, "created_at")?,
        })
    }
}

#[async_trait]
impl WorkerEventRepository for SqliteWorkerEventRepository {
    #[instrument(skip(self, event), fields(worker = %event.worker, event_type = %event.event_type))]
    async fn append(&self, event: &NewWorkerEvent) -> BrokerResult<WorkerEvent> {
        let created_at = MappingHelpers::now_millis();
        let id = sqlx::query(
            r#"
            INSERT INTO worker_events (worker, event_type, severity, info, task_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.worker)
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(&event.info)
        .bind(event.task_id)
        .bind(MappingHelpers::to_millis(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Create,
                format!("Worker {} 的事件", event.worker),
                e,
            )
        })?
        .last_insert_rowid();

        Ok(WorkerEvent {
            id,
            worker: event.worker.clone(),
            event_type: event.event_type,
            severity: event.severity,
            info: event.info.clone(),
            task_id: event.task_id,
            created_at,
        })
    }

    #[instrument(skip(self), fields(worker = %worker))]
    async fn list_recent(&self, worker: &str, limit: i64) -> BrokerResult<Vec<WorkerEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, worker, event_type, severity, info, task_id, created_at
            FROM worker_events WHERE worker = ? ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(worker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Query,
                format!("Worker {worker} 的事件"),
                e,
            )
        })?;

        rows.iter().map(Self::row_to_event).collect()
    }
}

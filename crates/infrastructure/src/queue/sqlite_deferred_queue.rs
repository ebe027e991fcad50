use std::time::Duration;

use async_trait::async_trait;
use broker_core::{
    models::{DeferredEntry, DeferredJob},
    traits::DeferredQueue,
    BrokerError, BrokerResult,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

/// 基于SQLite表的持久化延迟队列
///
/// 取出操作是单条 `UPDATE ... RETURNING` 语句，把到期作业的到期时间推后一个租约，
/// 因此多个消费者不会同时拿到同一个作业；消费者崩溃时作业在租约过期后重新可见。
pub struct SqliteDeferredQueue {
    pool: SqlitePool,
}

impl SqliteDeferredQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn queue_error(err: sqlx::Error) -> BrokerError {
    BrokerError::Queue(err.to_string())
}

#[async_trait]
impl DeferredQueue for SqliteDeferredQueue {
    #[instrument(skip(self, job), fields(kind = job.kind(), task_id = job.task_id()))]
    async fn enqueue(&self, job: &DeferredJob, due_at: DateTime<Utc>) -> BrokerResult<i64> {
        let payload = serde_json::to_string(job)?;
        let id = sqlx::query(
            "INSERT INTO deferred_jobs (kind, payload, due_at_ms, deliveries, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(job.kind())
        .bind(payload)
        .bind(MappingHelpers::to_millis(due_at))
        .bind(MappingHelpers::to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(queue_error)?
        .last_insert_rowid();

        debug!("延迟作业已入队: {} (ID: {}, 到期: {})", job.kind(), id, due_at);
        Ok(id)
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> BrokerResult<Vec<DeferredEntry>> {
        let now_ms = MappingHelpers::to_millis(now);
        let leased_until = now_ms + lease.as_millis() as i64;

        let rows = sqlx::query(
            r#"
            UPDATE deferred_jobs
            SET due_at_ms = ?, deliveries = deliveries + 1
            WHERE id IN (
                SELECT id FROM deferred_jobs WHERE due_at_ms <= ? ORDER BY due_at_ms, id LIMIT ?
            )
            RETURNING id, payload, due_at_ms, deliveries
            "#,
        )
        .bind(leased_until)
        .bind(now_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload").map_err(queue_error)?;
            entries.push(DeferredEntry {
                id: row.try_get("id").map_err(queue_error)?,
                job: serde_json::from_str(&payload)?,
                due_at: MappingHelpers::from_millis(
                    row.try_get("due_at_ms").map_err(queue_error)?,
                )?,
                deliveries: row.try_get("deliveries").map_err(queue_error)?,
            });
        }
        entries.sort_by_key(|entry| entry.id);

        Ok(entries)
    }

    async fn ack(&self, id: i64) -> BrokerResult<()> {
        sqlx::query("DELETE FROM deferred_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    async fn reschedule(&self, id: i64, due_at: DateTime<Utc>) -> BrokerResult<()> {
        sqlx::query("UPDATE deferred_jobs SET due_at_ms = ? WHERE id = ?")
            .bind(MappingHelpers::to_millis(due_at))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    async fn pending_count(&self) -> BrokerResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM deferred_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(queue_error)
    }
}

use async_trait::async_trait;
use broker_core::{
    models::{NewTask, NewTaskResult, Task, TaskOutcome, TaskResult, TaskState},
    traits::TaskRepository,
    BrokerError, BrokerResult,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use crate::{
    database::mapping::MappingHelpers,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

const TASK_COLUMNS: &str = "t.id, t.name, t.config, t.state, t.attempts, t.max_attempts, \
     t.scheduled_time, t.assigned_worker, t.assigned_time, t.completed_time, t.outcome, t.result_id";

/// 领取顺序：优先级高者优先，其次调度时间早者优先，最后按ID
const CLAIM_ORDER: &str = "ORDER BY t.priority DESC, t.scheduled_time ASC, t.id ASC";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> BrokerResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            config: MappingHelpers::json(row, "config")?,
            state: MappingHelpers::parsed(row, "state")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            scheduled_time: MappingHelpers::time(row, "scheduled_time")?,
            assigned_worker: row.try_get("assigned_worker")?,
            assigned_time: MappingHelpers::optional_time(row, "assigned_time")?,
            completed_time: MappingHelpers::optional_time(row, "completed_time")?,
            outcome: MappingHelpers::optional_parsed(row, "outcome")?,
            result_id: row.try_get("result_id")?,
        })
    }

    fn row_to_result(row: &SqliteRow) -> BrokerResult<TaskResult> {
        Ok(TaskResult {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            exit_code: row.try_get("exit_code")?,
            execution_time_ms: row.try_get("execution_time_ms")?,
            stdout_ref: row.try_get("stdout_ref")?,
            stderr_ref: row.try_get("stderr_ref")?,
            device_serial_number: row.try_get("device_serial_number")?,
            result_metadata: MappingHelpers::json(row, "result_metadata")?,
            worker_log: row.try_get("worker_log")?,
            created_at: MappingHelpers::time(row, "created_at")?,
        })
    }

    async fn fetch_task(&self, id: i64) -> BrokerResult<Task> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| BrokerError::Internal(format!("任务 {id} 在写入后无法读取")))
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name))]
    async fn create(&self, task: &NewTask) -> BrokerResult<Task> {
        let config_json = serde_json::to_string(&task.config)?;
        let now = MappingHelpers::to_millis(Utc::now());

        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO tasks (name, config, priority, state, attempts, max_attempts, scheduled_time)
            VALUES (?, ?, ?, 'SCHEDULED', 0, ?, ?)
            "#,
        )
        .bind(&task.name)
        .bind(config_json)
        .bind(task.config.priority)
        .bind(task.max_attempts)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(RepositoryOperation::Create, &task.name, e)
        })?
        .last_insert_rowid();

        for (position, capability) in task.config.requirements().iter().enumerate() {
            sqlx::query(
                "INSERT INTO task_requirements (task_id, capability, position) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(capability)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let created = self.fetch_task(id).await?;
        debug!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> BrokerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Read,
                    format!("任务 {id}"),
                    e,
                )
            })?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: i64) -> BrokerResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Delete,
                    format!("任务 {id}"),
                    e,
                )
            })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(capability = %capability, state = %state))]
    async fn list_by_executor(
        &self,
        capability: &str,
        state: TaskState,
        limit: i64,
    ) -> BrokerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             JOIN task_requirements r ON r.task_id = t.id \
             WHERE r.capability = ? AND t.state = ? {CLAIM_ORDER} LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(capability)
            .bind(state.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Query,
                    format!("执行器 {capability} 的任务"),
                    e,
                )
            })?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(capability = %capability))]
    async fn peek_oldest(&self, capability: &str) -> BrokerResult<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             JOIN task_requirements r ON r.task_id = t.id \
             WHERE r.capability = ? AND t.state = 'SCHEDULED' AND t.attempts < t.max_attempts \
             {CLAIM_ORDER} LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(capability)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    RepositoryOperation::Query,
                    format!("执行器 {capability} 的队首任务"),
                    e,
                )
            })?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self), fields(capability = %capability))]
    async fn delete_batch_by_executor(&self, capability: &str, limit: i64) -> BrokerResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks WHERE id IN (
                SELECT task_id FROM task_requirements WHERE capability = ? LIMIT ?
            )
            "#,
        )
        .bind(capability)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Delete,
                format!("执行器 {capability} 的任务"),
                e,
            )
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, now), fields(task_id = %task_id, attempts = %expected_attempts, worker = %worker))]
    async fn try_claim(
        &self,
        task_id: i64,
        expected_attempts: i32,
        worker: &str,
        now: DateTime<Utc>,
    ) -> BrokerResult<Option<Task>> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'ASSIGNED', attempts = attempts + 1, assigned_worker = ?, assigned_time = ?
            WHERE id = ? AND state = 'SCHEDULED' AND attempts = ? AND attempts < max_attempts
            "#,
        )
        .bind(worker)
        .bind(MappingHelpers::to_millis(now))
        .bind(task_id)
        .bind(expected_attempts)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Claim,
                format!("任务 {task_id}"),
                e,
            )
        })?;

        if result.rows_affected() == 0 {
            debug!("领取任务 {} 失败: 已被其他Worker领取", task_id);
            return Ok(None);
        }

        self.fetch_task(task_id).await.map(Some)
    }

    #[instrument(skip(self), fields(task_id = %task_id, attempt = %attempt))]
    async fn requeue(&self, task_id: i64, attempt: i32) -> BrokerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = 'SCHEDULED'
            WHERE id = ? AND state = 'ASSIGNED' AND attempts = ? AND attempts < max_attempts
            "#,
        )
        .bind(task_id)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Update,
                format!("任务 {task_id}"),
                e,
            )
        })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, now), fields(task_id = %task_id, attempt = %attempt))]
    async fn mark_timed_out(
        &self,
        task_id: i64,
        attempt: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = 'COMPLETE', outcome = ?, completed_time = ?
            WHERE id = ? AND state = 'ASSIGNED' AND attempts = ?
            "#,
        )
        .bind(TaskOutcome::TimedOut.as_str())
        .bind(MappingHelpers::to_millis(now))
        .bind(task_id)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Update,
                format!("任务 {task_id}"),
                e,
            )
        })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, result, now), fields(task_id = %task_id, attempt = %attempt))]
    async fn complete_with_result(
        &self,
        task_id: i64,
        attempt: i32,
        result: &NewTaskResult,
        now: DateTime<Utc>,
    ) -> BrokerResult<Task> {
        let now_ms = MappingHelpers::to_millis(now);
        let outcome = TaskOutcome::from_exit_code(result.exit_code);
        let mut tx = self.pool.begin().await?;

        // 先写后读，事务从第一条语句起就持有写锁
        let updated = sqlx::query(
            r#"
            UPDATE tasks SET state = 'COMPLETE', outcome = ?, completed_time = ?
            WHERE id = ? AND attempts = ? AND state IN ('ASSIGNED', 'SCHEDULED')
            "#,
        )
        .bind(outcome.as_str())
        .bind(now_ms)
        .bind(task_id)
        .bind(attempt)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<i32> = sqlx::query_scalar("SELECT attempts FROM tasks WHERE id = ?")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return Err(match current {
                None => BrokerError::task_not_found(task_id),
                Some(current) => BrokerError::StaleAttempt {
                    task_id,
                    reported: attempt,
                    current,
                },
            });
        }

        let result_id = sqlx::query(
            r#"
            INSERT INTO task_results (
                task_id, exit_code, execution_time_ms, stdout_ref, stderr_ref,
                device_serial_number, result_metadata, worker_log, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(result.exit_code)
        .bind(result.execution_time_ms)
        .bind(&result.stdout_ref)
        .bind(&result.stderr_ref)
        .bind(&result.device_serial_number)
        .bind(serde_json::to_string(&result.result_metadata)?)
        .bind(&result.worker_log)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE tasks SET result_id = ? WHERE id = ?")
            .bind(result_id)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.fetch_task(task_id).await
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get_result(&self, task_id: i64) -> BrokerResult<Option<TaskResult>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, exit_code, execution_time_ms, stdout_ref, stderr_ref,
                   device_serial_number, result_metadata, worker_log, created_at
            FROM task_results WHERE task_id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Read,
                format!("任务 {task_id} 的结果"),
                e,
            )
        })?;

        row.as_ref().map(Self::row_to_result).transpose()
    }

    async fn ping(&self) -> BrokerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

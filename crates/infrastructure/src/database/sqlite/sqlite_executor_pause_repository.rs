use async_trait::async_trait;
use broker_core::{models::ExecutorPauseState, traits::ExecutorPauseRepository, BrokerResult};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::{
    database::mapping::MappingHelpers,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

pub struct SqliteExecutorPauseRepository {
    pool: SqlitePool,
}

impl SqliteExecutorPauseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutorPauseRepository for SqliteExecutorPauseRepository {
    #[instrument(skip(self), fields(capability = %capability))]
    async fn get(&self, capability: &str) -> BrokerResult<Option<ExecutorPauseState>> {
        let row = sqlx::query(
            "SELECT capability, paused, expires_at, updated_at FROM executor_pause WHERE capability = ?",
        )
        .bind(capability)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Read,
                format!("执行器 {capability} 的暂停状态"),
                e,
            )
        })?;

        row.map(|row| -> BrokerResult<ExecutorPauseState> {
            Ok(ExecutorPauseState {
                capability: row.try_get("capability")?,
                paused: row.try_get("paused")?,
                expires_at: MappingHelpers::optional_time(&row, "expires_at")?,
                updated_at: MappingHelpers::time(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(capability = %capability, paused = paused))]
    async fn set(
        &self,
        capability: &str,
        paused: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> BrokerResult<ExecutorPauseState> {
        let updated_at = MappingHelpers::now_millis();
        let expires_at = expires_at
            .filter(|_| paused)
            .map(MappingHelpers::to_millis);

        sqlx::query(
            r#"
            INSERT INTO executor_pause (capability, paused, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(capability) DO UPDATE SET
                paused = excluded.paused,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(capability)
        .bind(paused)
        .bind(expires_at)
        .bind(MappingHelpers::to_millis(updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                RepositoryOperation::Update,
                format!("执行器 {capability} 的暂停状态"),
                e,
            )
        })?;

        Ok(ExecutorPauseState {
            capability: capability.to_string(),
            paused,
            expires_at: expires_at.map(MappingHelpers::from_millis).transpose()?,
            updated_at,
        })
    }
}

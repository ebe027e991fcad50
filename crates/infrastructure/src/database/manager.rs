use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use broker_core::config::DatabaseConfig;
use broker_core::traits::{
    ExecutorPauseRepository, PackageRepository, TaskRepository, WorkerEventRepository,
};
use broker_core::BrokerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use super::migrations::run_migrations;
use super::sqlite::{
    SqliteExecutorPauseRepository, SqlitePackageRepository, SqliteTaskRepository,
    SqliteWorkerEventRepository,
};
use crate::queue::SqliteDeferredQueue;

/// SQLite数据库管理器
///
/// 持有连接池并作为各个仓储实现的工厂。连接启用WAL与外键约束，
/// 写锁竞争时按 `busy_timeout_ms` 等待。
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> BrokerResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        info!(url = %config.url, "数据库连接已建立");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> BrokerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqliteTaskRepository::new(self.pool.clone()))
    }

    pub fn package_repository(&self) -> Arc<dyn PackageRepository> {
        Arc::new(SqlitePackageRepository::new(self.pool.clone()))
    }

    pub fn pause_repository(&self) -> Arc<dyn ExecutorPauseRepository> {
        Arc::new(SqliteExecutorPauseRepository::new(self.pool.clone()))
    }

    pub fn worker_event_repository(&self) -> Arc<dyn WorkerEventRepository> {
        Arc::new(SqliteWorkerEventRepository::new(self.pool.clone()))
    }

    pub fn deferred_queue(&self) -> Arc<SqliteDeferredQueue> {
        Arc::new(SqliteDeferredQueue::new(self.pool.clone()))
    }
}

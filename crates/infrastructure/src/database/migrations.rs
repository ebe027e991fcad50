use broker_core::BrokerResult;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error_handling::{RepositoryErrorHelpers, RepositoryOperation};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        config TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL DEFAULT 'SCHEDULED',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        scheduled_time INTEGER NOT NULL,
        assigned_worker TEXT,
        assigned_time INTEGER,
        completed_time INTEGER,
        outcome TEXT,
        result_id INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_requirements (
        task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        capability TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (task_id, capability)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL UNIQUE REFERENCES tasks(id) ON DELETE CASCADE,
        exit_code INTEGER NOT NULL,
        execution_time_ms INTEGER,
        stdout_ref TEXT,
        stderr_ref TEXT,
        device_serial_number TEXT,
        result_metadata TEXT NOT NULL DEFAULT '{}',
        worker_log TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS packages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (name, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS package_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        destination TEXT NOT NULL,
        file_mode TEXT NOT NULL,
        blob_key TEXT,
        url TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS executor_pause (
        capability TEXT PRIMARY KEY,
        paused INTEGER NOT NULL,
        expires_at INTEGER,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS worker_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        worker TEXT NOT NULL,
        event_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        info TEXT NOT NULL DEFAULT '',
        task_id INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deferred_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        due_at_ms INTEGER NOT NULL,
        deliveries INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_task_requirements_capability ON task_requirements(capability, task_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_claim_order ON tasks(state, priority DESC, scheduled_time, id)",
    "CREATE INDEX IF NOT EXISTS idx_package_files_package ON package_files(package_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_worker_events_worker ON worker_events(worker, id)",
    "CREATE INDEX IF NOT EXISTS idx_deferred_jobs_due ON deferred_jobs(due_at_ms)",
];

/// 运行数据库迁移，所有语句都是幂等的
pub async fn run_migrations(pool: &SqlitePool) -> BrokerResult<()> {
    debug!("Running SQLite database migrations");

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            RepositoryErrorHelpers::database_error(RepositoryOperation::Migrate, "数据库结构", e)
        })?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}

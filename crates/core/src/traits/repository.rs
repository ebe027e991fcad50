//! 数据仓储层接口定义
//!
//! - `TaskRepository` - 任务的持久化与原子领取
//! - `PackageRepository` - 不可变文件包的元数据
//! - `ExecutorPauseRepository` - 执行器暂停标志
//! - `WorkerEventRepository` - Worker遥测事件
//!
//! 所有会改变任务状态的方法都以 `attempts` 作为比较交换条件，
//! 竞争失败通过返回值表达，而不是错误。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::BrokerResult;
use crate::models::{
    ExecutorPauseState, NewTask, NewTaskResult, NewWorkerEvent, Package, PackageFile, Task,
    TaskResult, TaskState, WorkerEvent,
};

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务，初始状态为 SCHEDULED，`attempts` 为 0
    async fn create(&self, task: &NewTask) -> BrokerResult<Task>;

    async fn get_by_id(&self, id: i64) -> BrokerResult<Option<Task>>;

    /// 删除任务及其结果，任务不存在时返回 `false`
    async fn delete(&self, id: i64) -> BrokerResult<bool>;

    /// 列出需要某个能力且处于给定状态的任务，按领取顺序排列
    async fn list_by_executor(
        &self,
        capability: &str,
        state: TaskState,
        limit: i64,
    ) -> BrokerResult<Vec<Task>>;

    /// 队首任务：可领取的 SCHEDULED 任务中优先级最高、调度时间最早的一个
    async fn peek_oldest(&self, capability: &str) -> BrokerResult<Option<Task>>;

    /// 删除最多 `limit` 个需要该能力的任务，返回实际删除数量
    async fn delete_batch_by_executor(&self, capability: &str, limit: i64) -> BrokerResult<u64>;

    /// 比较交换式领取
    ///
    /// 仅当任务仍为 SCHEDULED 且 `attempts == expected_attempts` 时生效，
    /// 竞争失败返回 `None`。
    async fn try_claim(
        &self,
        task_id: i64,
        expected_attempts: i32,
        worker: &str,
        now: DateTime<Utc>,
    ) -> BrokerResult<Option<Task>>;

    /// ASSIGNED 且尝试编号匹配时放回 SCHEDULED
    async fn requeue(&self, task_id: i64, attempt: i32) -> BrokerResult<bool>;

    /// ASSIGNED 且尝试编号匹配时终结为 COMPLETE/TIMED_OUT
    async fn mark_timed_out(
        &self,
        task_id: i64,
        attempt: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<bool>;

    /// 在一个事务内写入结果并完成任务
    ///
    /// 任务不存在返回 `TaskNotFound`，尝试编号不匹配或任务已完成返回
    /// `StaleAttempt`，两种情况都不会修改任务。
    async fn complete_with_result(
        &self,
        task_id: i64,
        attempt: i32,
        result: &NewTaskResult,
        now: DateTime<Utc>,
    ) -> BrokerResult<Task>;

    async fn get_result(&self, task_id: i64) -> BrokerResult<Option<TaskResult>>;

    /// 存储可用性检查
    async fn ping(&self) -> BrokerResult<()>;
}

/// 文件包仓储接口
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// 原子地检查并插入，`(name, version)` 已存在时返回 `DuplicatePackage`
    async fn create(&self, name: &str, version: &str, files: &[PackageFile])
        -> BrokerResult<Package>;

    async fn get(&self, name: &str, version: &str) -> BrokerResult<Option<Package>>;

    /// 删除包及其文件记录，返回被删除的包以便清理Blob
    async fn delete(&self, name: &str, version: &str) -> BrokerResult<Option<Package>>;

    async fn list_versions(&self, name: &str) -> BrokerResult<Vec<String>>;
}

/// 执行器暂停标志仓储接口
#[async_trait]
pub trait ExecutorPauseRepository: Send + Sync {
    async fn get(&self, capability: &str) -> BrokerResult<Option<ExecutorPauseState>>;

    async fn set(
        &self,
        capability: &str,
        paused: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> BrokerResult<ExecutorPauseState>;
}

/// Worker事件仓储接口，只追加
#[async_trait]
pub trait WorkerEventRepository: Send + Sync {
    async fn append(&self, event: &NewWorkerEvent) -> BrokerResult<WorkerEvent>;

    async fn list_recent(&self, worker: &str, limit: i64) -> BrokerResult<Vec<WorkerEvent>>;
}

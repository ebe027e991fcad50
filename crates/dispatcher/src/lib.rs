//! # broker-dispatcher
//!
//! 任务代理的服务层：任务存储与领取、超时监督、结果接收、包注册表、
//! 执行器暂停以及延迟作业执行器。所有I/O通过 `broker-core` 中的trait注入。

pub mod deferred_runner;
pub mod package_registry;
pub mod pause_controller;
pub mod result_ingestion;
pub mod task_store;
pub mod telemetry;
pub mod timeout_supervisor;

use std::sync::Arc;

use broker_core::{
    config::BrokerConfig,
    traits::{
        BlobStore, DeferredQueue, ExecutorPauseRepository, MetricsSink, PackageRepository,
        TaskRepository, WebhookNotifier, WorkerEventRepository,
    },
};

pub use deferred_runner::{DeferredJobRunner, DeferredRunnerConfig, RunStats};
pub use package_registry::PackageRegistry;
pub use pause_controller::ExecutorPauseController;
pub use result_ingestion::{ResultIngestion, ResultSubmission};
pub use task_store::{ScheduleRequest, TaskDetails, TaskStore, TaskStoreConfig};
pub use telemetry::WorkerTelemetry;
pub use timeout_supervisor::{DeadlineOutcome, TimeoutSupervisor};

/// 服务层依赖的全部外部组件
#[derive(Clone)]
pub struct BrokerDependencies {
    pub tasks: Arc<dyn TaskRepository>,
    pub packages: Arc<dyn PackageRepository>,
    pub pauses: Arc<dyn ExecutorPauseRepository>,
    pub events: Arc<dyn WorkerEventRepository>,
    pub queue: Arc<dyn DeferredQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn WebhookNotifier>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// 组装完成的服务集合
#[derive(Clone)]
pub struct Broker {
    pub tasks: Arc<TaskStore>,
    pub results: Arc<ResultIngestion>,
    pub packages: Arc<PackageRegistry>,
    pub pauses: Arc<ExecutorPauseController>,
    pub supervisor: Arc<TimeoutSupervisor>,
    pub telemetry: Arc<WorkerTelemetry>,
    pub runner: Arc<DeferredJobRunner>,
}

impl Broker {
    pub fn new(deps: BrokerDependencies, config: &BrokerConfig) -> Self {
        let pauses = Arc::new(ExecutorPauseController::new(deps.pauses.clone()));
        let supervisor = Arc::new(TimeoutSupervisor::new(
            deps.tasks.clone(),
            deps.queue.clone(),
            deps.metrics.clone(),
            config.default_timeout(),
            config.grace_period(),
        ));
        let tasks = Arc::new(TaskStore::new(
            deps.tasks.clone(),
            pauses.clone(),
            supervisor.clone(),
            deps.blobs.clone(),
            deps.metrics.clone(),
            TaskStoreConfig {
                default_max_attempts: config.default_max_attempts,
                claim_retry_limit: config.claim_retry_limit,
                bulk_delete_batch_size: config.bulk_delete_batch_size,
            },
        ));
        let results = Arc::new(ResultIngestion::new(
            deps.tasks.clone(),
            deps.blobs.clone(),
            deps.queue.clone(),
            deps.metrics.clone(),
        ));
        let packages = Arc::new(PackageRegistry::new(
            deps.packages.clone(),
            deps.blobs.clone(),
            deps.metrics.clone(),
            config.public_url.clone(),
        ));
        let telemetry = Arc::new(WorkerTelemetry::new(deps.events.clone()));
        let runner = Arc::new(DeferredJobRunner::new(
            deps.queue.clone(),
            supervisor.clone(),
            deps.notifier.clone(),
            deps.metrics.clone(),
            DeferredRunnerConfig {
                poll_interval: config.deferred_poll_interval(),
                batch_size: config.deferred_batch_size,
                lease: config.deferred_lease(),
                webhook_max_deliveries: config.webhook_max_deliveries,
                webhook_retry_delay: config.webhook_retry_delay(),
            },
        ));

        Self {
            tasks,
            results,
            packages,
            pauses,
            supervisor,
            telemetry,
            runner,
        }
    }
}

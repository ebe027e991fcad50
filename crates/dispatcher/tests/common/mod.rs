#![allow(dead_code)]

use std::sync::Arc;

use broker_core::config::BrokerConfig;
use broker_core::models::{Assignment, ResultReport, Task};
use broker_dispatcher::{Broker, BrokerDependencies, ResultSubmission, ScheduleRequest};
use broker_testing_utils::{
    MemoryBlobStore, RecordingDeferredQueue, RecordingMetricsSink, RecordingWebhookNotifier,
    TaskConfigBuilder, TestDatabase,
};

pub struct Harness {
    pub db: TestDatabase,
    pub broker: Broker,
    pub queue: Arc<RecordingDeferredQueue>,
    pub blobs: Arc<MemoryBlobStore>,
    pub notifier: Arc<RecordingWebhookNotifier>,
    pub metrics: Arc<RecordingMetricsSink>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(BrokerConfig::default(), RecordingWebhookNotifier::new()).await
    }

    pub async fn with(config: BrokerConfig, notifier: RecordingWebhookNotifier) -> Self {
        let db = TestDatabase::new().await;
        let queue = Arc::new(RecordingDeferredQueue::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let notifier = Arc::new(notifier);
        let metrics = Arc::new(RecordingMetricsSink::new());

        let deps = BrokerDependencies {
            tasks: db.manager.task_repository(),
            packages: db.manager.package_repository(),
            pauses: db.manager.pause_repository(),
            events: db.manager.worker_event_repository(),
            queue: queue.clone(),
            blobs: blobs.clone(),
            notifier: notifier.clone(),
            metrics: metrics.clone(),
        };
        let broker = Broker::new(deps, &config);

        Self {
            db,
            broker,
            queue,
            blobs,
            notifier,
            metrics,
        }
    }

    pub async fn schedule(&self, name: &str, capability: &str) -> Task {
        self.schedule_with(name, TaskConfigBuilder::new().requires(capability), None)
            .await
    }

    pub async fn schedule_with(
        &self,
        name: &str,
        config: TaskConfigBuilder,
        max_attempts: Option<i32>,
    ) -> Task {
        self.broker
            .tasks
            .schedule(ScheduleRequest {
                name: name.to_string(),
                config: config.build(),
                max_attempts,
            })
            .await
            .unwrap()
    }

    pub async fn assign(&self, worker: &str, capabilities: &[&str]) -> Option<Assignment> {
        let capabilities: Vec<String> = capabilities.iter().map(|c| c.to_string()).collect();
        self.broker
            .tasks
            .assign(worker, &capabilities)
            .await
            .unwrap()
    }
}

pub fn report(attempt: i32, exit_code: i32) -> ResultSubmission {
    ResultSubmission {
        report: ResultReport {
            attempt,
            exit_code,
            execution_time_ms: Some(1500),
            ..Default::default()
        },
        stdout: None,
        stderr: None,
    }
}

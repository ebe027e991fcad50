use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_api::create_app;
use broker_core::config::{ApiConfig, BrokerConfig, WorkerConfig};
use broker_core::models::{
    NewPackage, NewPackageFile, Task, TaskConfig, TaskState, WorkerEventType,
};
use broker_dispatcher::{Broker, BrokerDependencies, ScheduleRequest};
use broker_testing_utils::{
    MemoryBlobStore, RecordingDeferredQueue, RecordingMetricsSink, RecordingWebhookNotifier,
    TaskConfigBuilder, TestDatabase, TestEnv,
};
use broker_worker::{
    ExecutionOutcome, PollOutcome, TaskExecutor, WorkerAgent, WorkerError, WorkerResult,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

struct TestBroker {
    _db: TestDatabase,
    broker: Broker,
    url: String,
    work_root: TempDir,
}

impl TestBroker {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let db = TestDatabase::new().await;
        let deps = BrokerDependencies {
            tasks: db.manager.task_repository(),
            packages: db.manager.package_repository(),
            pauses: db.manager.pause_repository(),
            events: db.manager.worker_event_repository(),
            queue: Arc::new(RecordingDeferredQueue::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            notifier: Arc::new(RecordingWebhookNotifier::new()),
            metrics: Arc::new(RecordingMetricsSink::new()),
        };
        let config = BrokerConfig {
            public_url: url.clone(),
            ..Default::default()
        };
        let broker = Broker::new(deps, &config);
        let app = create_app(broker.clone(), &ApiConfig::default(), None);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _db: db,
            broker,
            url,
            work_root: tempfile::tempdir().unwrap(),
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            enabled: true,
            broker_url: self.url.clone(),
            name: Some("bench-1".to_string()),
            capabilities: vec!["pixel".to_string()],
            work_dir: Some(self.work_root.path().display().to_string()),
            poll_interval_seconds: 1,
            package_retry_attempts: 2,
            package_retry_delay_seconds: 0,
            report_retry_attempts: 2,
            report_retry_delay_seconds: 0,
            ..Default::default()
        }
    }

    fn agent(&self) -> WorkerAgent {
        WorkerAgent::new(self.worker_config()).unwrap()
    }

    async fn schedule(&self, config: TaskConfigBuilder) -> Task {
        self.broker
            .tasks
            .schedule(ScheduleRequest {
                name: "flash".to_string(),
                config: config.build(),
                max_attempts: None,
            })
            .await
            .unwrap()
    }

    async fn event_types(&self, worker: &str) -> Vec<WorkerEventType> {
        self.broker
            .telemetry
            .recent(worker, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    fn scratch_dirs_left(&self) -> usize {
        std::fs::read_dir(self.work_root.path()).unwrap().count()
    }
}

/// 执行期间删除任务，使随后的上报变成过期尝试
struct DeletingExecutor {
    broker: Broker,
    task_id: i64,
}

#[async_trait]
impl TaskExecutor for DeletingExecutor {
    async fn execute(
        &self,
        _config: &TaskConfig,
        _work_dir: &Path,
        _timeout: Duration,
    ) -> WorkerResult<ExecutionOutcome> {
        self.broker
            .tasks
            .delete(self.task_id)
            .await
            .map_err(|e| WorkerError::Execution(e.to_string()))?;
        Ok(ExecutionOutcome::default())
    }
}

#[tokio::test]
async fn test_idle_when_no_work() {
    let broker = TestBroker::start().await;
    let outcome = broker.agent().run_once().await.unwrap();
    assert_eq!(outcome, PollOutcome::Idle);
}

#[cfg(unix)]
#[tokio::test]
async fn test_installs_package_executes_and_reports() {
    let broker = TestBroker::start().await;
    broker
        .broker
        .packages
        .create(NewPackage {
            name: "tools".to_string(),
            version: "1.0".to_string(),
            files: vec![NewPackageFile {
                destination: "bin/hello.sh".to_string(),
                file_mode: "755".to_string(),
                content: b"#!/bin/sh\necho hello-from-package\n".to_vec(),
            }],
            url_files: Vec::new(),
        })
        .await
        .unwrap();
    let task = broker
        .schedule(
            TaskConfigBuilder::new()
                .requires("pixel")
                .with_package("tools", "1.0")
                .with_extra("command", json!("./bin/hello.sh")),
        )
        .await;

    let outcome = broker.agent().run_once().await.unwrap();
    assert_eq!(
        outcome,
        PollOutcome::Completed {
            task_id: task.id,
            exit_code: 0
        }
    );

    let details = broker.broker.tasks.get_details(task.id).await.unwrap();
    assert_eq!(details.task.state, TaskState::Complete);
    let result = details.result.unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.result_metadata["capability"], "pixel");
    let stdout = broker
        .broker
        .packages
        .blob(result.stdout_ref.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(stdout, b"hello-from-package\n");
    assert_eq!(broker.scratch_dirs_left(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_command_is_reported_with_exit_code() {
    let broker = TestBroker::start().await;
    let task = broker
        .schedule(
            TaskConfigBuilder::new()
                .requires("pixel")
                .with_extra("command", json!("echo broken >&2; exit 4")),
        )
        .await;

    let outcome = broker.agent().run_once().await.unwrap();
    assert_eq!(
        outcome,
        PollOutcome::Completed {
            task_id: task.id,
            exit_code: 4
        }
    );
    let details = broker.broker.tasks.get_details(task.id).await.unwrap();
    assert!(details.result.unwrap().stderr_ref.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_work_dir_is_created() {
    let broker = TestBroker::start().await;
    let task = broker
        .schedule(
            TaskConfigBuilder::new()
                .requires("pixel")
                .with_command("true", &[]),
        )
        .await;

    let nested = broker.work_root.path().join("nested").join("scratch");
    let agent = WorkerAgent::new(WorkerConfig {
        work_dir: Some(nested.display().to_string()),
        ..broker.worker_config()
    })
    .unwrap();
    let outcome = agent.run_once().await.unwrap();
    assert_eq!(
        outcome,
        PollOutcome::Completed {
            task_id: task.id,
            exit_code: 0
        }
    );
    assert!(nested.is_dir());
    assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_package_aborts_without_report() {
    let broker = TestBroker::start().await;
    let task = broker
        .schedule(
            TaskConfigBuilder::new()
                .requires("pixel")
                .with_package("absent", "9.9")
                .with_command("true", &[]),
        )
        .await;

    let outcome = broker.agent().run_once().await.unwrap();
    assert_eq!(outcome, PollOutcome::Aborted { task_id: task.id });

    let current = broker.broker.tasks.get(task.id).await.unwrap();
    assert_eq!(current.state, TaskState::Assigned);
    assert!(broker
        .event_types("bench-1")
        .await
        .contains(&WorkerEventType::UnrecoverableFailure));
    assert_eq!(broker.scratch_dirs_left(), 0);
}

#[tokio::test]
async fn test_stale_report_abandons_task() {
    let broker = TestBroker::start().await;
    let task = broker
        .schedule(
            TaskConfigBuilder::new()
                .requires("pixel")
                .with_command("true", &[]),
        )
        .await;

    let agent = broker.agent().with_executor(Arc::new(DeletingExecutor {
        broker: broker.broker.clone(),
        task_id: task.id,
    }));
    let outcome = agent.run_once().await.unwrap();
    assert_eq!(outcome, PollOutcome::Abandoned { task_id: task.id });
    assert!(broker
        .event_types("bench-1")
        .await
        .contains(&WorkerEventType::TaskAbandoned));
}

#[cfg(unix)]
#[tokio::test]
async fn test_disconnected_device_skips_polling() {
    let broker = TestBroker::start().await;
    let task = broker
        .schedule(TaskConfigBuilder::new().requires("pixel"))
        .await;

    let config = WorkerConfig {
        device_serial: Some("R58M".to_string()),
        device_probe_command: vec!["false".to_string()],
        ..broker.worker_config()
    };
    let agent = WorkerAgent::new(config).unwrap();

    assert_eq!(agent.run_once().await.unwrap(), PollOutcome::DeviceDisconnected);
    assert_eq!(agent.run_once().await.unwrap(), PollOutcome::DeviceDisconnected);

    let current = broker.broker.tasks.get(task.id).await.unwrap();
    assert_eq!(current.state, TaskState::Scheduled);
    let disconnects = broker
        .event_types("bench-1")
        .await
        .into_iter()
        .filter(|t| *t == WorkerEventType::DeviceDisconnected)
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_unreachable_broker_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let agent = WorkerAgent::new(WorkerConfig {
        broker_url: url,
        name: Some("bench-1".to_string()),
        ..Default::default()
    })
    .unwrap();
    let err = agent.run_once().await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_run_emits_lifecycle_events_and_stops() {
    let broker = TestBroker::start().await;
    let agent = Arc::new(broker.agent());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run(shutdown_rx).await })
    };
    let started = TestEnv::wait_for(
        || async { !broker.event_types("bench-1").await.is_empty() },
        Duration::from_secs(5),
    )
    .await;
    assert!(started);
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let events = broker.event_types("bench-1").await;
    assert_eq!(
        events,
        vec![WorkerEventType::Shutdown, WorkerEventType::Startup]
    );
}

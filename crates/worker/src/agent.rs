use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_core::config::WorkerConfig;
use broker_core::models::{Assignment, NewWorkerEvent, ResultReport, WorkerEventType};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::components::{
    with_retry, BrokerClient, DeviceMonitor, PackageInstaller, WorkerIdentity,
};
use crate::error::{WorkerError, WorkerResult};
use crate::executors::{CommandExecutor, ExecutionOutcome, TaskExecutor};

/// 单次轮询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// 绑定的设备不在线，未领取任务
    DeviceDisconnected,
    /// 没有可领取的任务
    Idle,
    /// 结果已被接受
    Completed { task_id: i64, exit_code: i32 },
    /// 服务端拒绝了结果，本次尝试已过期
    Abandoned { task_id: i64 },
    /// 安装包或上报失败，任务留给服务端超时处理
    Aborted { task_id: i64 },
}

/// Worker代理：轮询、安装包、执行、上报
pub struct WorkerAgent {
    identity: WorkerIdentity,
    client: Arc<BrokerClient>,
    installer: PackageInstaller,
    executor: Arc<dyn TaskExecutor>,
    device: DeviceMonitor,
    config: WorkerConfig,
    device_online: AtomicBool,
}

impl WorkerAgent {
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let identity = WorkerIdentity::discover(&config);
        Self::with_identity(config, identity)
    }

    pub fn with_identity(config: WorkerConfig, identity: WorkerIdentity) -> WorkerResult<Self> {
        let client = Arc::new(BrokerClient::new(
            &config.broker_url,
            config.request_timeout(),
        )?);
        let installer = PackageInstaller::new(
            client.clone(),
            config.package_retry_attempts,
            config.package_retry_delay(),
        );
        let device = DeviceMonitor::new(
            config.device_serial.clone(),
            config.device_probe_command.clone(),
        );
        Ok(Self {
            identity,
            client,
            installer,
            executor: Arc::new(CommandExecutor::new()),
            device,
            config,
            device_online: AtomicBool::new(true),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// 轮询直到收到关闭信号，当前这一轮会先执行完
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            worker = %self.identity.name,
            capabilities = ?self.identity.capabilities,
            "Worker代理启动，代理地址 {}",
            self.client.base_url()
        );
        self.emit(NewWorkerEvent::new(&self.identity.name, WorkerEventType::Startup))
            .await;

        loop {
            let delay = match self.run_once().await {
                Ok(PollOutcome::DeviceDisconnected) => self.config.device_retry_interval(),
                Ok(PollOutcome::Idle) => self.config.poll_interval(),
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    warn!("领取任务失败: {}", e);
                    self.config.poll_interval()
                }
            };

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.emit(NewWorkerEvent::new(&self.identity.name, WorkerEventType::Shutdown))
            .await;
        info!("Worker代理 {} 已停止", self.identity.name);
    }

    /// 执行一轮：检查设备、领取任务、处理任务
    pub async fn run_once(&self) -> WorkerResult<PollOutcome> {
        if !self.check_device().await {
            return Ok(PollOutcome::DeviceDisconnected);
        }

        let assignment = self
            .client
            .assign(
                &self.identity.name,
                &self.identity.hostname,
                &self.identity.capabilities,
            )
            .await?;
        match assignment {
            Some(assignment) => Ok(self.process(assignment).await),
            None => Ok(PollOutcome::Idle),
        }
    }

    async fn check_device(&self) -> bool {
        let online = self.device.is_connected().await;
        let was_online = self.device_online.swap(online, Ordering::SeqCst);
        if was_online && !online {
            warn!(serial = ?self.device.serial(), "设备已断开，暂停领取任务");
            self.emit(
                NewWorkerEvent::new(&self.identity.name, WorkerEventType::DeviceDisconnected)
                    .with_info(self.device.serial().unwrap_or_default()),
            )
            .await;
        } else if !was_online && online {
            info!(serial = ?self.device.serial(), "设备已恢复连接");
        }
        online
    }

    #[instrument(skip(self, assignment), fields(task_id = assignment.task.id, attempt = assignment.task.attempts))]
    async fn process(&self, assignment: Assignment) -> PollOutcome {
        let task = &assignment.task;
        let task_id = task.id;
        info!(
            "领取到任务 {} ({})，匹配能力 {}",
            task_id, task.name, assignment.capability
        );

        // 临时目录在离开作用域时删除
        let scratch = match self.scratch_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                self.emit_failure(task_id, &e).await;
                return PollOutcome::Aborted { task_id };
            }
        };

        if let Err(e) = self.installer.install(&task.config.packages, scratch.path()).await {
            error!("任务 {} 的包安装失败: {}", task_id, e);
            self.emit_failure(task_id, &e).await;
            return PollOutcome::Aborted { task_id };
        }

        let timeout = task.config.timeout_or(self.config.default_task_timeout());
        let (outcome, worker_log) = match self
            .executor
            .execute(&task.config, scratch.path(), timeout)
            .await
        {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                warn!("任务 {} 执行失败: {}", task_id, e);
                let outcome = ExecutionOutcome {
                    exit_code: -1,
                    ..Default::default()
                };
                (outcome, Some(e.to_string()))
            }
        };

        let mut result_metadata = serde_json::Map::new();
        result_metadata.insert("capability".to_string(), json!(assignment.capability));
        result_metadata.insert("timed_out".to_string(), json!(outcome.timed_out));
        let report = ResultReport {
            attempt: task.attempts,
            exit_code: outcome.exit_code,
            execution_time_ms: Some(outcome.elapsed.as_millis() as i64),
            device_serial_number: self.config.device_serial.clone(),
            result_metadata,
            worker_log,
        };

        let reported = with_retry(
            "上报结果",
            self.config.report_retry_attempts,
            self.config.report_retry_delay(),
            || {
                self.client
                    .report_result(task_id, &report, &outcome.stdout, &outcome.stderr)
            },
        )
        .await;

        match reported {
            Ok(()) => {
                info!("任务 {} 结果已上报，exit_code={}", task_id, outcome.exit_code);
                PollOutcome::Completed {
                    task_id,
                    exit_code: outcome.exit_code,
                }
            }
            Err(WorkerError::StaleAttempt { .. }) => {
                warn!("任务 {} 的尝试 {} 已过期，放弃结果", task_id, task.attempts);
                self.emit(
                    NewWorkerEvent::new(&self.identity.name, WorkerEventType::TaskAbandoned)
                        .with_task(task_id)
                        .with_info(format!("attempt {} rejected as stale", task.attempts)),
                )
                .await;
                PollOutcome::Abandoned { task_id }
            }
            Err(e) => {
                error!("任务 {} 结果上报失败: {}", task_id, e);
                self.emit_failure(task_id, &e).await;
                PollOutcome::Aborted { task_id }
            }
        }
    }

    async fn scratch_dir(&self) -> WorkerResult<tempfile::TempDir> {
        let root = self.config.work_dir.as_ref().map(PathBuf::from);
        if let Some(root) = &root {
            tokio::fs::create_dir_all(root).await?;
        }
        tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("broker-task-");
            match root {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
        })
        .await
        .map_err(|e| WorkerError::Execution(format!("创建临时目录的任务失败: {e}")))?
        .map_err(WorkerError::from)
    }

    async fn emit_failure(&self, task_id: i64, err: &WorkerError) {
        let event_type = if err.is_retryable() {
            WorkerEventType::RecoverableFailure
        } else {
            WorkerEventType::UnrecoverableFailure
        };
        self.emit(
            NewWorkerEvent::new(&self.identity.name, event_type)
                .with_task(task_id)
                .with_info(err.to_string()),
        )
        .await;
    }

    /// 尽力上报遥测事件，失败只记录日志
    async fn emit(&self, event: NewWorkerEvent) {
        if let Err(e) = self.client.record_event(&event).await {
            warn!("上报Worker事件 {} 失败: {}", event.event_type, e);
        }
    }
}

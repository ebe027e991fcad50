use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_api::create_app;
use broker_core::config::AppConfig;
use broker_core::traits::{MetricsSink, NoopMetricsSink};
use broker_dispatcher::{Broker, BrokerDependencies};
use broker_infrastructure::{
    install_prometheus_recorder, DatabaseManager, FsBlobStore, HttpWebhookNotifier,
    PrometheusMetricsSink,
};
use broker_worker::WorkerAgent;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 代理服务：HTTP接口与延迟作业执行器
    Broker,
    /// 仅运行Worker代理
    Worker,
    /// 同一进程中运行代理服务和Worker代理
    All,
}

impl AppMode {
    pub fn parse(mode: &str, config: &AppConfig) -> Result<Self> {
        match mode {
            "broker" => {
                if !config.broker.enabled {
                    return Err(anyhow::anyhow!("代理服务被禁用，请检查配置"));
                }
                Ok(AppMode::Broker)
            }
            "worker" => {
                if !config.worker.enabled {
                    return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
                }
                Ok(AppMode::Worker)
            }
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    fn runs_broker(&self, config: &AppConfig) -> bool {
        match self {
            AppMode::Broker => true,
            AppMode::Worker => false,
            AppMode::All => config.broker.enabled,
        }
    }

    fn runs_worker(&self, config: &AppConfig) -> bool {
        match self {
            AppMode::Broker => false,
            AppMode::Worker => true,
            AppMode::All => config.worker.enabled,
        }
    }
}

/// 代理服务端的全部组件
struct BrokerRuntime {
    broker: Broker,
    database: DatabaseManager,
    metrics: Option<PrometheusHandle>,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    runtime: Option<BrokerRuntime>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        let runtime = if mode.runs_broker(&config) {
            Some(build_broker(&config).await?)
        } else {
            None
        };
        Ok(Self {
            config,
            mode,
            runtime,
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        let mut handles = Vec::new();

        if let Some(runtime) = &self.runtime {
            let runner = runtime.broker.runner.clone();
            let runner_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { runner.run(runner_rx).await }));

            let app = create_app(
                runtime.broker.clone(),
                &self.config.api,
                runtime.metrics.clone(),
            );
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
            info!("API服务器启动在 http://{}", self.config.api.bind_address);

            let mut server_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                let shutdown = async move {
                    let _ = server_rx.recv().await;
                };
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!("API服务器运行失败: {}", e);
                }
                info!("API服务器已停止");
            }));
        }

        if self.mode.runs_worker(&self.config) {
            let agent = WorkerAgent::new(self.config.worker.clone())
                .context("创建Worker代理失败")?;
            let worker_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { agent.run(worker_rx).await }));
        }

        if handles.is_empty() {
            return Err(anyhow::anyhow!("没有启用任何组件"));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("组件退出异常: {}", e);
            }
        }

        if let Some(runtime) = &self.runtime {
            runtime.database.close().await;
        }
        info!("所有组件已停止");
        Ok(())
    }
}

async fn build_broker(config: &AppConfig) -> Result<BrokerRuntime> {
    info!("连接数据库: {}", config.database.url);
    let database = DatabaseManager::new(&config.database)
        .await
        .context("连接数据库失败")?;

    let blobs = FsBlobStore::new(&config.broker.blob_dir)
        .await
        .with_context(|| format!("初始化Blob目录失败: {}", config.broker.blob_dir))?;
    let notifier = HttpWebhookNotifier::new(Duration::from_secs(
        config.broker.webhook_timeout_seconds,
    ))
    .context("创建Webhook客户端失败")?;

    let (metrics, handle): (Arc<dyn MetricsSink>, _) = if config.observability.metrics_enabled {
        let handle = install_prometheus_recorder().context("初始化指标失败")?;
        (Arc::new(PrometheusMetricsSink), Some(handle))
    } else {
        (Arc::new(NoopMetricsSink), None)
    };

    let deps = BrokerDependencies {
        tasks: database.task_repository(),
        packages: database.package_repository(),
        pauses: database.pause_repository(),
        events: database.worker_event_repository(),
        queue: database.deferred_queue(),
        blobs: Arc::new(blobs),
        notifier: Arc::new(notifier),
        metrics,
    };
    let broker = Broker::new(deps, &config.broker);
    info!("代理服务组件初始化完成");

    Ok(BrokerRuntime {
        broker,
        database,
        metrics: handle,
    })
}

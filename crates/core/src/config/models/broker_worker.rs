use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务代理服务端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    /// 任务配置未指定超时时使用
    pub default_timeout_seconds: u64,
    /// 截止检查在任务超时之外额外等待的时间，覆盖安装包的开销
    pub grace_period_seconds: u64,
    pub default_max_attempts: i32,
    /// 每个能力上比较交换领取失败后的最大重试次数
    pub claim_retry_limit: u32,
    pub deferred_poll_interval_ms: u64,
    pub deferred_batch_size: i64,
    /// 取出的延迟作业在此期间对其他消费者不可见
    pub deferred_lease_seconds: u64,
    pub webhook_max_deliveries: i32,
    pub webhook_retry_delay_seconds: u64,
    pub webhook_timeout_seconds: u64,
    pub bulk_delete_batch_size: i64,
    pub blob_dir: String,
    /// 生成包文件与Blob下载地址时使用的外部地址
    pub public_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_seconds: 900,
            grace_period_seconds: 180,
            default_max_attempts: 3,
            claim_retry_limit: 5,
            deferred_poll_interval_ms: 500,
            deferred_batch_size: 50,
            deferred_lease_seconds: 60,
            webhook_max_deliveries: 5,
            webhook_retry_delay_seconds: 30,
            webhook_timeout_seconds: 10,
            bulk_delete_batch_size: 100,
            blob_dir: "data/blobs".to_string(),
            public_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("默认任务超时必须大于0"));
        }

        if self.default_max_attempts < 1 {
            return Err(anyhow::anyhow!("默认最大尝试次数必须大于等于1"));
        }

        if self.claim_retry_limit == 0 {
            return Err(anyhow::anyhow!("领取重试次数必须大于0"));
        }

        if self.deferred_poll_interval_ms == 0 || self.deferred_batch_size <= 0 {
            return Err(anyhow::anyhow!("延迟队列轮询间隔和批大小必须大于0"));
        }

        if self.deferred_lease_seconds == 0 {
            return Err(anyhow::anyhow!("延迟作业租约时间必须大于0"));
        }

        if self.webhook_max_deliveries < 1 {
            return Err(anyhow::anyhow!("Webhook最大投递次数必须大于等于1"));
        }

        if self.bulk_delete_batch_size <= 0 {
            return Err(anyhow::anyhow!("批量删除大小必须大于0"));
        }

        if self.blob_dir.is_empty() {
            return Err(anyhow::anyhow!("Blob目录不能为空"));
        }

        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            return Err(anyhow::anyhow!("public_url必须是http(s)地址"));
        }

        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    pub fn deferred_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deferred_poll_interval_ms)
    }

    pub fn deferred_lease(&self) -> Duration {
        Duration::from_secs(self.deferred_lease_seconds)
    }

    pub fn webhook_retry_delay(&self) -> Duration {
        Duration::from_secs(self.webhook_retry_delay_seconds)
    }
}

/// Worker代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub broker_url: String,
    /// 固定的Worker名称，未设置时使用主机名
    pub name: Option<String>,
    /// 固定的平台标签，未设置时使用当前操作系统名
    pub platform: Option<String>,
    /// 额外声明的能力
    pub capabilities: Vec<String>,
    /// 绑定的物理设备序列号
    pub device_serial: Option<String>,
    /// 设备探测命令，`{serial}` 会被替换为序列号，非零退出码表示设备断开
    pub device_probe_command: Vec<String>,
    /// 每次执行的临时目录所在的根目录，未设置时使用系统临时目录
    pub work_dir: Option<String>,
    pub poll_interval_seconds: u64,
    pub device_retry_seconds: u64,
    pub package_retry_attempts: u32,
    pub package_retry_delay_seconds: u64,
    pub report_retry_attempts: u32,
    pub report_retry_delay_seconds: u64,
    pub request_timeout_seconds: u64,
    /// 任务未配置超时时本地强制执行的超时
    pub default_task_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: "http://127.0.0.1:8080".to_string(),
            name: None,
            platform: None,
            capabilities: Vec::new(),
            device_serial: None,
            device_probe_command: Vec::new(),
            work_dir: None,
            poll_interval_seconds: 10,
            device_retry_seconds: 10,
            package_retry_attempts: 10,
            package_retry_delay_seconds: 10,
            report_retry_attempts: 3,
            report_retry_delay_seconds: 5,
            request_timeout_seconds: 30,
            default_task_timeout_seconds: 900,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.broker_url.starts_with("http://") && !self.broker_url.starts_with("https://") {
            return Err(anyhow::anyhow!("broker_url必须是http(s)地址"));
        }

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker名称不能为空"));
            }
        }

        if self.capabilities.iter().any(|cap| cap.trim().is_empty()) {
            return Err(anyhow::anyhow!("能力列表不能包含空字符串"));
        }

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.package_retry_attempts == 0 || self.report_retry_attempts == 0 {
            return Err(anyhow::anyhow!("重试次数必须大于0"));
        }

        if self.request_timeout_seconds == 0 || self.default_task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn device_retry_interval(&self) -> Duration {
        Duration::from_secs(self.device_retry_seconds)
    }

    pub fn package_retry_delay(&self) -> Duration {
        Duration::from_secs(self.package_retry_delay_seconds)
    }

    pub fn report_retry_delay(&self) -> Duration {
        Duration::from_secs(self.report_retry_delay_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_seconds)
    }
}

//! # broker-worker
//!
//! 执行端的Worker代理：按能力轮询代理服务领取任务，把任务依赖的包安装到
//! 临时目录，在本地超时约束下执行任务命令，最后上报结果。

pub mod agent;
pub mod components;
pub mod error;
pub mod executors;

pub use agent::{PollOutcome, WorkerAgent};
pub use components::{BrokerClient, DeviceMonitor, PackageInstaller, WorkerIdentity};
pub use error::{WorkerError, WorkerResult};
pub use executors::{CommandExecutor, ExecutionOutcome, TaskCommand, TaskExecutor};

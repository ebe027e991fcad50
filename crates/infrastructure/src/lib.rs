//! # broker-infrastructure
//!
//! `broker-core` 中各个trait的具体实现：SQLite仓储与延迟队列、
//! 文件系统Blob存储、HTTP Webhook通知以及Prometheus指标接收端。

pub mod blob;
pub mod database;
pub mod error_handling;
pub mod observability;
pub mod queue;
pub mod webhook;

pub use blob::FsBlobStore;
pub use database::*;
pub use observability::{install_prometheus_recorder, PrometheusMetricsSink};
pub use queue::SqliteDeferredQueue;
pub use webhook::HttpWebhookNotifier;

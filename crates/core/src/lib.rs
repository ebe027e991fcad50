//! # broker-core
//!
//! 分布式任务代理的核心定义：错误类型、数据模型、仓储与协作方接口、
//! 配置以及指标接收端。本crate不包含任何I/O实现，存储、队列、Blob与
//! HTTP均由其他crate通过这里定义的trait注入。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::{BrokerError, BrokerResult};
pub use models::*;
pub use traits::*;

//! 配置管理
//!
//! 配置按以下顺序合并，后者覆盖前者：
//!
//! 1. 内置默认值（每个配置段都实现了 `Default`）
//! 2. TOML配置文件（`--config` 指定，或默认搜索路径）
//! 3. 以 `BROKER__` 为前缀、`__` 为分隔符的环境变量，例如
//!    `BROKER__BROKER__GRACE_PERIOD_SECONDS=60`
//!
//! 加载完成后对每个配置段调用 `validate()`。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{
    ApiConfig, AppConfig, BrokerConfig, DatabaseConfig, ObservabilityConfig, WorkerConfig,
};

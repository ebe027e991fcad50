pub mod api_observability;
pub mod app_config;
pub mod broker_worker;
pub mod database;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use broker_worker::{BrokerConfig, WorkerConfig};
pub use database::DatabaseConfig;

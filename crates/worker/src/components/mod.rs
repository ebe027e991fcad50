pub mod broker_client;
pub mod capabilities;
pub mod device_monitor;
pub mod package_installer;
pub mod retry;

pub use broker_client::BrokerClient;
pub use capabilities::WorkerIdentity;
pub use device_monitor::DeviceMonitor;
pub use package_installer::PackageInstaller;
pub use retry::with_retry;

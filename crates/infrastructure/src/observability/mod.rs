//! 指标接收端的Prometheus实现
//!
//! `PrometheusMetricsSink` 把 `BrokerMetric` 转换为 `metrics` 计数器，
//! 由 `install_prometheus_recorder` 安装的全局记录器汇总并渲染。

use broker_core::traits::{BrokerMetric, MetricsSink};
use broker_core::{BrokerError, BrokerResult};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// 安装全局Prometheus记录器，返回用于渲染 `/metrics` 的句柄
pub fn install_prometheus_recorder() -> BrokerResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| BrokerError::Configuration(format!("安装Prometheus记录器失败: {e}")))?;
    info!("Prometheus指标记录器已安装");
    Ok(handle)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetricsSink;

impl MetricsSink for PrometheusMetricsSink {
    fn record(&self, metric: BrokerMetric) {
        let name = metric.name();
        match metric {
            BrokerMetric::TaskClaimed { capability } => {
                counter!(name, "capability" => capability).increment(1);
            }
            BrokerMetric::TaskCompleted { outcome } => {
                counter!(name, "outcome" => outcome.as_str()).increment(1);
            }
            _ => {
                counter!(name).increment(1);
            }
        }
    }
}

use std::time::Duration;

use broker_core::models::{Assignment, NewWorkerEvent, PackageManifest, ResultReport};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct AssignBody<'a> {
    worker: &'a str,
    hostname: &'a str,
    capabilities: &'a [String],
}

/// 代理服务的HTTP客户端
pub struct BrokerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl BrokerClient {
    pub fn new(base_url: &str, timeout: Duration) -> WorkerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 拼接接口地址，每个路径段单独转义
    fn endpoint(&self, segments: &[&str]) -> WorkerResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            WorkerError::Configuration(format!("无效的代理地址 {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                WorkerError::Configuration(format!("代理地址不能作为基础路径: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 领取任务，没有可领取的任务时返回 `None`
    #[instrument(skip(self, capabilities))]
    pub async fn assign(
        &self,
        worker: &str,
        hostname: &str,
        capabilities: &[String],
    ) -> WorkerResult<Option<Assignment>> {
        let url = self.endpoint(&["tasks", "assign"])?;
        let response = self
            .http_client
            .put(url)
            .json(&AssignBody {
                worker,
                hostname,
                capabilities,
            })
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        let envelope: Envelope<Assignment> = serde_json::from_slice(&body).map_err(|e| {
            WorkerError::Unrecoverable {
                status: StatusCode::OK.as_u16(),
                message: format!("领取响应无法解析: {e}"),
            }
        })?;
        Ok(envelope.data)
    }

    #[instrument(skip(self))]
    pub async fn package_manifest(&self, name: &str, version: &str) -> WorkerResult<PackageManifest> {
        let url = self.endpoint(&["packages", name, version])?;
        self.get_data(url).await
    }

    /// 下载包文件，URL可以是代理的Blob地址也可以是外部地址
    pub async fn download(&self, url: &str) -> WorkerResult<Vec<u8>> {
        debug!("下载文件: {}", url);
        let response = self.http_client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// 上报执行结果，服务端返回404表示本次尝试已过期
    #[instrument(skip(self, report, stdout, stderr), fields(attempt = report.attempt))]
    pub async fn report_result(
        &self,
        task_id: i64,
        report: &ResultReport,
        stdout: &[u8],
        stderr: &[u8],
    ) -> WorkerResult<()> {
        let url = self.endpoint(&["tasks", &task_id.to_string()])?;
        let payload = serde_json::to_string(report)
            .map_err(|e| WorkerError::Execution(format!("序列化结果失败: {e}")))?;

        let mut form = Form::new().text("result", payload);
        if !stdout.is_empty() {
            form = form.part("stdout", Part::bytes(stdout.to_vec()).file_name("stdout"));
        }
        if !stderr.is_empty() {
            form = form.part("stderr", Part::bytes(stderr.to_vec()).file_name("stderr"));
        }

        let response = self.http_client.post(url).multipart(form).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WorkerError::StaleAttempt { task_id });
        }
        check_status(response).await?;
        Ok(())
    }

    pub async fn record_event(&self, event: &NewWorkerEvent) -> WorkerResult<()> {
        let url = self.endpoint(&["workers", "events"])?;
        let response = self.http_client.post(url).json(event).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_data<T: DeserializeOwned>(&self, url: Url) -> WorkerResult<T> {
        let response = self.http_client.get(url.clone()).send().await?;
        let response = check_status(response).await?;
        let envelope: Envelope<T> = response.json().await?;
        envelope.data.ok_or_else(|| WorkerError::Unrecoverable {
            status: StatusCode::OK.as_u16(),
            message: format!("响应缺少data字段: {url}"),
        })
    }
}

async fn check_status(response: Response) -> WorkerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(WorkerError::from_status(status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> BrokerClient {
        BrokerClient::new(base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_escapes_each_segment() {
        let url = client("http://127.0.0.1:8080/")
            .endpoint(&["packages", "tools/extra?x#y", "1.0"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/packages/tools%2Fextra%3Fx%23y/1.0"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_prefix() {
        let url = client("http://broker.local/api")
            .endpoint(&["tasks", "assign"])
            .unwrap();
        assert_eq!(url.as_str(), "http://broker.local/api/tasks/assign");
    }

    #[test]
    fn test_endpoint_rejects_invalid_base() {
        let err = client("not a url").endpoint(&["tasks"]).unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(_)));
    }
}

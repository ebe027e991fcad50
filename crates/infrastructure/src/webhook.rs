use std::time::Duration;

use async_trait::async_trait;
use broker_core::{traits::WebhookNotifier, BrokerError, BrokerResult};
use serde_json::json;
use tracing::{debug, instrument};

/// 通过HTTP POST投递任务完成通知
pub struct HttpWebhookNotifier {
    client: reqwest::Client,
}

impl HttpWebhookNotifier {
    pub fn new(timeout: Duration) -> BrokerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    #[instrument(skip(self), fields(url = %url, task_id = task_id))]
    async fn notify(&self, url: &str, task_id: i64) -> BrokerResult<()> {
        let response = self
            .client
            .post(url)
            .json(&json!({ "task_id": task_id }))
            .send()
            .await
            .map_err(|e| BrokerError::Network(format!("Webhook请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Network(format!("Webhook返回状态码 {status}")));
        }

        debug!("Webhook投递成功: {} -> {}", task_id, url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;

    use super::*;

    async fn spawn_receiver(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Arc<Mutex<Vec<Value>>>>,
                          Json(body): Json<Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    #[tokio::test]
    async fn test_posts_task_id() {
        let (url, received) = spawn_receiver(StatusCode::OK).await;
        let notifier = HttpWebhookNotifier::new(Duration::from_secs(5)).unwrap();

        notifier.notify(&url, 42).await.unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["task_id"], 42);
    }

    #[tokio::test]
    async fn test_non_success_status_is_network_error() {
        let (url, _received) = spawn_receiver(StatusCode::SERVICE_UNAVAILABLE).await;
        let notifier = HttpWebhookNotifier::new(Duration::from_secs(5)).unwrap();

        let err = notifier.notify(&url, 1).await.unwrap_err();
        assert!(matches!(err, BrokerError::Network(_)));
        assert!(err.is_retryable());
    }
}

use super::traits::AnalysisClient;
use super::types::{normalize_base_url, ClientError};
use super::with_deadline;
use crate::deadline::Deadline;
use crate::metric::{AnalysisResponse, Metric};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// 分析副本的 HTTP 客户端
///
/// 内部的 reqwest Client 自带连接复用，所以每个副本地址只需要一个实例。
#[derive(Clone)]
pub struct HttpAnalysisClient {
    client: Client,
    address: String,
    base_url: String,
}

impl HttpAnalysisClient {
    pub fn new(address: &str, connect_timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build analysis client: {}", e)))?;

        Ok(Self {
            client,
            address: address.to_string(),
            base_url: normalize_base_url(address),
        })
    }

    /// 探测副本的 /health，确认连接可用
    pub async fn probe(&self, timeout: Duration) -> Result<(), ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| match ClientError::from_reqwest(&self.address, e) {
                ClientError::Transport { target, message } => {
                    ClientError::Connect { target, message }
                }
                other => other,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                target: self.address.clone(),
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(
        &self,
        metric: &Metric,
        deadline: Deadline,
    ) -> Result<AnalysisResponse, ClientError> {
        let url = format!("{}/v1/analyze", self.base_url);
        let request = with_deadline(self.client.post(&url).json(metric), &deadline);

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| ClientError::from_reqwest(&self.address, e))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| ClientError::from_reqwest(&self.address, e))?;

            // 副本在失败时也会返回 {processed:false, message}，优先使用这个消息
            match serde_json::from_str::<AnalysisResponse>(&text) {
                Ok(parsed) => Ok(parsed),
                Err(_) if !status.is_success() => Err(ClientError::Status {
                    target: self.address.clone(),
                    status: status.as_u16(),
                    body: text,
                }),
                Err(e) => Err(ClientError::Decode {
                    target: self.address.clone(),
                    message: e.to_string(),
                }),
            }
        };

        deadline
            .run(call)
            .await
            .map_err(|_| ClientError::timeout(&self.address))?
    }

    fn address(&self) -> &str {
        &self.address
    }
}

use super::traits::StorageClient;
use super::types::{normalize_base_url, ClientError};
use super::with_deadline;
use crate::deadline::Deadline;
use crate::metric::{Alarm, Metric, MetricDisposition, StorageResponse, DISPOSITION_HEADER};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// 存储服务的 HTTP 客户端
#[derive(Clone)]
pub struct HttpStorageClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpStorageClient {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build storage client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(addr),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        disposition: Option<MetricDisposition>,
        deadline: Deadline,
    ) -> Result<StorageResponse, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let deadline = deadline.tighten(self.timeout);

        let mut request = self.client.post(&url).json(body);
        if let Some(disposition) = disposition {
            request = request.header(DISPOSITION_HEADER, disposition.as_str());
        }
        let request = with_deadline(request, &deadline);

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| ClientError::from_reqwest(&url, e))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| ClientError::from_reqwest(&url, e))?;

            if !status.is_success() {
                return Err(ClientError::Status {
                    target: url.clone(),
                    status: status.as_u16(),
                    body: text,
                });
            }

            let parsed: StorageResponse =
                serde_json::from_str(&text).map_err(|e| ClientError::Decode {
                    target: url.clone(),
                    message: e.to_string(),
                })?;

            if !parsed.success {
                return Err(ClientError::Rejected {
                    target: url.clone(),
                    message: parsed.message,
                });
            }

            Ok(parsed)
        };

        deadline
            .run(call)
            .await
            .map_err(|_| ClientError::timeout(&url))?
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn store_metric(
        &self,
        metric: &Metric,
        disposition: MetricDisposition,
        deadline: Deadline,
    ) -> Result<StorageResponse, ClientError> {
        self.post("/v1/metrics", metric, Some(disposition), deadline)
            .await
    }

    async fn store_alarm(
        &self,
        alarm: &Alarm,
        deadline: Deadline,
    ) -> Result<StorageResponse, ClientError> {
        self.post("/v1/alarms", alarm, None, deadline).await
    }
}

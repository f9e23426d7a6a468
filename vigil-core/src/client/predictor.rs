use super::traits::Predictor;
use super::types::ClientError;
use super::with_deadline;
use crate::deadline::Deadline;
use crate::metric::{PredictRequest, PredictResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// 基于 HTTP/JSON 的推理预测器客户端
#[derive(Clone)]
pub struct HttpPredictor {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpPredictor {
    /// `url` 是完整的预测端点，例如 `http://inference:5000/predict`
    pub fn new(url: String, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build predictor client: {}", e)))?;

        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, features: &[f32], deadline: Deadline) -> Result<i32, ClientError> {
        let deadline = deadline.tighten(self.timeout);
        let request = with_deadline(
            self.client.post(&self.url).json(&PredictRequest {
                features: features.to_vec(),
            }),
            &deadline,
        );

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| ClientError::from_reqwest(&self.url, e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Status {
                    target: self.url.clone(),
                    status: status.as_u16(),
                    body,
                });
            }

            let body: PredictResponse = response
                .json()
                .await
                .map_err(|e| ClientError::Decode {
                    target: self.url.clone(),
                    message: e.to_string(),
                })?;

            Ok(body.prediction)
        };

        deadline
            .run(call)
            .await
            .map_err(|_| ClientError::timeout(&self.url))?
    }

    fn target(&self) -> &str {
        &self.url
    }
}

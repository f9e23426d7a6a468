use crate::breaker::{BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use vigil_core::{BreakerSettings, ClientError, Deadline, InferenceVerdict, Predictor, FEATURE_COUNT};

/// 推理网关错误，调用方据此改用降级判定
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("predictor call failed: {0}")]
    Predictor(#[source] ClientError),

    #[error("expected {expected} features, got {0}", expected = FEATURE_COUNT)]
    Malformed(usize),
}

impl From<BreakerError<ClientError>> for GatewayError {
    fn from(err: BreakerError<ClientError>) -> Self {
        match err {
            BreakerError::Open => GatewayError::BreakerOpen,
            BreakerError::Inner(e) => GatewayError::Predictor(e),
        }
    }
}

/// 弹性推理网关
///
/// 用熔断器包裹远程预测调用；超时、传输错误和非成功状态都计入失败。
pub struct ResilienceGateway {
    predictor: Arc<dyn Predictor>,
    breaker: CircuitBreaker,
}

impl ResilienceGateway {
    pub fn new(predictor: Arc<dyn Predictor>, breaker: CircuitBreaker) -> Self {
        Self { predictor, breaker }
    }

    pub fn from_settings(predictor: Arc<dyn Predictor>, settings: &BreakerSettings) -> Self {
        let breaker = CircuitBreaker::new(BreakerConfig::from_settings("inference", settings));
        Self::new(predictor, breaker)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// 调用远程预测器得到模型判定
    pub async fn predict(
        &self,
        features: &[f32],
        deadline: Deadline,
    ) -> Result<InferenceVerdict, GatewayError> {
        if features.len() != FEATURE_COUNT {
            return Err(GatewayError::Malformed(features.len()));
        }

        let prediction = self
            .breaker
            .call(|| self.predictor.predict(features, deadline))
            .await?;

        debug!(
            "Predictor {} returned {} for {} features",
            self.predictor.target(),
            prediction,
            features.len()
        );
        Ok(InferenceVerdict::from_prediction(prediction))
    }
}

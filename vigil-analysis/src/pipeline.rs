use crate::correlator::{AnomalyCorrelator, CorrelationDecision};
use crate::fallback::FallbackPolicy;
use crate::gateway::ResilienceGateway;
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use vigil_core::{
    Alarm, ClientError, Deadline, InferenceVerdict, Metric, MetricDisposition, MetricShape,
    StorageClient, VerdictSource,
};

/// 单条指标的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    StoredNormal { source: VerdictSource },
    SuspiciousRecorded { source: VerdictSource, count: usize },
    AlarmRaised { alarm: Alarm, source: VerdictSource },
    /// 特征数量不对，跳过分析直接存储
    Skipped { features: usize },
}

impl PipelineOutcome {
    pub fn message(&self) -> String {
        match self {
            PipelineOutcome::StoredNormal { .. } => "Metric analyzed as normal and stored".to_string(),
            PipelineOutcome::SuspiciousRecorded { .. } => "suspicious metric recorded".to_string(),
            PipelineOutcome::AlarmRaised { source, .. } => {
                format!("correlated anomaly detected by {} and stored", source)
            }
            PipelineOutcome::Skipped { .. } => "Metric skipped (incomplete features)".to_string(),
        }
    }
}

/// 存储失败，指标或告警可能丢失
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to store metric: {0}")]
    StoreMetric(#[source] ClientError),

    #[error("failed to store alarm: {0}")]
    StoreAlarm(#[source] ClientError),
}

impl PipelineError {
    pub fn message(&self) -> &'static str {
        match self {
            PipelineError::StoreMetric(_) => "Failed to store metric",
            PipelineError::StoreAlarm(_) => "Failed to store alarm",
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            PipelineError::StoreMetric(e) | PipelineError::StoreAlarm(e) => e.is_timeout(),
        }
    }
}

/// 分析流水线
///
/// 组合推理网关的判定和关联器的决策，再把结果交给存储服务。
/// 关联状态归这个实例所有，每个副本构造一次后在所有请求间共享。
pub struct PipelineOrchestrator {
    gateway: ResilienceGateway,
    fallback: FallbackPolicy,
    correlator: AnomalyCorrelator,
    storage: Arc<dyn StorageClient>,
    stats: PipelineStats,
}

impl PipelineOrchestrator {
    pub fn new(
        gateway: ResilienceGateway,
        fallback: FallbackPolicy,
        correlator: AnomalyCorrelator,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            gateway,
            fallback,
            correlator,
            storage,
            stats: PipelineStats::new(),
        }
    }

    pub fn gateway(&self) -> &ResilienceGateway {
        &self.gateway
    }

    pub fn correlator(&self) -> &AnomalyCorrelator {
        &self.correlator
    }

    pub fn stats_snapshot(&self) -> PipelineStatsSnapshot {
        self.stats
            .snapshot(self.correlator.tracked_clients(), self.gateway.breaker_snapshot())
    }

    /// 处理一条指标：判定、关联、存储
    pub async fn process(
        &self,
        metric: &Metric,
        deadline: Deadline,
    ) -> Result<PipelineOutcome, PipelineError> {
        debug!(
            "Analyzing metric from '{}': type={}",
            metric.client_id, metric.metric_type
        );

        let verdict = match metric.shape() {
            MetricShape::Malformed(features) => {
                warn!(
                    "Metric from '{}' carries {} features instead of {}, skipping analysis",
                    metric.client_id,
                    features,
                    vigil_core::FEATURE_COUNT
                );
                self.store_metric(metric, MetricDisposition::Skipped, deadline)
                    .await?;
                self.stats.record_skipped();
                return Ok(PipelineOutcome::Skipped { features });
            }
            MetricShape::Complete(features) => {
                match self.gateway.predict(features, deadline).await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!(
                            "Inference unavailable for '{}' ({}), falling back to threshold {}",
                            metric.client_id,
                            e,
                            self.fallback.threshold()
                        );
                        self.fallback.classify(metric)
                    }
                }
            }
            MetricShape::Scalar(value) => self.fallback.classify_value(value),
        };

        self.stats.record_verdict(verdict.source);
        self.decide(metric, verdict, deadline).await
    }

    /// 根据判定结果决定存储方式
    ///
    /// 正常判定直接存储，不触碰关联状态；异常判定交给关联器，
    /// 低于阈值时以 suspicious 标记存储，达到阈值时存储告警。
    pub async fn decide(
        &self,
        metric: &Metric,
        verdict: InferenceVerdict,
        deadline: Deadline,
    ) -> Result<PipelineOutcome, PipelineError> {
        if !verdict.is_anomaly() {
            debug!(
                "Metric from '{}' is normal (source: {})",
                metric.client_id, verdict.source
            );
            self.store_metric(metric, MetricDisposition::Normal, deadline)
                .await?;
            self.stats.record_normal();
            return Ok(PipelineOutcome::StoredNormal {
                source: verdict.source,
            });
        }

        // 锁只在 record 内持有，存储调用在锁外
        match self.correlator.record(&metric.client_id) {
            CorrelationDecision::Suspicious { count } => {
                info!(
                    "Suspicious metric from '{}' ({}/{}, source: {})",
                    metric.client_id,
                    count,
                    self.correlator.threshold(),
                    verdict.source
                );
                self.store_metric(metric, MetricDisposition::Suspicious, deadline)
                    .await?;
                self.stats.record_suspicious();
                Ok(PipelineOutcome::SuspiciousRecorded {
                    source: verdict.source,
                    count,
                })
            }
            CorrelationDecision::Alarm { count } => {
                let alarm = self.build_alarm(metric, verdict.source, count);
                warn!(
                    "Correlated anomaly for '{}': {} suspicious verdicts (rule: {})",
                    metric.client_id, count, alarm.rule_id
                );

                if let Err(e) = self.storage.store_alarm(&alarm, deadline).await {
                    error!("Could not store alarm for '{}': {}", metric.client_id, e);
                    self.stats.record_storage_failure();
                    return Err(PipelineError::StoreAlarm(e));
                }
                self.stats.record_alarm();
                Ok(PipelineOutcome::AlarmRaised {
                    alarm,
                    source: verdict.source,
                })
            }
        }
    }

    fn build_alarm(&self, metric: &Metric, source: VerdictSource, count: usize) -> Alarm {
        Alarm {
            rule_id: format!("correlated_anomaly_by_{}", source.rule_slug()),
            client_id: metric.client_id.clone(),
            description: format!(
                "Correlated anomaly for metric type {}: {} suspicious verdicts within {}s, detected by {}",
                metric.metric_type,
                count,
                self.correlator.window().as_secs(),
                source
            ),
            timestamp: chrono::Utc::now().timestamp(),
            trigger_metric: metric.clone(),
        }
    }

    async fn store_metric(
        &self,
        metric: &Metric,
        disposition: MetricDisposition,
        deadline: Deadline,
    ) -> Result<(), PipelineError> {
        match self.storage.store_metric(metric, disposition, deadline).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(
                    "Could not store {} metric from '{}': {}",
                    disposition.as_str(),
                    metric.client_id,
                    e
                );
                self.stats.record_storage_failure();
                Err(PipelineError::StoreMetric(e))
            }
        }
    }
}

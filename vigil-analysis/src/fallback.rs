use vigil_core::{FallbackSettings, InferenceVerdict, Metric, VerdictLabel, VerdictSource};

/// 本地阈值降级策略
///
/// 推理不可用时，读取指标的触发值（指定特征槽位，没有特征向量时取标量值），
/// 严格大于阈值判为异常。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackPolicy {
    threshold: f64,
    feature_index: usize,
}

impl FallbackPolicy {
    pub fn new(threshold: f64, feature_index: usize) -> Self {
        Self {
            threshold,
            feature_index,
        }
    }

    pub fn from_settings(settings: &FallbackSettings) -> Self {
        Self::new(settings.threshold, settings.feature_index)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify_value(&self, value: f64) -> InferenceVerdict {
        let label = if value > self.threshold {
            VerdictLabel::Anomaly
        } else {
            VerdictLabel::Normal
        };
        InferenceVerdict::new(label, VerdictSource::Fallback)
    }

    pub fn classify(&self, metric: &Metric) -> InferenceVerdict {
        self.classify_value(metric.trigger_value(self.feature_index))
    }
}

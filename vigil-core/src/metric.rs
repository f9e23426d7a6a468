use serde::{Deserialize, Serialize};
use std::fmt;

/// 完整指标携带的特征数量
pub const FEATURE_COUNT: usize = 41;

/// StoreMetric 请求中携带存储标记的请求头
pub const DISPOSITION_HEADER: &str = "x-vigil-disposition";

/// 遥测指标
///
/// 一条指标要么带有完整的 41 维特征向量，要么只带一个标量值。
/// 接收后不再修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(alias = "source_client_id")]
    pub client_id: String,
    #[serde(rename = "type", default)]
    pub metric_type: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<f32>>,
}

/// 指标的形态，决定它能否进入推理流程
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricShape<'a> {
    /// 完整的特征向量
    Complete(&'a [f32]),
    /// 没有特征向量，只有标量值
    Scalar(f64),
    /// 特征向量长度不对，携带实际长度
    Malformed(usize),
}

impl Metric {
    /// 创建只带标量值的指标
    pub fn scalar(client_id: impl Into<String>, metric_type: impl Into<String>, value: f64) -> Self {
        Self {
            client_id: client_id.into(),
            metric_type: metric_type.into(),
            value,
            timestamp: chrono::Utc::now().timestamp(),
            features: None,
        }
    }

    /// 创建带特征向量的指标
    pub fn with_features(
        client_id: impl Into<String>,
        metric_type: impl Into<String>,
        features: Vec<f32>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            metric_type: metric_type.into(),
            value: 0.0,
            timestamp: chrono::Utc::now().timestamp(),
            features: Some(features),
        }
    }

    /// 判断指标形态
    ///
    /// 缺少 `features` 和 `features: []` 等价，都按标量处理：
    /// 不会作为特征不完整的指标被跳过，而是用 `value` 走降级阈值判断。
    /// 只有非空且长度不是 41 的特征向量才算 `Malformed`。
    pub fn shape(&self) -> MetricShape<'_> {
        match self.features.as_deref() {
            None | Some([]) => MetricShape::Scalar(self.value),
            Some(features) if features.len() == FEATURE_COUNT => MetricShape::Complete(features),
            Some(features) => MetricShape::Malformed(features.len()),
        }
    }

    /// 读取降级判断使用的触发值
    ///
    /// 特征向量足够长时取指定槽位，否则退回标量值。
    pub fn trigger_value(&self, feature_index: usize) -> f64 {
        self.features
            .as_deref()
            .and_then(|features| features.get(feature_index))
            .map(|v| f64::from(*v))
            .unwrap_or(self.value)
    }
}

/// 判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictLabel {
    Normal,
    Anomaly,
}

/// 判定来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// 远程推理模型
    Model,
    /// 本地阈值降级
    Fallback,
}

impl VerdictSource {
    /// 面向用户的来源名称
    pub fn display_name(&self) -> &'static str {
        match self {
            VerdictSource::Model => "ML Model",
            VerdictSource::Fallback => "Threshold (Fallback)",
        }
    }

    /// 用于拼接告警规则 ID 的来源标识
    pub fn rule_slug(&self) -> String {
        self.display_name().to_lowercase().replace(' ', "_")
    }
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 单条指标的推理结论，生成后不再修改
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceVerdict {
    pub label: VerdictLabel,
    pub source: VerdictSource,
}

impl InferenceVerdict {
    /// 预测器用 -1 表示异常
    pub const ANOMALY_SENTINEL: i32 = -1;

    pub fn new(label: VerdictLabel, source: VerdictSource) -> Self {
        Self { label, source }
    }

    /// 从模型预测值构造结论
    pub fn from_prediction(prediction: i32) -> Self {
        let label = if prediction == Self::ANOMALY_SENTINEL {
            VerdictLabel::Anomaly
        } else {
            VerdictLabel::Normal
        };
        Self::new(label, VerdictSource::Model)
    }

    pub fn is_anomaly(&self) -> bool {
        self.label == VerdictLabel::Anomaly
    }
}

/// 告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub rule_id: String,
    pub client_id: String,
    pub description: String,
    pub timestamp: i64,
    pub trigger_metric: Metric,
}

/// 存储时附带的标记，用来区分真正正常的指标和未达阈值的可疑指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDisposition {
    Normal,
    Suspicious,
    Skipped,
}

impl MetricDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricDisposition::Normal => "normal",
            MetricDisposition::Suspicious => "suspicious",
            MetricDisposition::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(MetricDisposition::Normal),
            "suspicious" => Some(MetricDisposition::Suspicious),
            "skipped" => Some(MetricDisposition::Skipped),
            _ => None,
        }
    }
}

/// SendMetric 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMetricResponse {
    pub accepted: bool,
    pub message: String,
}

/// AnalyzeMetric 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub processed: bool,
    pub message: String,
}

/// StoreMetric / StoreAlarm 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Predict 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub features: Vec<f32>,
}

/// Predict 响应
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_shape() {
        let complete = Metric::with_features("c", "network_traffic", vec![0.0; FEATURE_COUNT]);
        assert!(matches!(complete.shape(), MetricShape::Complete(f) if f.len() == FEATURE_COUNT));

        let short = Metric::with_features("c", "network_traffic", vec![0.0; 10]);
        assert_eq!(short.shape(), MetricShape::Malformed(10));

        let scalar = Metric::scalar("c", "cpu", 42.0);
        assert_eq!(scalar.shape(), MetricShape::Scalar(42.0));

        let empty = Metric::with_features("c", "cpu", vec![]);
        assert!(matches!(empty.shape(), MetricShape::Scalar(_)));
    }

    #[test]
    fn test_empty_features_take_scalar_path() {
        let missing: Metric =
            serde_json::from_str(r#"{"client_id":"c","type":"cpu","value":97.5}"#).unwrap();
        let empty: Metric = serde_json::from_str(
            r#"{"client_id":"c","type":"cpu","value":97.5,"features":[]}"#,
        )
        .unwrap();

        assert_eq!(missing.shape(), MetricShape::Scalar(97.5));
        assert_eq!(empty.shape(), MetricShape::Scalar(97.5));
        assert_eq!(empty.trigger_value(4), 97.5);
    }

    #[test]
    fn test_trigger_value_prefers_feature_slot() {
        let mut features = vec![0.0; FEATURE_COUNT];
        features[4] = 100.0;
        let metric = Metric::with_features("c", "network_traffic", features);
        assert_eq!(metric.trigger_value(4), 100.0);

        let scalar = Metric::scalar("c", "cpu", 97.5);
        assert_eq!(scalar.trigger_value(4), 97.5);
    }

    #[test]
    fn test_verdict_from_prediction() {
        assert!(InferenceVerdict::from_prediction(-1).is_anomaly());
        assert!(!InferenceVerdict::from_prediction(1).is_anomaly());
        assert!(!InferenceVerdict::from_prediction(0).is_anomaly());
        assert_eq!(InferenceVerdict::from_prediction(1).source, VerdictSource::Model);
    }

    #[test]
    fn test_rule_slug() {
        assert_eq!(VerdictSource::Fallback.rule_slug(), "threshold_(fallback)");
        assert_eq!(VerdictSource::Model.rule_slug(), "ml_model");
    }

    #[test]
    fn test_metric_accepts_legacy_client_field() {
        let json = r#"{"source_client_id":"legacy","type":"cpu","value":1.5,"timestamp":10}"#;
        let metric: Metric = serde_json::from_str(json).unwrap();
        assert_eq!(metric.client_id, "legacy");
        assert_eq!(metric.metric_type, "cpu");
        assert!(metric.features.is_none());
    }
}

use async_trait::async_trait;

use super::types::ClientError;
use crate::deadline::Deadline;
use crate::metric::{Alarm, AnalysisResponse, Metric, MetricDisposition, StorageResponse};

/// 远程推理预测器
///
/// 只暴露一个 predict 操作，返回原始预测值（-1 表示异常）。
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, features: &[f32], deadline: Deadline) -> Result<i32, ClientError>;

    /// 用于日志的目标描述
    fn target(&self) -> &str;
}

/// 指标存储协作方
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// 存储指标，`disposition` 区分正常、可疑和跳过分析的指标
    async fn store_metric(
        &self,
        metric: &Metric,
        disposition: MetricDisposition,
        deadline: Deadline,
    ) -> Result<StorageResponse, ClientError>;

    async fn store_alarm(
        &self,
        alarm: &Alarm,
        deadline: Deadline,
    ) -> Result<StorageResponse, ClientError>;
}

/// 分析副本客户端，由连接池按地址缓存
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(
        &self,
        metric: &Metric,
        deadline: Deadline,
    ) -> Result<AnalysisResponse, ClientError>;

    /// 副本地址
    fn address(&self) -> &str;
}

use crate::dataset::{Dataset, LabeledRecord};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vigil_core::{Metric, SendMetricResponse, FEATURE_COUNT, TIMEOUT_HEADER};

/// 单次发送的超时
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// 流量模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TrafficMode {
    /// 只发送正常流量
    Benign,
    /// 只发送攻击流量
    Malicious,
}

impl TrafficMode {
    fn is_benign(&self) -> bool {
        matches!(self, TrafficMode::Benign)
    }
}

/// 向采集服务发送指标的 HTTP 客户端
#[derive(Clone)]
pub struct MetricSender {
    client: reqwest::Client,
    url: String,
}

impl MetricSender {
    pub fn new(addr: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/v1/metrics", vigil_core::client::types::normalize_base_url(addr)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 发送一条指标，非 2xx 响应同样解析出 accepted 和 message
    pub async fn send(&self, metric: &Metric) -> Result<SendMetricResponse> {
        let response = self
            .client
            .post(&self.url)
            .header(TIMEOUT_HEADER, SEND_TIMEOUT.as_millis().to_string())
            .json(metric)
            .send()
            .await
            .with_context(|| format!("failed to send metric to {}", self.url))?;

        let status = response.status();
        let body = response.text().await?;
        serde_json::from_str::<SendMetricResponse>(&body)
            .with_context(|| format!("unexpected response ({}): {}", status, body))
    }
}

/// 特征来源
#[derive(Debug, Clone)]
pub enum FeatureSource {
    /// 从数据集中循环读取筛选后的记录
    Dataset(Arc<Vec<LabeledRecord>>),
    /// 随机合成
    Synthetic,
}

impl FeatureSource {
    pub fn from_dataset(dataset: &Dataset, mode: TrafficMode) -> Result<Self> {
        let records = dataset.filtered(mode.is_benign());
        if records.is_empty() {
            anyhow::bail!("dataset has no records for {:?} traffic", mode);
        }
        Ok(FeatureSource::Dataset(Arc::new(records)))
    }

    /// 第 `index` 条记录的特征和标签
    fn record(&self, mode: TrafficMode, index: usize) -> (Vec<f32>, String) {
        match self {
            FeatureSource::Dataset(records) => {
                let record = &records[index % records.len()];
                (record.features.clone(), record.label.clone())
            }
            FeatureSource::Synthetic => synthesize(mode),
        }
    }
}

/// 合成一条特征向量：攻击流量的 src_bytes 远高于降级阈值
pub fn synthesize(mode: TrafficMode) -> (Vec<f32>, String) {
    let mut features: Vec<f32> = (0..FEATURE_COUNT)
        .map(|_| rand::random_range(0.0..1.0))
        .collect();
    features[1] = rand::random_range(0..3) as f32;
    features[2] = rand::random_range(0..70) as f32;
    features[3] = rand::random_range(0..11) as f32;

    match mode {
        TrafficMode::Benign => {
            features[4] = rand::random_range(0.0..80.0);
            (features, "normal".to_string())
        }
        TrafficMode::Malicious => {
            features[4] = rand::random_range(200.0..5000.0);
            features[22] = rand::random_range(100.0..511.0);
            (features, "synthetic_attack".to_string())
        }
    }
}

/// 生成器参数
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub mode: TrafficMode,
    pub clients: usize,
    /// 每个客户端发送的记录数，0 表示不停发送
    pub records: usize,
    pub delay: Duration,
}

/// 运行结果汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneratorReport {
    pub sent: usize,
    pub accepted: usize,
    pub failed: usize,
}

impl GeneratorReport {
    fn merge(mut self, other: GeneratorReport) -> Self {
        self.sent += other.sent;
        self.accepted += other.accepted;
        self.failed += other.failed;
        self
    }
}

/// 并发启动多个模拟客户端
pub async fn run(
    sender: MetricSender,
    source: FeatureSource,
    config: GeneratorConfig,
) -> GeneratorReport {
    info!(
        "Target: {} | mode: {:?} | clients: {} | records per client: {}",
        sender.url(),
        config.mode,
        config.clients,
        config.records
    );

    let tasks: Vec<_> = (1..=config.clients)
        .map(|id| {
            let sender = sender.clone();
            let source = source.clone();
            let config = config.clone();
            tokio::spawn(async move { run_client(id, sender, source, config).await })
        })
        .collect();

    let mut report = GeneratorReport::default();
    for result in futures::future::join_all(tasks).await {
        match result {
            Ok(client_report) => report = report.merge(client_report),
            Err(e) => warn!("Generator client task failed: {}", e),
        }
    }
    info!(
        "All clients finished: {} sent, {} accepted, {} failed",
        report.sent, report.accepted, report.failed
    );
    report
}

async fn run_client(
    id: usize,
    sender: MetricSender,
    source: FeatureSource,
    config: GeneratorConfig,
) -> GeneratorReport {
    let client_id = format!("concurrent-client-{}", id);
    let mut report = GeneratorReport::default();
    info!("[{}] Starting in {:?} mode", client_id, config.mode);

    // 错开各客户端的启动时间
    tokio::time::sleep(jitter(Duration::from_millis(500))).await;

    // 数据集模式下各客户端从不同位置开始读
    let offset = id * 7919;
    let mut index = 0;
    while config.records == 0 || index < config.records {
        let (features, label) = source.record(config.mode, offset + index);
        let metric = Metric::with_features(client_id.clone(), "network_traffic", features);

        match sender.send(&metric).await {
            Ok(response) => {
                info!(
                    "[{}] Sent record (label: {}) -> {}",
                    client_id, label, response.message
                );
                if response.accepted {
                    report.accepted += 1;
                } else {
                    report.failed += 1;
                }
            }
            Err(e) => {
                warn!("[{}] Could not send metric: {:#}", client_id, e);
                report.failed += 1;
            }
        }
        report.sent += 1;
        index += 1;

        if !config.delay.is_zero() {
            // 平均等待 delay，在 [delay/2, delay*3/2) 之间浮动
            tokio::time::sleep(config.delay / 2 + jitter(config.delay)).await;
        }
    }

    info!("[{}] Done", client_id);
    report
}

fn jitter(max: Duration) -> Duration {
    let millis = max.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random_range(0..millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use parking_lot::Mutex;

    async fn spawn_collector(received: Arc<Mutex<Vec<Metric>>>) -> String {
        let app = Router::new().route(
            "/v1/metrics",
            post(move |Json(metric): Json<Metric>| {
                let received = received.clone();
                async move {
                    let accepted = metric.trigger_value(4) <= 95.0;
                    received.lock().push(metric);
                    Json(SendMetricResponse {
                        accepted,
                        message: "ok".to_string(),
                    })
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_synthetic_features_by_mode() {
        for _ in 0..50 {
            let (benign, label) = synthesize(TrafficMode::Benign);
            assert_eq!(benign.len(), FEATURE_COUNT);
            assert!(benign[4] < 95.0);
            assert_eq!(label, "normal");

            let (malicious, _) = synthesize(TrafficMode::Malicious);
            assert!(malicious[4] > 95.0);
        }
    }

    #[test]
    fn test_dataset_source_requires_matching_records() {
        let dataset = Dataset::default();
        assert!(FeatureSource::from_dataset(&dataset, TrafficMode::Malicious).is_err());
    }

    #[tokio::test]
    async fn test_generator_sends_per_client_identities() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_collector(received.clone()).await;

        let report = run(
            MetricSender::new(&addr).unwrap(),
            FeatureSource::Synthetic,
            GeneratorConfig {
                mode: TrafficMode::Malicious,
                clients: 3,
                records: 4,
                delay: Duration::ZERO,
            },
        )
        .await;

        assert_eq!(
            report,
            GeneratorReport {
                sent: 12,
                accepted: 0,
                failed: 12
            }
        );
        let received = received.lock();
        assert_eq!(received.len(), 12);
        for id in 1..=3 {
            let client = format!("concurrent-client-{}", id);
            assert_eq!(received.iter().filter(|m| m.client_id == client).count(), 4);
        }
    }

    #[tokio::test]
    async fn test_sender_reports_unreachable_collector() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sender = MetricSender::new(&format!("http://{}", addr)).unwrap();
        assert!(sender.send(&Metric::scalar("c", "cpu", 1.0)).await.is_err());
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil_analysis::{
    AnomalyCorrelator, BreakerConfig, CircuitBreaker, FallbackPolicy, PipelineOrchestrator,
    ResilienceGateway,
};
use vigil_api::{create_analysis_app, AnalysisState};
use vigil_core::{
    Alarm, ClientError, Deadline, Metric, MetricDisposition, Predictor, StorageClient,
    StorageResponse, FEATURE_COUNT,
};

/// 预测值为 0 时返回错误，模拟推理服务不可用
pub struct ScriptedPredictor {
    pub calls: AtomicU32,
    pub prediction: AtomicI32,
}

impl ScriptedPredictor {
    pub fn new(prediction: i32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            prediction: AtomicI32::new(prediction),
        }
    }
}

#[async_trait]
impl Predictor for ScriptedPredictor {
    async fn predict(&self, _features: &[f32], _deadline: Deadline) -> Result<i32, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.prediction.load(Ordering::SeqCst) {
            0 => Err(ClientError::Connect {
                target: "inference".to_string(),
                message: "connection refused".to_string(),
            }),
            p => Ok(p),
        }
    }

    fn target(&self) -> &str {
        "inference"
    }
}

/// 记录所有写入的内存存储
#[derive(Default)]
pub struct RecordingStorage {
    pub metrics: Mutex<Vec<(Metric, MetricDisposition, Deadline)>>,
    pub alarms: Mutex<Vec<Alarm>>,
    pub fail_metrics: AtomicBool,
    pub time_out: AtomicBool,
}

#[async_trait]
impl StorageClient for RecordingStorage {
    async fn store_metric(
        &self,
        metric: &Metric,
        disposition: MetricDisposition,
        deadline: Deadline,
    ) -> Result<StorageResponse, ClientError> {
        if self.time_out.load(Ordering::SeqCst) {
            return Err(ClientError::timeout("storage"));
        }
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected {
                target: "storage".to_string(),
                message: "database unavailable".to_string(),
            });
        }
        self.metrics
            .lock()
            .push((metric.clone(), disposition, deadline));
        Ok(StorageResponse {
            success: true,
            message: "stored".to_string(),
        })
    }

    async fn store_alarm(
        &self,
        alarm: &Alarm,
        _deadline: Deadline,
    ) -> Result<StorageResponse, ClientError> {
        self.alarms.lock().push(alarm.clone());
        Ok(StorageResponse {
            success: true,
            message: "stored".to_string(),
        })
    }
}

pub struct AnalysisFixture {
    pub state: AnalysisState,
    pub predictor: Arc<ScriptedPredictor>,
    pub storage: Arc<RecordingStorage>,
}

/// 阈值 3、窗口 60 秒、降级阈值 95（特征槽位 4）的分析副本
pub fn analysis_fixture(prediction: i32) -> AnalysisFixture {
    let predictor = Arc::new(ScriptedPredictor::new(prediction));
    let storage = Arc::new(RecordingStorage::default());
    let breaker = CircuitBreaker::new(
        BreakerConfig::consecutive_failures("inference", 5).with_cooldown(Duration::from_secs(30)),
    );
    let pipeline = PipelineOrchestrator::new(
        ResilienceGateway::new(predictor.clone(), breaker),
        FallbackPolicy::new(95.0, 4),
        AnomalyCorrelator::new(3, Duration::from_secs(60)),
        storage.clone(),
    );

    AnalysisFixture {
        state: AnalysisState::new(Arc::new(pipeline), "analysis-service"),
        predictor,
        storage,
    }
}

/// 在回环地址上启动一个真实的分析副本
pub async fn spawn_analysis(state: AnalysisState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_analysis_app(state)).await.unwrap();
    });
    addr
}

pub fn network_metric(client: &str, src_bytes: f32) -> Metric {
    let mut features = vec![0.0; FEATURE_COUNT];
    features[4] = src_bytes;
    Metric::with_features(client, "network_traffic", features)
}

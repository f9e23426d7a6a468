use super::*;
use crate::deadline::Deadline;
use crate::metric::{
    Alarm, AnalysisResponse, Metric, MetricDisposition, PredictRequest, PredictResponse,
    StorageResponse, DISPOSITION_HEADER, FEATURE_COUNT,
};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

#[derive(Clone, Default)]
struct Seen {
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

#[tokio::test]
async fn test_predictor_decodes_prediction() {
    async fn predict(Json(req): Json<PredictRequest>) -> Json<PredictResponse> {
        let prediction = if req.features[0] > 0.5 { -1 } else { 1 };
        Json(PredictResponse { prediction })
    }
    let addr = serve(Router::new().route("/predict", post(predict))).await;

    let predictor =
        HttpPredictor::new(format!("http://{}/predict", addr), Duration::from_secs(1)).unwrap();

    let mut features = vec![0.0; FEATURE_COUNT];
    assert_eq!(predictor.predict(&features, Deadline::none()).await.unwrap(), 1);
    features[0] = 1.0;
    assert_eq!(predictor.predict(&features, Deadline::none()).await.unwrap(), -1);
}

#[tokio::test]
async fn test_predictor_times_out() {
    async fn slow() -> Json<PredictResponse> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Json(PredictResponse { prediction: 1 })
    }
    let addr = serve(Router::new().route("/predict", post(slow))).await;

    let predictor =
        HttpPredictor::new(format!("http://{}/predict", addr), Duration::from_millis(100))
            .unwrap();

    let err = predictor
        .predict(&[0.0; FEATURE_COUNT], Deadline::none())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_predictor_reports_status() {
    async fn broken() -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
    let addr = serve(Router::new().route("/predict", post(broken))).await;

    let predictor =
        HttpPredictor::new(format!("http://{}/predict", addr), Duration::from_secs(1)).unwrap();
    let err = predictor
        .predict(&[0.0; FEATURE_COUNT], Deadline::none())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_storage_sends_disposition_and_deadline() {
    async fn store(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(_metric): Json<Metric>,
    ) -> Json<StorageResponse> {
        seen.headers.lock().unwrap().push(headers);
        Json(StorageResponse {
            success: true,
            message: "stored".to_string(),
        })
    }
    let seen = Seen::default();
    let addr = serve(
        Router::new()
            .route("/v1/metrics", post(store))
            .with_state(seen.clone()),
    )
    .await;

    let storage = HttpStorageClient::new(&addr, Duration::from_secs(2)).unwrap();
    let metric = Metric::scalar("client-1", "cpu", 12.0);
    let resp = storage
        .store_metric(&metric, MetricDisposition::Suspicious, Deadline::none())
        .await
        .unwrap();
    assert!(resp.success);

    let headers = seen.headers.lock().unwrap();
    let sent = &headers[0];
    assert_eq!(sent.get(DISPOSITION_HEADER).unwrap(), "suspicious");
    let budget: u64 = sent
        .get(crate::deadline::TIMEOUT_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(budget <= 2000);
}

#[tokio::test]
async fn test_storage_rejection_is_an_error() {
    async fn reject(Json(_alarm): Json<Alarm>) -> Json<StorageResponse> {
        Json(StorageResponse {
            success: false,
            message: "disk full".to_string(),
        })
    }
    let addr = serve(Router::new().route("/v1/alarms", post(reject))).await;
    let storage = HttpStorageClient::new(&addr, Duration::from_secs(2)).unwrap();

    let alarm = Alarm {
        rule_id: "correlated_anomaly_by_ml_model".to_string(),
        client_id: "client-1".to_string(),
        description: "test".to_string(),
        timestamp: 0,
        trigger_metric: Metric::scalar("client-1", "cpu", 1.0),
    };
    let err = storage.store_alarm(&alarm, Deadline::none()).await.unwrap_err();
    match err {
        ClientError::Rejected { message, .. } => assert_eq!(message, "disk full"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_analysis_client_keeps_failure_message() {
    async fn analyze(Json(_metric): Json<Metric>) -> (StatusCode, Json<AnalysisResponse>) {
        (
            StatusCode::BAD_GATEWAY,
            Json(AnalysisResponse {
                processed: false,
                message: "Failed to store metric".to_string(),
            }),
        )
    }
    async fn health() -> &'static str {
        "ok"
    }
    let addr = serve(
        Router::new()
            .route("/v1/analyze", post(analyze))
            .route("/health", get(health)),
    )
    .await;

    let client = HttpAnalysisClient::new(&addr, Duration::from_secs(1)).unwrap();
    client.probe(Duration::from_secs(1)).await.unwrap();

    let resp = client
        .analyze(&Metric::scalar("c", "cpu", 1.0), Deadline::none())
        .await
        .unwrap();
    assert!(!resp.processed);
    assert_eq!(resp.message, "Failed to store metric");
    assert_eq!(client.address(), addr);
}

#[tokio::test]
async fn test_probe_unreachable_is_connect_error() {
    // 绑定后立即释放端口，保证没有进程在监听
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = HttpAnalysisClient::new(&addr, Duration::from_millis(500)).unwrap();
    let err = client.probe(Duration::from_millis(500)).await.unwrap_err();
    assert!(err.is_connect() || err.is_timeout(), "unexpected error: {err}");
}

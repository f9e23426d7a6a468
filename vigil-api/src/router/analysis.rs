use crate::app::AnalysisState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use vigil_core::{AnalysisResponse, Deadline, Metric};

/// 分析一条指标
pub async fn analyze_metric(
    State(state): State<AnalysisState>,
    headers: HeaderMap,
    Json(metric): Json<Metric>,
) -> (StatusCode, Json<AnalysisResponse>) {
    let deadline = Deadline::from_headers(&headers);

    match state.pipeline.process(&metric, deadline).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(AnalysisResponse {
                processed: true,
                message: outcome.message(),
            }),
        ),
        Err(e) => {
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                Json(AnalysisResponse {
                    processed: false,
                    message: e.message().to_string(),
                }),
            )
        }
    }
}

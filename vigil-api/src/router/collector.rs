use crate::app::CollectorState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tracing::debug;
use vigil_core::{Deadline, Metric, SendMetricResponse};
use vigil_routing::RouteError;

/// 接收一条指标并转发给负责该客户端的分析副本
///
/// 副本的 `processed` 原样映射为 `accepted`；路由失败时按原因返回 503、504 或 502。
pub async fn send_metric(
    State(state): State<CollectorState>,
    headers: HeaderMap,
    Json(metric): Json<Metric>,
) -> (StatusCode, Json<SendMetricResponse>) {
    let deadline = Deadline::from_headers(&headers);
    debug!(
        "Received metric from '{}': type={}",
        metric.client_id, metric.metric_type
    );

    match state.router.route(&metric, deadline).await {
        Ok(routed) => {
            let status = if routed.response.processed {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                Json(SendMetricResponse {
                    accepted: routed.response.processed,
                    message: routed.response.message,
                }),
            )
        }
        Err(e) => (
            route_error_status(&e),
            Json(SendMetricResponse {
                accepted: false,
                message: e.user_message(),
            }),
        ),
    }
}

fn route_error_status(err: &RouteError) -> StatusCode {
    match err {
        RouteError::DiscoveryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RouteError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        RouteError::Connection { .. } | RouteError::Forward { .. } => StatusCode::BAD_GATEWAY,
    }
}

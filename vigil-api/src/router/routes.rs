use crate::app::{AnalysisState, CollectorState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::{
    analysis::analyze_metric,
    collector::send_metric,
    monitoring::{analysis_health, analysis_metrics, collector_health, collector_metrics},
};

/// 创建采集服务路由
pub fn create_collector_router() -> Router<CollectorState> {
    Router::new()
        .route("/health", get(collector_health))
        .route("/metrics", get(collector_metrics))
        .route("/v1/metrics", post(send_metric))
        .layer(TraceLayer::new_for_http())
}

/// 创建分析服务路由
pub fn create_analysis_router() -> Router<AnalysisState> {
    Router::new()
        .route("/health", get(analysis_health))
        .route("/metrics", get(analysis_metrics))
        .route("/v1/analyze", post(analyze_metric))
        .layer(TraceLayer::new_for_http())
}

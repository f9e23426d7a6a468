use crate::app::{AnalysisState, CollectorState};
use axum::{extract::State, response::Json};
use serde_json::{json, Value};

/// 采集服务健康检查，注册中心用它判断实例是否存活
pub async fn collector_health(State(state): State<CollectorState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "upstream": state.router.service(),
    }))
}

/// 路由统计
pub async fn collector_metrics(State(state): State<CollectorState>) -> Json<Value> {
    let stats = state.router.stats_snapshot().await;
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": state.service_name,
        "routing": stats,
    }))
}

/// 分析服务健康检查
///
/// 熔断器打开时实例仍然健康，降级判定照常工作。
pub async fn analysis_health(State(state): State<AnalysisState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "breaker": state.pipeline.gateway().breaker().phase(),
    }))
}

/// 分析流水线统计
pub async fn analysis_metrics(State(state): State<AnalysisState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": state.service_name,
        "pipeline": state.pipeline.stats_snapshot(),
    }))
}

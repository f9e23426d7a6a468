//! Vigil Analysis Library
//!
//! This library provides the per-replica decision pipeline including:
//! - A three-state circuit breaker around the remote predictor
//! - Threshold fallback when the predictor is unavailable
//! - Sliding-window anomaly correlation per client
//! - The orchestrator that dispatches results to storage

pub mod breaker;
pub mod correlator;
pub mod fallback;
pub mod gateway;
pub mod pipeline;
pub mod stats;

// Re-export commonly used types
pub use breaker::{
    BreakerConfig, BreakerError, BreakerPhase, BreakerSnapshot, CircuitBreaker, TripCounts,
};
pub use correlator::{AnomalyCorrelator, CorrelationDecision};
pub use fallback::FallbackPolicy;
pub use gateway::{GatewayError, ResilienceGateway};
pub use pipeline::{PipelineError, PipelineOrchestrator, PipelineOutcome};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

//! Vigil API Server Library
//!
//! This library provides the HTTP surfaces of the Vigil pipeline:
//! the metric collector that routes to analysis replicas, and the
//! analysis replica that runs the decision pipeline.

pub mod app;
pub mod router;

// Re-export the main server functions
pub use app::{
    create_analysis_app, create_collector_app, init_tracing, serve, start_analysis,
    start_collector, AnalysisState, CollectorState,
};

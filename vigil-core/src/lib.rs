//! Vigil Core Library
//!
//! This library provides core functionality for the Vigil metric pipeline including:
//! - Metric, verdict and alarm types shared by every service
//! - Configuration management
//! - Request deadlines propagated across hops
//! - Clients for the predictor, storage and analysis collaborators

pub mod client;
pub mod config;
pub mod deadline;
pub mod metric;

// Re-export commonly used types
pub use client::{
    AnalysisClient, ClientError, HttpAnalysisClient, HttpPredictor, HttpStorageClient, Predictor,
    StorageClient,
};
pub use config::model::{
    AffinityStrategyKind, BreakerSettings, Config, CorrelationSettings, DiscoverySettings,
    FallbackSettings, InferenceSettings, RegistryKind, RoutingSettings, ServerSettings,
    ServiceRole, StorageSettings,
};
pub use deadline::{Deadline, DeadlineExceeded, TIMEOUT_HEADER};
pub use metric::{
    Alarm, AnalysisResponse, InferenceVerdict, Metric, MetricDisposition, MetricShape,
    PredictRequest, PredictResponse, SendMetricResponse, StorageResponse, VerdictLabel,
    VerdictSource, DISPOSITION_HEADER, FEATURE_COUNT,
};

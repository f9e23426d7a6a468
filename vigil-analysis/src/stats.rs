use crate::breaker::BreakerSnapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use vigil_core::VerdictSource;

/// 分析流水线计数器
#[derive(Debug, Default)]
pub struct PipelineStats {
    normal: AtomicU64,
    suspicious: AtomicU64,
    alarms: AtomicU64,
    skipped: AtomicU64,
    model_verdicts: AtomicU64,
    fallback_verdicts: AtomicU64,
    storage_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub normal: u64,
    pub suspicious: u64,
    pub alarms: u64,
    pub skipped: u64,
    pub model_verdicts: u64,
    pub fallback_verdicts: u64,
    pub storage_failures: u64,
    pub tracked_clients: usize,
    pub breaker: BreakerSnapshot,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_verdict(&self, source: VerdictSource) {
        match source {
            VerdictSource::Model => self.model_verdicts.fetch_add(1, Ordering::Relaxed),
            VerdictSource::Fallback => self.fallback_verdicts.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_normal(&self) {
        self.normal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suspicious(&self) {
        self.suspicious.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarm(&self) {
        self.alarms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tracked_clients: usize, breaker: BreakerSnapshot) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            normal: self.normal.load(Ordering::Relaxed),
            suspicious: self.suspicious.load(Ordering::Relaxed),
            alarms: self.alarms.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            model_verdicts: self.model_verdicts.load(Ordering::Relaxed),
            fallback_verdicts: self.fallback_verdicts.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            tracked_clients,
            breaker,
        }
    }
}

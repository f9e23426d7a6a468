use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 路由失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFailureKind {
    Discovery,
    Connection,
    Forward,
    Deadline,
}

/// 路由计数器
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    discovery_failures: AtomicU64,
    connection_failures: AtomicU64,
    forward_failures: AtomicU64,
    deadline_failures: AtomicU64,
    per_target: RwLock<HashMap<String, u64>>,
}

/// 可序列化的计数快照，供 /metrics 使用
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub discovery_failures: u64,
    pub connection_failures: u64,
    pub forward_failures: u64,
    pub deadline_failures: u64,
    pub per_target: HashMap<String, u64>,
    pub pool_size: usize,
}

impl RouterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_routed(&self, target: &str) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        *self
            .per_target
            .write()
            .entry(target.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_failure(&self, kind: RouteFailureKind) {
        let counter = match kind {
            RouteFailureKind::Discovery => &self.discovery_failures,
            RouteFailureKind::Connection => &self.connection_failures,
            RouteFailureKind::Forward => &self.forward_failures,
            RouteFailureKind::Deadline => &self.deadline_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn target_count(&self, target: &str) -> u64 {
        self.per_target.read().get(target).copied().unwrap_or(0)
    }

    pub fn snapshot(&self, pool_size: usize) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed(),
            discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            deadline_failures: self.deadline_failures.load(Ordering::Relaxed),
            per_target: self.per_target.read().clone(),
            pool_size,
        }
    }
}

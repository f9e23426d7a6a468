use crate::affinity::AffinitySelector;
use crate::discovery::{DiscoveryError, DiscoveryProvider};
use crate::pool::ConnectionPool;
use crate::stats::{RouteFailureKind, RouterStats, RouterStatsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use vigil_core::{AnalysisResponse, ClientError, Deadline, Metric};

/// 路由失败
///
/// 路由器本身不重试，所有失败原样返回给调用方。
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("upstream '{service}' unavailable: {source}")]
    DiscoveryUnavailable {
        service: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("failed to connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to forward metric to {target}: {source}")]
    Forward {
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("deadline exceeded routing to {target}")]
    DeadlineExceeded { target: String },
}

impl RouteError {
    pub fn kind(&self) -> RouteFailureKind {
        match self {
            RouteError::DiscoveryUnavailable { .. } => RouteFailureKind::Discovery,
            RouteError::Connection { .. } => RouteFailureKind::Connection,
            RouteError::Forward { .. } => RouteFailureKind::Forward,
            RouteError::DeadlineExceeded { .. } => RouteFailureKind::Deadline,
        }
    }

    /// 返回给客户端的消息
    pub fn user_message(&self) -> String {
        match self {
            RouteError::DiscoveryUnavailable { .. } => {
                "Upstream analysis service unavailable".to_string()
            }
            RouteError::Connection { target, source } => {
                format!("Failed to forward metric: cannot connect to {}: {}", target, source)
            }
            RouteError::Forward { source, .. } => format!("Failed to forward metric: {}", source),
            RouteError::DeadlineExceeded { target } => {
                format!("Failed to forward metric: deadline exceeded waiting for {}", target)
            }
        }
    }
}

/// 成功转发的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedResponse {
    pub target: String,
    pub response: AnalysisResponse,
}

/// 动态路由器
///
/// 每条指标都重新发现健康副本，按客户端标识选出唯一目标，
/// 从连接池取连接后在有界超时内转发。
pub struct DynamicRouter {
    service: String,
    discovery: DiscoveryProvider,
    affinity: AffinitySelector,
    pool: ConnectionPool,
    forward_timeout: Duration,
    stats: Arc<RouterStats>,
}

impl DynamicRouter {
    pub fn new(
        service: impl Into<String>,
        discovery: DiscoveryProvider,
        affinity: AffinitySelector,
        pool: ConnectionPool,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            discovery,
            affinity,
            pool,
            forward_timeout,
            stats: Arc::new(RouterStats::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        self.stats.clone()
    }

    pub async fn stats_snapshot(&self) -> RouterStatsSnapshot {
        self.stats.snapshot(self.pool.len().await)
    }

    /// 路由一条指标
    pub async fn route(
        &self,
        metric: &Metric,
        deadline: Deadline,
    ) -> Result<RoutedResponse, RouteError> {
        let result = self.route_inner(metric, deadline).await;
        match &result {
            Ok(routed) => self.stats.record_routed(&routed.target),
            Err(e) => {
                self.stats.record_failure(e.kind());
                error!("Routing metric from client '{}' failed: {}", metric.client_id, e);
            }
        }
        result
    }

    async fn route_inner(
        &self,
        metric: &Metric,
        deadline: Deadline,
    ) -> Result<RoutedResponse, RouteError> {
        let addresses = self
            .discovery
            .resolve(&self.service, deadline)
            .await
            .map_err(|source| match source {
                DiscoveryError::DeadlineExceeded { service } => {
                    RouteError::DeadlineExceeded { target: service }
                }
                source => RouteError::DiscoveryUnavailable {
                    service: self.service.clone(),
                    source,
                },
            })?;

        // resolve 成功时地址集合非空
        let target = self
            .affinity
            .select(&metric.client_id, &addresses)
            .ok_or_else(|| RouteError::DiscoveryUnavailable {
                service: self.service.clone(),
                source: DiscoveryError::NotFound {
                    service: self.service.clone(),
                    attempts: 0,
                    last_error: "empty instance list".to_string(),
                },
            })?;

        debug!(
            "Routing client '{}' to {} ({} healthy replicas)",
            metric.client_id,
            target,
            addresses.len()
        );

        let forward_deadline = deadline.tighten(self.forward_timeout);

        let client = self
            .pool
            .get_or_connect(&target, forward_deadline)
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    RouteError::DeadlineExceeded {
                        target: target.clone(),
                    }
                } else {
                    RouteError::Connection {
                        target: target.clone(),
                        source,
                    }
                }
            })?;

        let response = client
            .analyze(metric, forward_deadline)
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    RouteError::DeadlineExceeded {
                        target: target.clone(),
                    }
                } else {
                    RouteError::Forward {
                        target: target.clone(),
                        source,
                    }
                }
            })?;

        Ok(RoutedResponse { target, response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticRegistry;
    use crate::pool::Connector;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use vigil_core::{AffinityStrategyKind, AnalysisClient};

    /// 记录收到的客户端标识的假副本
    struct FakeReplica {
        address: String,
        received: Arc<Mutex<Vec<(String, String)>>>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl AnalysisClient for FakeReplica {
        async fn analyze(
            &self,
            metric: &Metric,
            deadline: Deadline,
        ) -> Result<AnalysisResponse, ClientError> {
            deadline
                .run(tokio::time::sleep(self.delay))
                .await
                .map_err(|_| ClientError::timeout(&self.address))?;
            if self.fail {
                return Err(ClientError::Transport {
                    target: self.address.clone(),
                    message: "connection reset".to_string(),
                });
            }
            self.received
                .lock()
                .push((self.address.clone(), metric.client_id.clone()));
            Ok(AnalysisResponse {
                processed: true,
                message: "Metric analyzed as normal and stored".to_string(),
            })
        }

        fn address(&self) -> &str {
            &self.address
        }
    }

    struct FakeConnector {
        received: Arc<Mutex<Vec<(String, String)>>>,
        delay: Duration,
        fail: bool,
        refuse: bool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, address: &str) -> Result<Arc<dyn AnalysisClient>, ClientError> {
            if self.refuse {
                return Err(ClientError::Connect {
                    target: address.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(Arc::new(FakeReplica {
                address: address.to_string(),
                received: self.received.clone(),
                delay: self.delay,
                fail: self.fail,
            }))
        }
    }

    struct Harness {
        router: DynamicRouter,
        registry: Arc<StaticRegistry>,
        received: Arc<Mutex<Vec<(String, String)>>>,
    }

    fn harness(replicas: &[&str], delay: Duration, fail: bool, refuse: bool) -> Harness {
        let registry = Arc::new(StaticRegistry::default());
        registry.set_instances(
            "analysis-service",
            replicas.iter().map(|s| s.to_string()).collect(),
        );
        let received = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(FakeConnector {
            received: received.clone(),
            delay,
            fail,
            refuse,
        });
        let router = DynamicRouter::new(
            "analysis-service",
            DiscoveryProvider::new(registry.clone(), 2, Duration::from_millis(10)),
            AffinitySelector::new(AffinityStrategyKind::HashRing, 64),
            ConnectionPool::new(connector),
            Duration::from_secs(5),
        );
        Harness {
            router,
            registry,
            received,
        }
    }

    #[tokio::test]
    async fn test_same_client_always_hits_same_replica() {
        let h = harness(&["a:1", "b:1", "c:1"], Duration::ZERO, false, false);
        let metric = Metric::scalar("client-7", "cpu", 10.0);

        let first = h.router.route(&metric, Deadline::none()).await.unwrap();
        for _ in 0..20 {
            let next = h.router.route(&metric, Deadline::none()).await.unwrap();
            assert_eq!(next.target, first.target);
            assert!(next.response.processed);
        }

        let snapshot = h.router.stats_snapshot().await;
        assert_eq!(snapshot.routed, 21);
        assert_eq!(snapshot.per_target[&first.target], 21);
        assert_eq!(snapshot.pool_size, 1);
        assert_eq!(h.received.lock().len(), 21);
    }

    #[tokio::test]
    async fn test_churn_is_picked_up_on_next_request() {
        let h = harness(&["a:1"], Duration::ZERO, false, false);
        let metric = Metric::scalar("client-1", "cpu", 10.0);

        assert_eq!(
            h.router.route(&metric, Deadline::none()).await.unwrap().target,
            "a:1"
        );
        h.registry.set_instances("analysis-service", vec!["b:1".to_string()]);
        assert_eq!(
            h.router.route(&metric, Deadline::none()).await.unwrap().target,
            "b:1"
        );
        // 已下线副本的连接仍留在池中
        assert_eq!(h.router.stats_snapshot().await.pool_size, 2);
    }

    #[tokio::test]
    async fn test_no_replicas_is_discovery_unavailable() {
        let h = harness(&[], Duration::ZERO, false, false);
        let err = h
            .router
            .route(&Metric::scalar("c", "cpu", 1.0), Deadline::none())
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::DiscoveryUnavailable { .. }));
        assert_eq!(err.user_message(), "Upstream analysis service unavailable");
        assert_eq!(h.router.stats_snapshot().await.discovery_failures, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_names_target() {
        let h = harness(&["a:1"], Duration::ZERO, false, true);
        let err = h
            .router
            .route(&Metric::scalar("c", "cpu", 1.0), Deadline::none())
            .await
            .unwrap_err();

        assert!(matches!(&err, RouteError::Connection { target, .. } if target == "a:1"));
        assert!(err.user_message().contains("a:1"));
    }

    #[tokio::test]
    async fn test_forward_failure_is_not_retried() {
        let h = harness(&["a:1"], Duration::ZERO, true, false);
        let err = h
            .router
            .route(&Metric::scalar("c", "cpu", 1.0), Deadline::none())
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::Forward { .. }));
        assert!(err.user_message().starts_with("Failed to forward metric"));
        assert_eq!(h.router.stats_snapshot().await.forward_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_replica_hits_forward_timeout() {
        let h = harness(&["a:1"], Duration::from_secs(30), false, false);
        let err = h
            .router
            .route(&Metric::scalar("c", "cpu", 1.0), Deadline::none())
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::DeadlineExceeded { .. }));
        assert!(h.received.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_tighter_than_forward_timeout() {
        let h = harness(&["a:1"], Duration::from_secs(2), false, false);
        let started = tokio::time::Instant::now();
        let err = h
            .router
            .route(
                &Metric::scalar("c", "cpu", 1.0),
                Deadline::after(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::DeadlineExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

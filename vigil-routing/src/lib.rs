//! Vigil Routing Library
//!
//! This library provides the collector-side routing functionality including:
//! - Service discovery against Consul or a static registry
//! - Session affinity (consistent hash ring or modulo)
//! - Per-address connection pooling
//! - The dynamic router that forwards metrics to analysis replicas

pub mod affinity;
pub mod discovery;
pub mod pool;
pub mod router;
pub mod stats;

// Re-export commonly used types
pub use affinity::{stable_hash, AffinitySelector, HashRing};
pub use discovery::{
    build_registry, ConsulRegistry, DiscoveryError, DiscoveryProvider, RegistryError,
    ServiceRegistration, ServiceRegistry, StaticRegistry,
};
pub use pool::{ConnectionPool, Connector, HttpConnector};
pub use router::{DynamicRouter, RouteError, RoutedResponse};
pub use stats::{RouteFailureKind, RouterStats, RouterStatsSnapshot};

pub mod consul;
pub mod provider;
pub mod registry;

pub use consul::ConsulRegistry;
pub use provider::{DiscoveryError, DiscoveryProvider};
pub use registry::{RegistryError, ServiceRegistration, ServiceRegistry, StaticRegistry};

use std::sync::Arc;
use std::time::Duration;
use vigil_core::{DiscoverySettings, RegistryKind};

const REGISTRY_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// 按配置创建注册中心
pub fn build_registry(
    settings: &DiscoverySettings,
) -> Result<Arc<dyn ServiceRegistry>, RegistryError> {
    match settings.kind {
        RegistryKind::Consul => Ok(Arc::new(ConsulRegistry::new(
            &settings.registry_addr,
            REGISTRY_REQUEST_TIMEOUT,
        )?)),
        RegistryKind::Static => Ok(Arc::new(StaticRegistry::new(
            settings.static_instances.clone(),
        ))),
    }
}

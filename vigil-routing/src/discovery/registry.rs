use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// 注册中心访问错误
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Request(String),

    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode registry response: {0}")]
    Decode(String),

    #[error("service instance '{0}' is not registered")]
    UnknownInstance(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Decode(err.to_string())
        } else {
            RegistryError::Request(err.to_string())
        }
    }
}

/// 服务实例注册信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceRegistration {
    /// 服务 ID 使用 `{service}-{host}`，同一主机重启后会覆盖旧的注册
    pub fn new(name: &str, address: &str, port: u16) -> Self {
        Self {
            id: format!("{}-{}", name, address),
            name: name.to_string(),
            address: address.to_string(),
            port,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// 注册中心用来做健康检查的地址
    pub fn health_url(&self) -> String {
        format!("http://{}/health", self.endpoint())
    }
}

/// 服务注册中心
///
/// 发现只依赖 `healthy_instances`，注册和注销只在服务启动和退出时使用。
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 返回通过健康检查的实例地址（host:port）
    async fn healthy_instances(&self, service: &str) -> Result<Vec<String>, RegistryError>;

    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError>;

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError>;

    /// 注册中心类型名称，用于日志
    fn kind(&self) -> &'static str;
}

/// 内存中的静态注册中心
///
/// 用于没有 Consul 的部署和测试。实例列表可以在运行时替换，模拟扩缩容。
#[derive(Default)]
pub struct StaticRegistry {
    services: RwLock<HashMap<String, Vec<String>>>,
    registrations: RwLock<HashMap<String, ServiceRegistration>>,
}

impl StaticRegistry {
    pub fn new(services: HashMap<String, Vec<String>>) -> Self {
        Self {
            services: RwLock::new(services),
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// 替换某个服务的全部实例
    pub fn set_instances(&self, service: &str, addresses: Vec<String>) {
        debug!(
            "Static registry now lists {} instances for '{}'",
            addresses.len(),
            service
        );
        self.services.write().insert(service.to_string(), addresses);
    }

    pub fn remove_instance(&self, service: &str, address: &str) {
        if let Some(addresses) = self.services.write().get_mut(service) {
            addresses.retain(|a| a != address);
        }
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn healthy_instances(&self, service: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .services
            .read()
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        let endpoint = registration.endpoint();
        {
            let mut services = self.services.write();
            let addresses = services.entry(registration.name.clone()).or_default();
            if !addresses.contains(&endpoint) {
                addresses.push(endpoint);
            }
        }
        self.registrations
            .write()
            .insert(registration.id.clone(), registration.clone());
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let registration = self
            .registrations
            .write()
            .remove(service_id)
            .ok_or_else(|| RegistryError::UnknownInstance(service_id.to_string()))?;
        self.remove_instance(&registration.name, &registration.endpoint());
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_registry_register_and_deregister() {
        let registry = StaticRegistry::default();
        let registration = ServiceRegistration::new("analysis-service", "replica-a", 50053);
        assert_eq!(registration.id, "analysis-service-replica-a");

        registry.register(&registration).await.unwrap();
        registry.register(&registration).await.unwrap();
        assert_eq!(
            registry.healthy_instances("analysis-service").await.unwrap(),
            vec!["replica-a:50053".to_string()]
        );

        registry.deregister(&registration.id).await.unwrap();
        assert!(registry
            .healthy_instances("analysis-service")
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            registry.deregister(&registration.id).await,
            Err(RegistryError::UnknownInstance(_))
        ));
    }

    #[tokio::test]
    async fn test_static_registry_churn() {
        let registry = StaticRegistry::default();
        registry.set_instances("svc", vec!["a:1".into(), "b:1".into()]);
        registry.remove_instance("svc", "a:1");
        assert_eq!(
            registry.healthy_instances("svc").await.unwrap(),
            vec!["b:1".to_string()]
        );
        assert!(registry.healthy_instances("unknown").await.unwrap().is_empty());
    }
}

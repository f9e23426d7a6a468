use super::registry::{RegistryError, ServiceRegistration, ServiceRegistry};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use vigil_core::client::normalize_base_url;

const CHECK_INTERVAL: &str = "10s";
const CHECK_TIMEOUT: &str = "1s";
const DEREGISTER_CRITICAL_AFTER: &str = "1m";

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: HealthNode,
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Debug, Deserialize)]
struct HealthNode {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct HealthService {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

impl HealthEntry {
    /// 服务未声明地址时退回节点地址
    fn endpoint(&self) -> String {
        let host = if self.service.address.is_empty() {
            &self.node.address
        } else {
            &self.service.address
        };
        format!("{}:{}", host, self.service.port)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    check: AgentCheck,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "HTTP")]
    http: String,
    interval: &'static str,
    timeout: &'static str,
    deregister_critical_service_after: &'static str,
}

/// Consul HTTP API 注册中心
pub struct ConsulRegistry {
    client: Client,
    base_url: String,
}

impl ConsulRegistry {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Request(format!("failed to build consul client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(addr),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn healthy_instances(&self, service: &str) -> Result<Vec<String>, RegistryError> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service);
        let response = self
            .client
            .get(&url)
            .query(&[("passing", "true")])
            .send()
            .await?;
        let entries: Vec<HealthEntry> = Self::check_status(response).await?.json().await?;

        let addresses: Vec<String> = entries.iter().map(HealthEntry::endpoint).collect();
        debug!(
            "Consul reports {} passing instances for '{}': {:?}",
            addresses.len(),
            service,
            addresses
        );
        Ok(addresses)
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let body = AgentRegistration {
            id: &registration.id,
            name: &registration.name,
            address: &registration.address,
            port: registration.port,
            check: AgentCheck {
                http: registration.health_url(),
                interval: CHECK_INTERVAL,
                timeout: CHECK_TIMEOUT,
                deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER,
            },
        };

        let response = self.client.put(&url).json(&body).send().await?;
        Self::check_status(response).await?;

        info!(
            "Registered service '{}' with ID '{}' at {}",
            registration.name,
            registration.id,
            registration.endpoint()
        );
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.base_url, service_id
        );
        let response = self.client.put(&url).send().await?;
        Self::check_status(response).await?;

        info!("Deregistered service '{}'", service_id);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "consul"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeConsul {
        registrations: Arc<Mutex<Vec<Value>>>,
        deregistered: Arc<Mutex<Vec<String>>>,
    }

    async fn health(
        Path(service): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        assert_eq!(query.get("passing").map(String::as_str), Some("true"));
        if service != "analysis-service" {
            return Json(json!([]));
        }
        Json(json!([
            {"Node": {"Address": "10.0.0.1"}, "Service": {"Address": "analysis-1", "Port": 50053}},
            {"Node": {"Address": "10.0.0.2"}, "Service": {"Address": "", "Port": 50053}}
        ]))
    }

    async fn register(State(state): State<FakeConsul>, Json(body): Json<Value>) {
        state.registrations.lock().unwrap().push(body);
    }

    async fn deregister(State(state): State<FakeConsul>, Path(id): Path<String>) {
        state.deregistered.lock().unwrap().push(id);
    }

    async fn spawn_consul() -> (String, FakeConsul) {
        let state = FakeConsul::default();
        let router = Router::new()
            .route("/v1/health/service/{service}", get(health))
            .route("/v1/agent/service/register", put(register))
            .route("/v1/agent/service/deregister/{id}", put(deregister))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr.to_string(), state)
    }

    #[tokio::test]
    async fn test_healthy_instances_falls_back_to_node_address() {
        let (addr, _) = spawn_consul().await;
        let registry = ConsulRegistry::new(&addr, Duration::from_secs(2)).unwrap();

        let instances = registry.healthy_instances("analysis-service").await.unwrap();
        assert_eq!(instances, vec!["analysis-1:50053", "10.0.0.2:50053"]);
        assert!(registry
            .healthy_instances("storage-service")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_register_sends_http_check() {
        let (addr, state) = spawn_consul().await;
        let registry = ConsulRegistry::new(&addr, Duration::from_secs(2)).unwrap();
        let registration = ServiceRegistration::new("analysis-service", "replica-a", 50053);

        registry.register(&registration).await.unwrap();
        registry.deregister(&registration.id).await.unwrap();

        let registrations = state.registrations.lock().unwrap();
        let body = &registrations[0];
        assert_eq!(body["ID"], "analysis-service-replica-a");
        assert_eq!(body["Name"], "analysis-service");
        assert_eq!(body["Port"], 50053);
        assert_eq!(body["Check"]["HTTP"], "http://replica-a:50053/health");
        assert_eq!(body["Check"]["Interval"], "10s");
        assert_eq!(body["Check"]["DeregisterCriticalServiceAfter"], "1m");

        assert_eq!(
            state.deregistered.lock().unwrap().as_slice(),
            ["analysis-service-replica-a".to_string()]
        );
    }
}

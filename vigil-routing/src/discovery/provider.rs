use super::registry::ServiceRegistry;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use vigil_core::{Deadline, DiscoverySettings};

/// 服务发现失败
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no healthy instances of '{service}' after {attempts} attempts: {last_error}")]
    NotFound {
        service: String,
        attempts: u32,
        last_error: String,
    },

    #[error("deadline exceeded while discovering '{service}'")]
    DeadlineExceeded { service: String },
}

/// 服务发现提供者
///
/// 每次调用都直接查询注册中心，不做本地缓存，副本的增减在一个重试周期内可见。
/// 查询出错或结果为空时按固定间隔重试，直到次数用完或截止时间到达。
#[derive(Clone)]
pub struct DiscoveryProvider {
    registry: Arc<dyn ServiceRegistry>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DiscoveryProvider {
    pub fn new(registry: Arc<dyn ServiceRegistry>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            registry,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_settings(registry: Arc<dyn ServiceRegistry>, settings: &DiscoverySettings) -> Self {
        Self::new(registry, settings.max_attempts, settings.retry_delay())
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// 解析服务的全部健康地址
    pub async fn resolve(
        &self,
        service: &str,
        deadline: Deadline,
    ) -> Result<Vec<String>, DiscoveryError> {
        let deadline_error = || DiscoveryError::DeadlineExceeded {
            service: service.to_string(),
        };
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match deadline.run(self.registry.healthy_instances(service)).await {
                Err(_) => return Err(deadline_error()),
                Ok(Ok(addresses)) if !addresses.is_empty() => {
                    debug!(
                        "Discovered {} healthy instances for '{}' on attempt {}",
                        addresses.len(),
                        service,
                        attempt
                    );
                    return Ok(addresses);
                }
                Ok(Ok(_)) => {
                    last_error = format!("no healthy instances found for service '{}'", service);
                }
                Ok(Err(e)) => {
                    last_error = format!("failed to query registry for '{}': {}", service, e);
                }
            }

            if attempt < self.max_attempts {
                warn!(
                    "Discovery attempt {}/{} for '{}' failed ({}), retrying in {:?}",
                    attempt, self.max_attempts, service, last_error, self.retry_delay
                );
                deadline
                    .sleep(self.retry_delay)
                    .await
                    .map_err(|_| deadline_error())?;
            }
        }

        Err(DiscoveryError::NotFound {
            service: service.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// 解析单例服务，返回第一个健康地址
    pub async fn resolve_one(
        &self,
        service: &str,
        deadline: Deadline,
    ) -> Result<String, DiscoveryError> {
        let addresses = self.resolve(service, deadline).await?;
        addresses
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::NotFound {
                service: service.to_string(),
                attempts: self.max_attempts,
                last_error: "registry returned an empty instance list".to_string(),
            })
    }
}

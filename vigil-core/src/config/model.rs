use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::metric::FEATURE_COUNT;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub inference: InferenceSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub fallback: FallbackSettings,
    #[serde(default)]
    pub correlation: CorrelationSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// 服务角色，决定默认端口和注册名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Collector,
    Analysis,
}

impl ServiceRole {
    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceRole::Collector => "collector-service",
            ServiceRole::Analysis => "analysis-service",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ServiceRole::Collector => 50051,
            ServiceRole::Analysis => 50053,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// 未设置时使用角色默认端口
    #[serde(default)]
    pub port: Option<u16>,
    /// 注册到注册中心的地址，未设置时使用主机名
    #[serde(default)]
    pub advertise_host: Option<String>,
    #[serde(default = "default_true")]
    pub register: bool,
}

impl ServerSettings {
    pub fn port_for(&self, role: ServiceRole) -> u16 {
        self.port.unwrap_or_else(|| role.default_port())
    }
}

/// 注册中心类型
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// Consul HTTP API
    #[default]
    Consul,
    /// 配置文件中的固定地址列表
    Static,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscoverySettings {
    #[serde(default)]
    pub kind: RegistryKind,
    #[serde(default = "default_registry_addr")]
    pub registry_addr: String,
    #[serde(default = "default_analysis_service")]
    pub analysis_service: String,
    #[serde(default = "default_storage_service")]
    pub storage_service: String,
    #[serde(default = "default_discovery_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_discovery_retry_delay")]
    pub retry_delay_ms: u64,
    /// kind = static 时使用：服务名 -> 地址列表
    #[serde(default)]
    pub static_instances: HashMap<String, Vec<String>>,
}

impl DiscoverySettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 会话亲和策略
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AffinityStrategyKind {
    /// 一致性哈希环，副本增减时只迁移少量客户端
    #[default]
    HashRing,
    /// 哈希取模，副本数变化时几乎所有客户端都会迁移
    Modulo,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutingSettings {
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub affinity: AffinityStrategyKind,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,
    /// 建立连接时先探测 /health，相当于阻塞式拨号
    #[serde(default = "default_true")]
    pub verify_on_connect: bool,
}

impl RoutingSettings {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InferenceSettings {
    #[serde(default = "default_inference_url")]
    pub url: String,
    #[serde(default = "default_inference_timeout")]
    pub timeout_ms: u64,
}

impl InferenceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BreakerSettings {
    /// 连续失败次数超过该值时熔断
    #[serde(default = "default_breaker_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_half_open_probes")]
    pub half_open_max_probes: u32,
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FallbackSettings {
    #[serde(default = "default_fallback_threshold")]
    pub threshold: f64,
    #[serde(default = "default_fallback_feature_index")]
    pub feature_index: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorrelationSettings {
    #[serde(default = "default_alarm_threshold")]
    pub alarm_threshold: u32,
    #[serde(default = "default_alarm_window")]
    pub window_seconds: u64,
}

impl CorrelationSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_storage_timeout")]
    pub timeout_ms: u64,
    /// 固定的存储服务地址，设置后跳过服务发现
    #[serde(default)]
    pub address: Option<String>,
}

impl StorageSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: None,
            advertise_host: None,
            register: true,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            kind: RegistryKind::default(),
            registry_addr: default_registry_addr(),
            analysis_service: default_analysis_service(),
            storage_service: default_storage_service(),
            max_attempts: default_discovery_max_attempts(),
            retry_delay_ms: default_discovery_retry_delay(),
            static_instances: HashMap::new(),
        }
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            forward_timeout_ms: default_forward_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            affinity: AffinityStrategyKind::default(),
            virtual_nodes: default_virtual_nodes(),
            verify_on_connect: true,
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            url: default_inference_url(),
            timeout_ms: default_inference_timeout(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failure_threshold(),
            cooldown_seconds: default_breaker_cooldown(),
            half_open_max_probes: default_half_open_probes(),
        }
    }
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            threshold: default_fallback_threshold(),
            feature_index: default_fallback_feature_index(),
        }
    }
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            alarm_threshold: default_alarm_threshold(),
            window_seconds: default_alarm_window(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_storage_timeout(),
            address: None,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_registry_addr() -> String {
    "http://localhost:8500".to_string()
}

fn default_analysis_service() -> String {
    "analysis-service".to_string()
}

fn default_storage_service() -> String {
    "storage-service".to_string()
}

fn default_discovery_max_attempts() -> u32 {
    15
}

fn default_discovery_retry_delay() -> u64 {
    2000
}

fn default_forward_timeout() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_virtual_nodes() -> u32 {
    64
}

fn default_inference_url() -> String {
    "http://localhost:5000/predict".to_string()
}

fn default_inference_timeout() -> u64 {
    1000 // 推理服务慢于1秒就按失败处理
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown() -> u64 {
    30
}

fn default_half_open_probes() -> u32 {
    3
}

fn default_fallback_threshold() -> f64 {
    95.0
}

fn default_fallback_feature_index() -> usize {
    4 // src_bytes
}

fn default_alarm_threshold() -> u32 {
    3
}

fn default_alarm_window() -> u64 {
    60
}

fn default_storage_timeout() -> u64 {
    3000
}

impl Config {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.validate_discovery()?;
        self.validate_routing()?;
        self.validate_analysis()?;
        Ok(())
    }

    fn validate_discovery(&self) -> Result<()> {
        let discovery = &self.discovery;

        if discovery.analysis_service.trim().is_empty() {
            anyhow::bail!("discovery.analysis_service cannot be empty");
        }

        if discovery.storage_service.trim().is_empty() {
            anyhow::bail!("discovery.storage_service cannot be empty");
        }

        if discovery.max_attempts == 0 {
            anyhow::bail!("discovery.max_attempts must be at least 1");
        }

        match discovery.kind {
            RegistryKind::Consul => {
                if discovery.registry_addr.trim().is_empty() {
                    anyhow::bail!("discovery.registry_addr cannot be empty when kind = consul");
                }
            }
            RegistryKind::Static => {
                for (service, addrs) in &discovery.static_instances {
                    if service.trim().is_empty() {
                        anyhow::bail!("discovery.static_instances has an empty service name");
                    }
                    if let Some(bad) = addrs.iter().find(|a| a.trim().is_empty()) {
                        anyhow::bail!(
                            "discovery.static_instances['{}'] contains an empty address '{}'",
                            service,
                            bad
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_routing(&self) -> Result<()> {
        let routing = &self.routing;

        if routing.forward_timeout_ms == 0 {
            anyhow::bail!("routing.forward_timeout_ms cannot be 0");
        }

        if routing.connect_timeout_ms == 0 {
            anyhow::bail!("routing.connect_timeout_ms cannot be 0");
        }

        if routing.affinity == AffinityStrategyKind::HashRing && routing.virtual_nodes == 0 {
            anyhow::bail!("routing.virtual_nodes must be at least 1 for the hash_ring strategy");
        }

        Ok(())
    }

    fn validate_analysis(&self) -> Result<()> {
        if self.inference.url.trim().is_empty() {
            anyhow::bail!("inference.url cannot be empty");
        }

        if self.inference.timeout_ms == 0 {
            anyhow::bail!("inference.timeout_ms cannot be 0");
        }

        if self.storage.timeout_ms == 0 {
            anyhow::bail!("storage.timeout_ms cannot be 0");
        }

        if self.breaker.half_open_max_probes == 0 {
            anyhow::bail!("breaker.half_open_max_probes must be at least 1");
        }

        if self.breaker.cooldown_seconds == 0 {
            anyhow::bail!("breaker.cooldown_seconds cannot be 0");
        }

        if !self.fallback.threshold.is_finite() {
            anyhow::bail!(
                "fallback.threshold must be a finite number, got {}",
                self.fallback.threshold
            );
        }

        if self.fallback.feature_index >= FEATURE_COUNT {
            anyhow::bail!(
                "fallback.feature_index {} is out of range (features have {} slots)",
                self.fallback.feature_index,
                FEATURE_COUNT
            );
        }

        if self.correlation.alarm_threshold == 0 {
            anyhow::bail!("correlation.alarm_threshold must be at least 1");
        }

        if self.correlation.window_seconds == 0 {
            anyhow::bail!("correlation.window_seconds cannot be 0");
        }

        Ok(())
    }
}

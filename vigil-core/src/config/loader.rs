use crate::config::model::{AffinityStrategyKind, Config, RegistryKind};
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 配置文件路径，优先使用 CONFIG_PATH 环境变量
pub fn get_config_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// 启动时读取一次配置：可选的 TOML 文件，再叠加环境变量
pub fn load_config() -> Result<Config, anyhow::Error> {
    let path = get_config_path();
    let mut config = if Path::new(&path).exists() {
        load_config_from_path(&path)?
    } else {
        tracing::debug!("Config file {} not found, starting from defaults", path);
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn load_config_from_path(config_path: &str) -> Result<Config, anyhow::Error> {
    let config_str = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config file '{}'", config_path))?;
    let config: Config = toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file '{}'", config_path))?;
    Ok(config)
}

/// 用环境变量覆盖配置
///
/// `lookup` 按变量名返回取值，便于测试时注入。
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), anyhow::Error>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("ALARM_THRESHOLD") {
        config.correlation.alarm_threshold = parse_var("ALARM_THRESHOLD", &v)?;
    }
    if let Some(v) = get("ALARM_WINDOW_SECONDS") {
        config.correlation.window_seconds = parse_var("ALARM_WINDOW_SECONDS", &v)?;
    }
    if let Some(v) = get("FALLBACK_THRESHOLD") {
        config.fallback.threshold = parse_var("FALLBACK_THRESHOLD", &v)?;
    }
    if let Some(v) = get("FALLBACK_FEATURE_INDEX") {
        config.fallback.feature_index = parse_var("FALLBACK_FEATURE_INDEX", &v)?;
    }

    if let Some(v) = get("REGISTRY_KIND") {
        config.discovery.kind = match v.trim().to_ascii_lowercase().as_str() {
            "consul" => RegistryKind::Consul,
            "static" => RegistryKind::Static,
            other => anyhow::bail!("REGISTRY_KIND must be 'consul' or 'static', got '{}'", other),
        };
    }
    if let Some(v) = get("CONSUL_ADDR") {
        config.discovery.registry_addr = v;
    }
    if let Some(v) = get("STATIC_INSTANCES") {
        config.discovery.static_instances = parse_static_instances(&v)?;
    }
    if let Some(v) = get("ANALYSIS_SERVICE_NAME") {
        config.discovery.analysis_service = v;
    }
    if let Some(v) = get("STORAGE_SERVICE_NAME") {
        config.discovery.storage_service = v;
    }
    if let Some(v) = get("DISCOVERY_MAX_ATTEMPTS") {
        config.discovery.max_attempts = parse_var("DISCOVERY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("DISCOVERY_RETRY_DELAY_MS") {
        config.discovery.retry_delay_ms = parse_var("DISCOVERY_RETRY_DELAY_MS", &v)?;
    }

    if let Some(v) = get("INFERENCE_SERVICE_ADDR") {
        config.inference.url = v;
    }
    if let Some(v) = get("INFERENCE_TIMEOUT_MS") {
        config.inference.timeout_ms = parse_var("INFERENCE_TIMEOUT_MS", &v)?;
    }

    if let Some(v) = get("BREAKER_FAILURE_THRESHOLD") {
        config.breaker.failure_threshold = parse_var("BREAKER_FAILURE_THRESHOLD", &v)?;
    }
    if let Some(v) = get("BREAKER_COOLDOWN_SECONDS") {
        config.breaker.cooldown_seconds = parse_var("BREAKER_COOLDOWN_SECONDS", &v)?;
    }
    if let Some(v) = get("BREAKER_HALF_OPEN_PROBES") {
        config.breaker.half_open_max_probes = parse_var("BREAKER_HALF_OPEN_PROBES", &v)?;
    }

    if let Some(v) = get("FORWARD_TIMEOUT_MS") {
        config.routing.forward_timeout_ms = parse_var("FORWARD_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("CONNECT_TIMEOUT_MS") {
        config.routing.connect_timeout_ms = parse_var("CONNECT_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("AFFINITY_STRATEGY") {
        config.routing.affinity = match v.trim().to_ascii_lowercase().as_str() {
            "hash_ring" | "ring" => AffinityStrategyKind::HashRing,
            "modulo" => AffinityStrategyKind::Modulo,
            other => anyhow::bail!(
                "AFFINITY_STRATEGY must be 'hash_ring' or 'modulo', got '{}'",
                other
            ),
        };
    }
    if let Some(v) = get("HASH_RING_VNODES") {
        config.routing.virtual_nodes = parse_var("HASH_RING_VNODES", &v)?;
    }

    if let Some(v) = get("STORAGE_TIMEOUT_MS") {
        config.storage.timeout_ms = parse_var("STORAGE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("STORAGE_ADDR") {
        config.storage.address = Some(v);
    }

    // GRPC_PORT 沿用旧部署脚本中的变量名
    if let Some(v) = get("LISTEN_PORT").or_else(|| get("GRPC_PORT")) {
        config.server.port = Some(parse_var("LISTEN_PORT", &v)?);
    }
    if let Some(v) = get("BIND_HOST") {
        config.server.host = v;
    }
    if let Some(v) = get("ADVERTISE_HOST").or_else(|| get("HOSTNAME")) {
        config.server.advertise_host = Some(v);
    }
    if let Some(v) = get("REGISTER_WITH_REGISTRY") {
        config.server.register = parse_bool("REGISTER_WITH_REGISTRY", &v)?;
    }

    Ok(())
}

/// 解析 `svc=a,b;svc2=c` 格式的静态实例列表
pub fn parse_static_instances(raw: &str) -> Result<HashMap<String, Vec<String>>, anyhow::Error> {
    let mut instances = HashMap::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (service, addrs) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid STATIC_INSTANCES entry '{}': expected service=addr[,addr]", entry))?;

        let addrs: Vec<String> = addrs
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        if service.trim().is_empty() || addrs.is_empty() {
            anyhow::bail!("invalid STATIC_INSTANCES entry '{}'", entry);
        }

        instances.insert(service.trim().to_string(), addrs);
    }

    Ok(instances)
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", value, key, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, anyhow::Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean '{}' for {}", other, key),
    }
}

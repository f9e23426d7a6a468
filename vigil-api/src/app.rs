use crate::router::routes::{create_analysis_router, create_collector_router};

use anyhow::{Context, Result};
use axum::Router;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil_analysis::{
    AnomalyCorrelator, FallbackPolicy, PipelineOrchestrator, ResilienceGateway,
};
use vigil_core::config::loader::{get_config_path, load_config};
use vigil_core::{Config, Deadline, HttpPredictor, HttpStorageClient, ServiceRole, StorageClient};
use vigil_routing::{
    build_registry, AffinitySelector, ConnectionPool, DiscoveryProvider, DynamicRouter,
    HttpConnector, ServiceRegistration, ServiceRegistry,
};

/// 采集服务状态
#[derive(Clone)]
pub struct CollectorState {
    pub router: Arc<DynamicRouter>,
    pub service_name: String,
}

impl CollectorState {
    pub fn new(router: Arc<DynamicRouter>) -> Self {
        Self {
            router,
            service_name: ServiceRole::Collector.service_name().to_string(),
        }
    }

    /// 按配置组装路由器：服务发现、会话亲和、连接池
    pub fn from_config(config: &Config, registry: Arc<dyn ServiceRegistry>) -> Self {
        let discovery = DiscoveryProvider::from_settings(registry, &config.discovery);
        let affinity = AffinitySelector::from_settings(&config.routing);
        let pool = ConnectionPool::new(Arc::new(HttpConnector::from_settings(&config.routing)));

        info!(
            "Routing to '{}' with {:?} affinity, forward timeout {:?}",
            config.discovery.analysis_service,
            affinity.strategy(),
            config.routing.forward_timeout()
        );

        let router = DynamicRouter::new(
            config.discovery.analysis_service.clone(),
            discovery,
            affinity,
            pool,
            config.routing.forward_timeout(),
        );
        Self::new(Arc::new(router))
    }
}

/// 分析服务状态
#[derive(Clone)]
pub struct AnalysisState {
    pub pipeline: Arc<PipelineOrchestrator>,
    pub service_name: String,
}

impl AnalysisState {
    pub fn new(pipeline: Arc<PipelineOrchestrator>, service_name: impl Into<String>) -> Self {
        Self {
            pipeline,
            service_name: service_name.into(),
        }
    }

    /// 按配置组装分析流水线
    ///
    /// 未配置固定存储地址时通过注册中心发现存储服务，找不到时启动失败。
    pub async fn from_config(config: &Config, registry: Arc<dyn ServiceRegistry>) -> Result<Self> {
        let predictor = Arc::new(
            HttpPredictor::new(config.inference.url.clone(), config.inference.timeout())
                .context("failed to create inference client")?,
        );

        let storage_addr = match &config.storage.address {
            Some(addr) => addr.clone(),
            None => {
                let discovery = DiscoveryProvider::from_settings(registry, &config.discovery);
                discovery
                    .resolve_one(&config.discovery.storage_service, Deadline::none())
                    .await
                    .context("could not discover storage service")?
            }
        };
        let storage: Arc<dyn StorageClient> = Arc::new(
            HttpStorageClient::new(&storage_addr, config.storage.timeout())
                .context("failed to create storage client")?,
        );
        info!("Using storage service at {}", storage_addr);

        let gateway = ResilienceGateway::from_settings(predictor, &config.breaker);
        let fallback = FallbackPolicy::from_settings(&config.fallback);
        let correlator = AnomalyCorrelator::from_settings(&config.correlation);
        info!(
            "Correlation: {} suspicious verdicts within {:?}; fallback threshold {} on feature {}",
            correlator.threshold(),
            correlator.window(),
            fallback.threshold(),
            config.fallback.feature_index
        );

        let pipeline = PipelineOrchestrator::new(gateway, fallback, correlator, storage);
        Ok(Self::new(
            Arc::new(pipeline),
            config.discovery.analysis_service.clone(),
        ))
    }
}

/// 创建采集服务应用
pub fn create_collector_app(state: CollectorState) -> Router {
    create_collector_router().with_state(state)
}

/// 创建分析服务应用
pub fn create_analysis_app(state: AnalysisState) -> Router {
    create_analysis_router().with_state(state)
}

/// 初始化日志，完全依赖 RUST_LOG 环境变量
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

/// 收到 Ctrl+C 或 SIGTERM 时取消令牌
pub fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install CTRL+C signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        info!("Shutdown signal received");
        trigger.cancel();
    });

    token
}

/// 监听、注册、服务，退出时注销
///
/// 注册失败视为启动失败；注销失败只记录日志，注册中心的健康检查最终会清理该实例。
pub async fn serve(
    role: ServiceRole,
    service_name: &str,
    app: Router,
    config: &Config,
    registry: Arc<dyn ServiceRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port_for(role));
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to listen on {}", bind_addr))?;
    let addr = listener.local_addr()?;
    info!("{} listening on http://{}", service_name, addr);

    let registration = if config.server.register {
        let host = advertise_host(config.server.advertise_host.as_deref(), addr.ip())?;
        let registration = ServiceRegistration::new(service_name, &host, addr.port());
        registry
            .register(&registration)
            .await
            .with_context(|| format!("failed to register '{}' with {}", service_name, registry.kind()))?;
        info!(
            "Registered '{}' as '{}' at {} ({})",
            service_name,
            registration.id,
            registration.endpoint(),
            registry.kind()
        );
        Some(registration)
    } else {
        info!("Registry registration disabled for '{}'", service_name);
        None
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });
    let result = server.await;

    if let Some(registration) = registration {
        match registry.deregister(&registration.id).await {
            Ok(()) => info!("Deregistered '{}'", registration.id),
            Err(e) => warn!("Failed to deregister '{}': {}", registration.id, e),
        }
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

/// 注册到注册中心的主机地址
///
/// 优先使用配置的 `advertise_host`；监听在通配地址上时改用本机主机名，
/// 通配地址对其他节点不可达。
fn advertise_host(configured: Option<&str>, bound: IpAddr) -> Result<String> {
    if let Some(host) = configured {
        return Ok(host.to_string());
    }
    if !bound.is_unspecified() {
        return Ok(bound.to_string());
    }
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    if hostname.is_empty() {
        anyhow::bail!(
            "listening on {} without an advertise host, and the system hostname is empty",
            bound
        );
    }
    Ok(hostname)
}

fn load_startup_config() -> Result<Config> {
    let config_path = get_config_path();
    info!("Configuration file: {}", config_path);
    let config = load_config()?;
    info!("Configuration loaded successfully");
    Ok(config)
}

/// 启动采集服务
pub async fn start_collector() -> Result<()> {
    init_tracing();
    info!("Starting Vigil collector...");

    let config = load_startup_config()?;
    let registry = build_registry(&config.discovery)?;
    let state = CollectorState::from_config(&config, registry.clone());
    let service_name = state.service_name.clone();

    info!("Available endpoints:");
    info!("  GET  /health      - Health check");
    info!("  GET  /metrics     - Routing statistics");
    info!("  POST /v1/metrics  - Submit a metric");

    serve(
        ServiceRole::Collector,
        &service_name,
        create_collector_app(state),
        &config,
        registry,
        shutdown_on_signal(),
    )
    .await
}

/// 启动分析服务
pub async fn start_analysis() -> Result<()> {
    init_tracing();
    info!("Starting Vigil analysis replica...");

    let config = load_startup_config()?;
    let registry = build_registry(&config.discovery)?;
    let state = match AnalysisState::from_config(&config, registry.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize analysis pipeline: {:#}", e);
            return Err(e);
        }
    };
    let service_name = state.service_name.clone();

    info!("Available endpoints:");
    info!("  GET  /health      - Health check");
    info!("  GET  /metrics     - Pipeline statistics");
    info!("  POST /v1/analyze  - Analyze a metric");

    serve(
        ServiceRole::Analysis,
        &service_name,
        create_analysis_app(state),
        &config,
        registry,
        shutdown_on_signal(),
    )
    .await
}

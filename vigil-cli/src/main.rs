//! Vigil CLI Tool
//!
//! Command line interface for validating configuration, generating traffic
//! against the collector and inspecting the service registry

mod dataset;
mod generator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dataset::Dataset;
use generator::{FeatureSource, GeneratorConfig, MetricSender, TrafficMode};
use std::path::PathBuf;
use std::time::Duration;
use vigil_core::config::loader::{apply_env_overrides, load_config_from_path};
use vigil_core::{Config, Metric, RegistryKind};
use vigil_routing::{build_registry, ConsulRegistry, ServiceRegistry};

#[derive(Parser)]
#[command(name = "vigil-cli")]
#[command(about = "A CLI tool for the Vigil metric pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Send metrics for one client and print the replies
    Send {
        /// Collector address
        #[arg(short, long, default_value = "http://localhost:50051")]
        addr: String,
        /// Client identity used for routing and correlation
        #[arg(long, default_value = "test-client")]
        client_id: String,
        /// Send traffic that exceeds the fallback threshold
        #[arg(long)]
        anomalous: bool,
        /// Number of metrics to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Run concurrent simulated clients against the collector
    Generate {
        /// Collector address
        #[arg(short, long, default_value = "http://localhost:50051")]
        addr: String,
        /// Traffic mode
        #[arg(short, long, value_enum, default_value_t = TrafficMode::Benign)]
        mode: TrafficMode,
        /// Number of concurrent clients
        #[arg(long, default_value_t = 5)]
        clients: usize,
        /// Records per client (0 to run until interrupted)
        #[arg(long, default_value_t = 200)]
        records: usize,
        /// Average pause between sends in milliseconds
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        /// KDD-style CSV dataset (41 features + label)
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// File used to number categorical columns (defaults to the dataset itself)
        #[arg(long)]
        categories: Option<PathBuf>,
    },
    /// List healthy instances of a service
    Discover {
        /// Service name
        #[arg(short, long, default_value = "analysis-service")]
        service: String,
        /// Consul address; overrides the configured registry
        #[arg(short, long)]
        registry: Option<String>,
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            println!("Validating configuration file: {}", config);
            match load_and_validate(&config) {
                Ok(cfg) => print_config_summary(&cfg),
                Err(e) => {
                    eprintln!("❌ Configuration validation failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Send {
            addr,
            client_id,
            anomalous,
            count,
        } => {
            send_metrics(&addr, &client_id, anomalous, count).await?;
        }
        Commands::Generate {
            addr,
            mode,
            clients,
            records,
            delay_ms,
            dataset,
            categories,
        } => {
            let source = match dataset {
                Some(path) => {
                    let dataset = Dataset::load(&path, categories.as_deref())?;
                    FeatureSource::from_dataset(&dataset, mode)?
                }
                None => FeatureSource::Synthetic,
            };
            let report = generator::run(
                MetricSender::new(&addr)?,
                source,
                GeneratorConfig {
                    mode,
                    clients,
                    records,
                    delay: Duration::from_millis(delay_ms),
                },
            )
            .await;
            println!(
                "📊 Sent {} metrics: {} accepted, {} failed",
                report.sent, report.accepted, report.failed
            );
        }
        Commands::Discover {
            service,
            registry,
            config,
        } => {
            discover(&service, registry, &config).await?;
        }
    }

    Ok(())
}

/// 读取配置文件（不存在时使用默认值），叠加环境变量后校验
fn load_and_validate(path: &str) -> Result<Config> {
    let mut config = if std::path::Path::new(path).exists() {
        load_config_from_path(path)?
    } else {
        println!("Config file not found, checking defaults and environment");
        Config::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn print_config_summary(cfg: &Config) {
    println!("✅ Configuration is valid");
    match cfg.discovery.kind {
        RegistryKind::Consul => println!("  - registry: consul at {}", cfg.discovery.registry_addr),
        RegistryKind::Static => println!(
            "  - registry: static ({} services)",
            cfg.discovery.static_instances.len()
        ),
    }
    println!(
        "  - routing: {:?} affinity, forward timeout {}ms",
        cfg.routing.affinity, cfg.routing.forward_timeout_ms
    );
    println!(
        "  - inference: {} (timeout {}ms)",
        cfg.inference.url, cfg.inference.timeout_ms
    );
    println!(
        "  - breaker: trips after {} consecutive failures, cool-down {}s",
        cfg.breaker.failure_threshold, cfg.breaker.cooldown_seconds
    );
    println!(
        "  - fallback: anomaly when feature {} > {}",
        cfg.fallback.feature_index, cfg.fallback.threshold
    );
    println!(
        "  - correlation: {} suspicious verdicts within {}s",
        cfg.correlation.alarm_threshold, cfg.correlation.window_seconds
    );
}

/// 发送指标并打印回复
async fn send_metrics(addr: &str, client_id: &str, anomalous: bool, count: usize) -> Result<()> {
    let sender = MetricSender::new(addr)?;
    let mode = if anomalous {
        TrafficMode::Malicious
    } else {
        TrafficMode::Benign
    };

    println!("Sending {} metric(s) for '{}' to {}", count, client_id, sender.url());
    for i in 1..=count {
        let (features, _) = generator::synthesize(mode);
        let metric = Metric::with_features(client_id, "network_traffic", features);
        match sender.send(&metric).await {
            Ok(response) => {
                let mark = if response.accepted { "✅" } else { "❌" };
                println!("{} [{}] {}", mark, i, response.message);
            }
            Err(e) => println!("❌ [{}] {:#}", i, e),
        }
    }
    Ok(())
}

/// 打印服务的健康实例
async fn discover(service: &str, registry_addr: Option<String>, config_path: &str) -> Result<()> {
    let registry: std::sync::Arc<dyn ServiceRegistry> = match registry_addr {
        Some(addr) => std::sync::Arc::new(ConsulRegistry::new(&addr, Duration::from_secs(5))?),
        None => build_registry(&load_and_validate(config_path)?.discovery)?,
    };

    println!("🔍 Looking up '{}' in {} registry", service, registry.kind());
    let instances = registry.healthy_instances(service).await?;
    if instances.is_empty() {
        println!("❌ No healthy instances of '{}'", service);
        std::process::exit(1);
    }
    for instance in &instances {
        println!("  🟢 {}", instance);
    }
    println!("{} healthy instance(s)", instances.len());
    Ok(())
}

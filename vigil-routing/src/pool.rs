use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use vigil_core::{AnalysisClient, ClientError, Deadline, HttpAnalysisClient, RoutingSettings};

/// 为副本地址建立连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn AnalysisClient>, ClientError>;
}

/// 基于 reqwest 的连接器
///
/// `verify_on_connect` 打开时会先探测副本的 /health，探测失败视为建连失败。
pub struct HttpConnector {
    connect_timeout: Duration,
    verify_on_connect: bool,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration, verify_on_connect: bool) -> Self {
        Self {
            connect_timeout,
            verify_on_connect,
        }
    }

    pub fn from_settings(settings: &RoutingSettings) -> Self {
        Self::new(settings.connect_timeout(), settings.verify_on_connect)
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn AnalysisClient>, ClientError> {
        let client = HttpAnalysisClient::new(address, self.connect_timeout)?;
        if self.verify_on_connect {
            client.probe(self.connect_timeout).await?;
        }
        Ok(Arc::new(client))
    }
}

/// 按地址缓存的连接池
///
/// 每个地址只建立一次连接，之后一直复用；条目不会被淘汰，
/// 已下线副本的连接保留到进程重启。
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    connections: RwLock<HashMap<String, Arc<dyn AnalysisClient>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// 获取或创建地址对应的连接
    ///
    /// 先在读锁下查找；未命中时取写锁并再次检查，保证并发的首次访问只建连一次。
    pub async fn get_or_connect(
        &self,
        address: &str,
        deadline: Deadline,
    ) -> Result<Arc<dyn AnalysisClient>, ClientError> {
        {
            let connections = self.connections.read().await;
            if let Some(client) = connections.get(address) {
                return Ok(client.clone());
            }
        }

        let mut connections = self.connections.write().await;
        if let Some(client) = connections.get(address) {
            debug!("Connection to {} was created by a concurrent request", address);
            return Ok(client.clone());
        }

        let client = deadline
            .run(self.connector.connect(address))
            .await
            .map_err(|_| ClientError::timeout(address))??;

        connections.insert(address.to_string(), client.clone());
        info!(
            "Opened connection to analysis replica {} (pool size: {})",
            address,
            connections.len()
        );
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.connections.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use vigil_core::{AffinityStrategyKind, RoutingSettings};

/// 稳定的 64 位哈希：SHA-256 摘要的前 8 个字节
///
/// 不依赖进程内随机种子，不同进程、不同版本的同一客户端得到相同结果。
pub fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// 排序去重后的地址集合，使结果与注册中心返回的顺序无关
fn canonical(addresses: &[String]) -> Vec<String> {
    let mut members = addresses.to_vec();
    members.sort();
    members.dedup();
    members
}

/// 一致性哈希环
#[derive(Debug)]
pub struct HashRing {
    members: Vec<String>,
    /// (哈希点, 成员下标)，按哈希点排序
    points: Vec<(u64, usize)>,
}

impl HashRing {
    pub fn new(addresses: &[String], virtual_nodes: u32) -> Self {
        let members = canonical(addresses);
        let mut points = Vec::with_capacity(members.len() * virtual_nodes as usize);
        for (index, member) in members.iter().enumerate() {
            for vnode in 0..virtual_nodes.max(1) {
                points.push((stable_hash(&format!("{}#{}", member, vnode)), index));
            }
        }
        points.sort_unstable();

        Self { members, points }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// 顺时针找到第一个不小于 key 哈希值的节点
    pub fn locate(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = stable_hash(key);
        let slot = self.points.partition_point(|(point, _)| *point < hash);
        let (_, index) = self.points[slot % self.points.len()];
        Some(self.members[index].as_str())
    }
}

/// 会话亲和选择器
///
/// 同一地址集合下，同一客户端总是落在同一副本上。哈希环在地址集合不变时复用。
pub struct AffinitySelector {
    strategy: AffinityStrategyKind,
    virtual_nodes: u32,
    ring: Mutex<Option<Arc<HashRing>>>,
}

impl AffinitySelector {
    pub fn new(strategy: AffinityStrategyKind, virtual_nodes: u32) -> Self {
        Self {
            strategy,
            virtual_nodes,
            ring: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &RoutingSettings) -> Self {
        Self::new(settings.affinity, settings.virtual_nodes)
    }

    pub fn strategy(&self) -> AffinityStrategyKind {
        self.strategy
    }

    /// 为客户端选择一个目标地址，地址集合为空时返回 None
    pub fn select(&self, client_id: &str, addresses: &[String]) -> Option<String> {
        if addresses.is_empty() {
            return None;
        }

        match self.strategy {
            AffinityStrategyKind::Modulo => {
                let members = canonical(addresses);
                let index = (stable_hash(client_id) % members.len() as u64) as usize;
                members.get(index).cloned()
            }
            AffinityStrategyKind::HashRing => {
                let ring = self.ring_for(addresses);
                ring.locate(client_id).map(str::to_string)
            }
        }
    }

    fn ring_for(&self, addresses: &[String]) -> Arc<HashRing> {
        let members = canonical(addresses);
        let mut cached = self.ring.lock();
        if let Some(ring) = cached.as_ref() {
            if ring.members() == members.as_slice() {
                return ring.clone();
            }
        }

        let ring = Arc::new(HashRing::new(&members, self.virtual_nodes));
        *cached = Some(ring.clone());
        ring
    }
}

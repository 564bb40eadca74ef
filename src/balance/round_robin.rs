//! 轮询均衡器

use std::sync::atomic::{AtomicUsize, Ordering};

use super::Balancer;
use crate::error::{DiscoveryError, Result};
use crate::types::{AddrInfo, Membership};

/// 轮询
///
/// 游标单调前进, 依次返回每个实例; 忽略权重与 hash key,
/// 权重为 0 的实例同样会被轮到。
#[derive(Default)]
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobinBalancer {
    fn pick(&self, membership: &Membership, _hash_key: Option<&str>) -> Result<AddrInfo> {
        if membership.is_empty() {
            return Err(DiscoveryError::NoInstanceAvailable);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(membership.addrs[index % membership.len()].clone())
    }
}

//! 加权策略共用的累计权重表

use std::sync::Arc;

use rand::Rng;

use crate::error::{DiscoveryError, Result};
use crate::types::{AddrInfo, Membership};

/// 累计权重前缀表
///
/// 由一个成员快照构建, 只在快照版本变化时重建。
/// 权重为 0 的实例区间宽度为 0, 加权策略永远选不到它。
pub(crate) struct WeightTable {
    version: u64,
    total: u64,
    /// prefix[i] = 前 i+1 个实例的权重和
    prefix: Vec<u64>,
    addrs: Arc<Vec<AddrInfo>>,
}

impl WeightTable {
    pub(crate) fn build(membership: &Membership) -> Self {
        let mut prefix = Vec::with_capacity(membership.len());
        let mut total = 0u64;
        for addr in membership.addrs.iter() {
            total += addr.weight as u64;
            prefix.push(total);
        }
        Self {
            version: membership.version,
            total,
            prefix,
            addrs: membership.addrs.clone(),
        }
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    /// 将 [0, total) 内的一个点映射到所在实例
    pub(crate) fn pick_point(&self, point: u64) -> Result<AddrInfo> {
        if self.total == 0 {
            return Err(DiscoveryError::NoInstanceAvailable);
        }
        let index = self.prefix.partition_point(|&p| p <= point);
        Ok(self.addrs[index].clone())
    }

    /// 加权随机选择
    pub(crate) fn pick_random(&self) -> Result<AddrInfo> {
        if self.total == 0 {
            return Err(DiscoveryError::NoInstanceAvailable);
        }
        let point = rand::thread_rng().gen_range(0..self.total);
        self.pick_point(point)
    }
}

/// 缓存的权重表, 版本不匹配时重建
pub(crate) fn cached_table<'a>(
    cache: &'a mut Option<WeightTable>,
    membership: &Membership,
) -> &'a WeightTable {
    if cache
        .as_ref()
        .map(|table| table.version() != membership.version)
        .unwrap_or(true)
    {
        *cache = Some(WeightTable::build(membership));
    }
    cache.as_ref().expect("权重表已在上面构建")
}

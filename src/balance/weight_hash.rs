//! 加权hash均衡器

use std::sync::Mutex;

use super::weight_table::{WeightTable, cached_table};
use super::{Balancer, hash64};
use crate::error::Result;
use crate::types::{AddrInfo, Membership};

/// 加权hash
///
/// 根据提供的 key 计算 hash 值然后对总权重求余, 余数落在哪个实例的
/// 累计权重区间就选哪个实例; 成员不变时同一个 key 总是命中同一个实例。
/// 成员变更后 key 可能重新映射, 需要最小化重映射时用加权一致性hash。
/// 如果没有设置 key 则降级为加权随机。
#[derive(Default)]
pub struct WeightHashBalancer {
    cache: Mutex<Option<WeightTable>>,
}

impl WeightHashBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for WeightHashBalancer {
    fn pick(&self, membership: &Membership, hash_key: Option<&str>) -> Result<AddrInfo> {
        let mut cache = self.cache.lock().unwrap();
        let table = cached_table(&mut cache, membership);
        match hash_key.filter(|key| !key.is_empty()) {
            Some(key) if table.total() > 0 => table.pick_point(hash64(key) % table.total()),
            Some(_) | None => table.pick_random(),
        }
    }
}

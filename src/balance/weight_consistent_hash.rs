//! 加权一致性hash均衡器

use std::sync::Arc;
use std::sync::Mutex;

use super::weight_table::{WeightTable, cached_table};
use super::{Balancer, hash64};
use crate::error::{DiscoveryError, Result};
use crate::types::{AddrInfo, Membership};

/// 默认每单位权重的虚拟节点数
pub const DEF_REPLICAS: u32 = 1;

/// 哈希环: 排序后的 (hash点, 实例下标) 列表
struct Ring {
    version: u64,
    points: Vec<(u64, usize)>,
    addrs: Arc<Vec<AddrInfo>>,
}

impl Ring {
    /// 每个实例贡献 `weight * replicas` 个环上的点,
    /// 点由 "<endpoint>#<序号>" 计算 hash, 同一端点的点在重建后保持稳定,
    /// 成员变更时只有加入/离开实例拥有的分片会重新映射。
    fn build(membership: &Membership, replicas: u32) -> Self {
        let mut points = Vec::new();
        for (index, addr) in membership.addrs.iter().enumerate() {
            let n = addr.weight as u64 * replicas as u64;
            for i in 0..n {
                points.push((hash64(&format!("{}#{}", addr.endpoint, i)), index));
            }
        }
        points.sort_unstable();
        Self {
            version: membership.version,
            points,
            addrs: membership.addrs.clone(),
        }
    }

    /// 找到 key 的 hash 值顺时针方向第一个点, 越过末尾则回绕到最小点
    fn pick(&self, key: &str) -> Result<AddrInfo> {
        if self.points.is_empty() {
            return Err(DiscoveryError::NoInstanceAvailable);
        }
        let h = hash64(key);
        let mut index = self.points.partition_point(|point| point.0 < h);
        if index == self.points.len() {
            index = 0;
        }
        Ok(self.addrs[self.points[index].1].clone())
    }
}

/// 加权一致性hash
///
/// 权重值可以理解为每个实例的分片数, 每个分片计算 hash 值落在一个环上。
/// 获取时根据提供的 key 计算 hash 值得出落在环的一个点上,
/// 由这个点得出是哪个实例的分片进而知道是哪个实例。
/// 如果没有设置 key 则降级为加权随机。
pub struct WeightConsistentHashBalancer {
    replicas: u32,
    ring: Mutex<Option<Ring>>,
    fallback: Mutex<Option<WeightTable>>,
}

impl WeightConsistentHashBalancer {
    pub fn new() -> Self {
        Self::with_replicas(DEF_REPLICAS)
    }

    /// 指定每单位权重的虚拟节点数
    ///
    /// 线性映射 `points = weight * replicas` 是一个可调参数:
    /// replicas 越大分布越均匀, 环的构建与内存开销也越大。
    pub fn with_replicas(replicas: u32) -> Self {
        Self {
            replicas: replicas.max(1),
            ring: Mutex::new(None),
            fallback: Mutex::new(None),
        }
    }
}

impl Default for WeightConsistentHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for WeightConsistentHashBalancer {
    fn pick(&self, membership: &Membership, hash_key: Option<&str>) -> Result<AddrInfo> {
        let key = match hash_key.filter(|key| !key.is_empty()) {
            Some(key) => key,
            None => {
                let mut fallback = self.fallback.lock().unwrap();
                return cached_table(&mut fallback, membership).pick_random();
            }
        };

        let mut ring = self.ring.lock().unwrap();
        if ring
            .as_ref()
            .map(|ring| ring.version != membership.version)
            .unwrap_or(true)
        {
            // 环只在快照版本变化时惰性重建
            *ring = Some(Ring::build(membership, self.replicas));
        }
        ring.as_ref().expect("环已在上面构建").pick(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn membership(endpoints: &[&str]) -> Membership {
        Membership::new(
            endpoints
                .iter()
                .map(|endpoint| AddrInfo::new(*endpoint).with_weight(100))
                .collect(),
        )
    }

    #[test]
    fn test_sticky_for_same_key() {
        let b = WeightConsistentHashBalancer::new();
        let m = membership(&["a:1", "b:2", "c:3"]);
        let first = b.pick(&m, Some("user-42")).unwrap();
        for _ in 0..100 {
            assert_eq!(b.pick(&m, Some("user-42")).unwrap(), first);
        }
    }

    #[test]
    fn test_minimal_disruption_on_removal() {
        let b = WeightConsistentHashBalancer::new();
        let full = membership(&["a:1", "b:2", "c:3"]);

        let keys: Vec<String> = (0..1000).map(|i| format!("key-{i}")).collect();
        let mut owners: HashMap<&String, String> = HashMap::new();
        for key in &keys {
            owners.insert(key, b.pick(&full, Some(key)).unwrap().endpoint);
        }

        // 移除 c 后, 原本属于 a/b 的 key 必须仍然命中 a/b
        let without_c = membership(&["a:1", "b:2"]);
        for key in &keys {
            let owner = &owners[key];
            if owner != "c:3" {
                assert_eq!(
                    &b.pick(&without_c, Some(key)).unwrap().endpoint,
                    owner,
                    "key {key} 不应重新映射"
                );
            }
        }
    }

    #[test]
    fn test_weight_zero_contributes_no_points() {
        let b = WeightConsistentHashBalancer::new();
        let m = Membership::new(vec![
            AddrInfo::new("a:1").with_weight(0),
            AddrInfo::new("b:2").with_weight(10),
        ]);
        for i in 0..200 {
            let key = format!("key-{i}");
            assert_eq!(b.pick(&m, Some(&key)).unwrap().endpoint, "b:2");
        }

        let all_zero = Membership::new(vec![AddrInfo::new("a:1").with_weight(0)]);
        assert!(matches!(
            b.pick(&all_zero, Some("key")),
            Err(DiscoveryError::NoInstanceAvailable)
        ));
    }

    #[test]
    fn test_no_key_degrades_to_random() {
        let b = WeightConsistentHashBalancer::new();
        let m = membership(&["a:1", "b:2"]);
        b.pick(&m, None).unwrap();
        b.pick(&m, Some("")).unwrap();
    }

    #[test]
    fn test_higher_weight_owns_more_keys() {
        let b = WeightConsistentHashBalancer::with_replicas(4);
        let m = Membership::new(vec![
            AddrInfo::new("a:1").with_weight(10),
            AddrInfo::new("b:2").with_weight(90),
        ]);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for i in 0..10_000 {
            let key = format!("key-{i}");
            let addr = b.pick(&m, Some(&key)).unwrap();
            *counts.entry(addr.endpoint).or_insert(0) += 1;
        }
        // 权重 9 倍的实例应当拥有明显更多的 key, 给宽容差
        assert!(counts["b:2"] > counts["a:1"] * 3);
    }
}

//! 加权随机均衡器

use std::sync::Mutex;

use super::Balancer;
use super::weight_table::{WeightTable, cached_table};
use crate::error::Result;
use crate::types::{AddrInfo, Membership};

/// 加权随机
///
/// 每个实例有不同权重, 获取时随机选择一个实例, 权重越高被选取的机会越大。
#[derive(Default)]
pub struct WeightRandomBalancer {
    cache: Mutex<Option<WeightTable>>,
}

impl WeightRandomBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for WeightRandomBalancer {
    fn pick(&self, membership: &Membership, _hash_key: Option<&str>) -> Result<AddrInfo> {
        let mut cache = self.cache.lock().unwrap();
        cached_table(&mut cache, membership).pick_random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use std::collections::HashMap;

    #[test]
    fn test_empty_and_zero_weight() {
        let b = WeightRandomBalancer::new();
        assert!(matches!(
            b.pick(&Membership::new(vec![]), None),
            Err(DiscoveryError::NoInstanceAvailable)
        ));

        let m = Membership::new(vec![AddrInfo::new("a:1").with_weight(0)]);
        assert!(matches!(
            b.pick(&m, None),
            Err(DiscoveryError::NoInstanceAvailable)
        ));
    }

    #[test]
    fn test_weighted_fairness() {
        let b = WeightRandomBalancer::new();
        let m = Membership::new(vec![
            AddrInfo::new("a:1").with_weight(1),
            AddrInfo::new("b:2").with_weight(3),
        ]);

        let mut counts: HashMap<String, u32> = HashMap::new();
        const DRAWS: u32 = 100_000;
        for _ in 0..DRAWS {
            let addr = b.pick(&m, None).unwrap();
            *counts.entry(addr.endpoint).or_insert(0) += 1;
        }

        // 期望 b 被选中约 75000 次, 给 3% 容差
        let b_count = counts["b:2"];
        assert!(
            (72_000..=78_000).contains(&b_count),
            "b 的命中数偏离期望: {b_count}"
        );
        assert_eq!(counts["a:1"] + b_count, DRAWS);
    }

    #[test]
    fn test_zero_weight_unreachable() {
        let b = WeightRandomBalancer::new();
        let m = Membership::new(vec![
            AddrInfo::new("a:1").with_weight(0),
            AddrInfo::new("b:2").with_weight(5),
        ]);
        for _ in 0..1000 {
            assert_eq!(b.pick(&m, None).unwrap().endpoint, "b:2");
        }
    }
}

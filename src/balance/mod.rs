//! 负载均衡模块
//!
//! 提供多种负载均衡策略, 从成员快照中为一次出站调用选择恰好一个实例。
//! `pick` 不做任何 IO, 也不会挂起; 快照在一次选择期间不可变,
//! 并发的成员变更不会破坏进行中的选择。

pub mod round_robin;
pub mod weight_consistent_hash;
pub mod weight_hash;
pub mod weight_random;

mod weight_table;

use std::hash::{Hash, Hasher};

pub use round_robin::RoundRobinBalancer;
pub use weight_consistent_hash::WeightConsistentHashBalancer;
pub use weight_hash::WeightHashBalancer;
pub use weight_random::WeightRandomBalancer;

use crate::error::{DiscoveryError, Result};
use crate::types::{AddrInfo, Membership};

/// 负载均衡器
pub trait Balancer: Send + Sync {
    /// 从成员快照中选择一个实例
    ///
    /// `hash_key` 供哈希类策略做粘性路由; 其它策略忽略它。
    /// 成员为空(或加权策略下总权重为 0)时返回 `NoInstanceAvailable`。
    fn pick(&self, membership: &Membership, hash_key: Option<&str>) -> Result<AddrInfo>;
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerType {
    /// 轮询: 依次选择每个实例, 忽略权重
    RoundRobin,
    /// 加权随机: 每个实例有不同权重, 权重越高被选取的机会越大
    WeightRandom,
    /// 加权hash: 根据 key 的 hash 值对总权重求余得出所在实例;
    /// 成员变更后 key 可能大面积重新映射
    WeightHash,
    /// 加权一致性hash: 权重决定实例在环上的分片数, 成员变更时
    /// 仅受影响实例的分片重新映射
    WeightConsistentHash,
}

impl BalancerType {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "round_robin" => Ok(BalancerType::RoundRobin),
            "weight_random" => Ok(BalancerType::WeightRandom),
            "weight_hash" => Ok(BalancerType::WeightHash),
            "weight_consistent_hash" => Ok(BalancerType::WeightConsistentHash),
            _ => Err(DiscoveryError::UnknownBalancer(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerType::RoundRobin => "round_robin",
            BalancerType::WeightRandom => "weight_random",
            BalancerType::WeightHash => "weight_hash",
            BalancerType::WeightConsistentHash => "weight_consistent_hash",
        }
    }
}

/// 创建负载均衡器
pub fn new_balancer(balancer_type: BalancerType) -> Box<dyn Balancer> {
    match balancer_type {
        BalancerType::RoundRobin => Box::new(RoundRobinBalancer::new()),
        BalancerType::WeightRandom => Box::new(WeightRandomBalancer::new()),
        BalancerType::WeightHash => Box::new(WeightHashBalancer::new()),
        BalancerType::WeightConsistentHash => Box::new(WeightConsistentHashBalancer::new()),
    }
}

/// 按策略名创建负载均衡器
pub fn new_balancer_by_name(name: &str) -> Result<Box<dyn Balancer>> {
    Ok(new_balancer(BalancerType::from_name(name)?))
}

/// 按配置创建负载均衡器
pub fn new_balancer_from_config(conf: &crate::config::BalanceConfig) -> Result<Box<dyn Balancer>> {
    match BalancerType::from_name(&conf.strategy)? {
        BalancerType::WeightConsistentHash => Ok(Box::new(
            WeightConsistentHashBalancer::with_replicas(conf.consistent_hash_replicas),
        )),
        other => Ok(new_balancer(other)),
    }
}

/// 字符串 hash, 同一次构建内结果稳定
pub(crate) fn hash64(text: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

//! Flare 服务注册与发现库
//!
//! 基于 redis 的服务注册/发现与客户端负载均衡, 包含:
//! - 注册端: 服务实例上线登记、后台续约、下线摘除
//! - 发现端: 拉取全量成员 + 订阅增量信号, 向调用方推送成员快照
//! - 均衡端: 从成员快照中按策略选择一个实例
//!
//! 注册端与发现端通过同一个 redis 交换记录与信号, 也提供
//! 手动(静态)实现用于本地开发与测试。

pub mod balance;
pub mod config;
pub mod discover;
pub mod error;
pub mod registry;
pub mod store;
pub mod types;

// Re-exports
pub use balance::{
    Balancer, BalancerType, RoundRobinBalancer, WeightConsistentHashBalancer, WeightHashBalancer,
    WeightRandomBalancer, new_balancer, new_balancer_by_name, new_balancer_from_config,
};
pub use config::{BalanceConfig, Config, DiscoverConfig, RegistryConfig};
pub use discover::{
    Discover, DiscoverType, ManualRegistry, RedisDiscover, ResolverHandle, create_discover,
};
pub use error::{DiscoveryError, InfraResult, Result};
pub use registry::{RedisRegistry, Registry, RegistryType, create_registry};
pub use store::{KvStore, MemoryStore, RedisStore, StoreError};
pub use types::{AddrInfo, DEF_WEIGHT, Membership, RegRecord, RegSignal, SCHEME, parse_addr};

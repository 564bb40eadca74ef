//! 服务发现模块
//!
//! 读路径: 为每个服务名维护一个存活、去重、非陈旧的成员集,
//! 事件推送维持低延迟, 周期性重新发现保证最终一致。

pub mod manual;
pub mod redis;
pub mod resolver;

use std::sync::Arc;

use async_trait::async_trait;

pub use manual::ManualRegistry;
pub use redis::RedisDiscover;
pub use resolver::ResolverHandle;

use crate::config::DiscoverConfig;
use crate::error::{DiscoveryError, Result};
use crate::store::RedisStore;

/// 服务发现 Trait
#[async_trait]
pub trait Discover: Send + Sync {
    /// 解析服务, 返回成员集句柄; 同名服务在进程内复用同一份成员集
    ///
    /// 首次调用会做一次阻塞的全量读取; 没有存活实例时返回 `NotFound`,
    /// 且不会留下半初始化状态, 稍后重试即可。
    async fn resolve(&self, server_name: &str) -> Result<ResolverHandle>;

    /// 关闭发现器, 停止信号分发与重新发现循环
    fn close(&self);
}

/// 服务发现类型
#[derive(Debug, Clone)]
pub enum DiscoverType {
    Redis,
    Manual,
}

impl DiscoverType {
    /// 按配置中的类型名解析, 未知名称是配置错误
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "redis" => Ok(DiscoverType::Redis),
            "manual" | "static" => Ok(DiscoverType::Manual),
            _ => Err(DiscoveryError::Config(format!("未知的发现器类型: {name}"))),
        }
    }
}

/// 创建服务发现实例
///
/// manual 类型的注册器与发现器需要共享同一个 `ManualRegistry` 实例才有意义,
/// 需要同时使用两者时请直接构造并分别作为 `Registry`/`Discover` 传递。
pub async fn create_discover(conf: &DiscoverConfig) -> Result<Arc<dyn Discover>> {
    match DiscoverType::from_name(&conf.discover_type)? {
        DiscoverType::Redis => {
            let store = RedisStore::connect(&conf.address)
                .await
                .map_err(|err| DiscoveryError::StoreRead(err.to_string()))?;
            Ok(Arc::new(RedisDiscover::new(Arc::new(store), conf)?))
        }
        DiscoverType::Manual => Ok(Arc::new(ManualRegistry::new())),
    }
}

//! 服务注册模块
//!
//! 写路径: 实例进程对外公布 "我在地址 X, 权重 W", 并周期性续期;
//! 进程退出前显式取消注册。

pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;

pub use redis::RedisRegistry;

use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result};
use crate::store::RedisStore;
use crate::types::AddrInfo;

/// 服务注册 Trait
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册服务, 在服务端启动成功后调用
    async fn register(&self, server_name: &str, addr: &AddrInfo) -> Result<()>;

    /// 取消注册, 在服务端即将结束前调用; 取消注册未知服务是 no-op
    async fn unregister(&self, server_name: &str);

    /// 关闭注册器, 停止后台循环; 不会自动取消注册,
    /// 需要干净下线的调用方必须先调用 `unregister`
    fn close(&self);
}

/// 服务注册类型
#[derive(Debug, Clone)]
pub enum RegistryType {
    Redis,
    Manual,
}

impl RegistryType {
    /// 按配置中的类型名解析, 未知名称是配置错误
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "redis" => Ok(RegistryType::Redis),
            "manual" | "static" => Ok(RegistryType::Manual),
            _ => Err(DiscoveryError::Config(format!("未知的注册器类型: {name}"))),
        }
    }
}

/// 创建服务注册实例
///
/// manual 类型的注册器与发现器需要共享同一个 `ManualRegistry` 实例才有意义,
/// 需要同时使用两者时请直接构造并分别作为 `Registry`/`Discover` 传递。
pub async fn create_registry(conf: &RegistryConfig) -> Result<Arc<dyn Registry>> {
    match RegistryType::from_name(&conf.registry_type)? {
        RegistryType::Redis => {
            let store = RedisStore::connect(&conf.address)
                .await
                .map_err(|err| DiscoveryError::StoreWrite(err.to_string()))?;
            Ok(Arc::new(RedisRegistry::new(Arc::new(store), conf)?))
        }
        RegistryType::Manual => Ok(Arc::new(crate::discover::ManualRegistry::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_type_names() {
        assert!(matches!(
            RegistryType::from_name("redis").unwrap(),
            RegistryType::Redis
        ));
        assert!(matches!(
            RegistryType::from_name("manual").unwrap(),
            RegistryType::Manual
        ));
        assert!(matches!(
            RegistryType::from_name("Static").unwrap(),
            RegistryType::Manual
        ));
        // 写错的类型名是配置错误, 不能静默落到 redis
        assert!(matches!(
            RegistryType::from_name("rediss"),
            Err(DiscoveryError::Config(_))
        ));
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, InfraResult, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub discover: DiscoverConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
}

/// 注册器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_backend_type")]
    pub registry_type: String, // redis, manual
    /// 存储地址, 如 "redis://127.0.0.1:6379"
    pub address: String,
    /// 注册有效时间, 单位秒
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// 重新注册间隔时间, 单位秒, 不得超过 ttl/3
    #[serde(default = "default_re_reg_interval")]
    pub re_reg_interval: u64,
}

/// 发现器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverConfig {
    #[serde(default = "default_backend_type")]
    pub discover_type: String, // redis, manual
    /// 存储地址, 如 "redis://127.0.0.1:6379"
    pub address: String,
    /// 重新发现间隔时间, 单位秒
    #[serde(default = "default_re_discover_interval")]
    pub re_discover_interval: u64,
    /// 旧数据硬删除阈值, 单位秒; 记录过期超过该时长后由读取方从存储中删除
    #[serde(default = "default_hard_expiry_grace")]
    pub hard_expiry_grace: u64,
}

/// 均衡器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalanceConfig {
    /// 策略: round_robin, weight_random, weight_hash, weight_consistent_hash
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// 一致性哈希中每单位权重的虚拟节点数
    #[serde(default = "default_replicas")]
    pub consistent_hash_replicas: u32,
}

fn default_backend_type() -> String {
    "redis".to_string()
}

fn default_ttl() -> u64 {
    30
}

fn default_re_reg_interval() -> u64 {
    10
}

fn default_re_discover_interval() -> u64 {
    30
}

fn default_hard_expiry_grace() -> u64 {
    3600
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

fn default_replicas() -> u32 {
    1
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            consistent_hash_replicas: default_replicas(),
        }
    }
}

impl RegistryConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            registry_type: default_backend_type(),
            address: address.into(),
            ttl: default_ttl(),
            re_reg_interval: default_re_reg_interval(),
        }
    }

    /// 校验配置, 重注册间隔不得超过 ttl/3, 否则记录可能在刷新前过期
    pub fn validate(&self) -> Result<()> {
        if self.ttl == 0 {
            return Err(DiscoveryError::Config("ttl 必须大于 0".to_string()));
        }
        if self.re_reg_interval == 0 || self.re_reg_interval * 3 > self.ttl {
            return Err(DiscoveryError::Config(format!(
                "re_reg_interval 必须在 (0, ttl/3] 内: re_reg_interval={}, ttl={}",
                self.re_reg_interval, self.ttl
            )));
        }
        Ok(())
    }
}

impl DiscoverConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            discover_type: default_backend_type(),
            address: address.into(),
            re_discover_interval: default_re_discover_interval(),
            hard_expiry_grace: default_hard_expiry_grace(),
        }
    }

    /// 校验配置, 两个周期参数都不能为 0
    pub fn validate(&self) -> Result<()> {
        if self.re_discover_interval == 0 {
            return Err(DiscoveryError::Config(
                "re_discover_interval 必须大于 0".to_string(),
            ));
        }
        if self.hard_expiry_grace == 0 {
            return Err(DiscoveryError::Config(
                "hard_expiry_grace 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> InfraResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.registry.validate().map_err(anyhow::Error::new)?;
        config.discover.validate().map_err(anyhow::Error::new)?;
        Ok(config)
    }
}

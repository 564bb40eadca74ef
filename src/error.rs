//! Flare Discovery 统一错误类型
//!
//! 注册/发现的存储 IO 失败会返回给调用方；解析失败类错误只记录日志并跳过，
//! 不会阻塞同名服务其它实例的发现。

use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    /// 申请序号失败（计数器自增失败）
    #[error("申请序号失败: {0}")]
    SeqAllocation(String),

    /// 写入注册信息失败
    #[error("写入注册信息失败: {0}")]
    StoreWrite(String),

    /// 读取注册信息失败
    #[error("读取注册信息失败: {0}")]
    StoreRead(String),

    /// 服务没有可用路由
    #[error("服务 {0} 没有可用路由")]
    NotFound(String),

    /// 均衡器没有可用实例
    #[error("没有可用实例")]
    NoInstanceAvailable,

    /// 无效的 addr
    #[error("无效的addr: {0}")]
    InvalidAddr(String),

    /// 均衡器不存在
    #[error("均衡器不存在: {0}")]
    UnknownBalancer(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 操作超时
    #[error("操作超时: {0}")]
    Timeout(String),
}

impl DiscoveryError {
    /// 判断是否为可重试的错误
    ///
    /// 存储 IO 类错误由周期循环自动补偿, 调用方可以稍后重试;
    /// 配置与 addr 解析错误重试没有意义。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::SeqAllocation(_)
                | DiscoveryError::StoreWrite(_)
                | DiscoveryError::StoreRead(_)
                | DiscoveryError::NotFound(_)
                | DiscoveryError::NoInstanceAvailable
                | DiscoveryError::Timeout(_)
        )
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// 基础设施层默认使用的结果类型
pub type InfraResult<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(DiscoveryError::StoreRead("conn reset".into()).is_retryable());
        assert!(DiscoveryError::NoInstanceAvailable.is_retryable());
        assert!(!DiscoveryError::InvalidAddr("bad scheme".into()).is_retryable());
        assert!(!DiscoveryError::Config("ttl".into()).is_retryable());
    }
}

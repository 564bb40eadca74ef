//! 存储适配层
//!
//! 注册/发现依赖的键值存储能力抽象: 哈希表读写删除、原子计数器、发布订阅。
//! 提供 redis 实现与内存实现（测试与单进程部署用）。

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// 服务申请序号自增键
pub fn seq_key(server_name: &str) -> String {
    format!("seq:{server_name}")
}

/// 服务注册地址键
pub fn reg_key(server_name: &str) -> String {
    format!("reg:{server_name}")
}

/// 注册信号通道键
pub fn signal_key(server_name: &str) -> String {
    format!("signal:{server_name}")
}

/// 注册记录的哈希表字段名
pub fn reg_field(seq_no: i64) -> String {
    seq_no.to_string()
}

/// 存储层错误
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct StoreError(pub String);

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 键值存储能力
///
/// 所有存储后端（redis、内存）都需要实现这个 trait。
/// 注意：由于需要动态分发（dyn），使用 async-trait。
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 原子自增计数器, 返回自增后的值
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// 写入哈希表字段
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// 删除哈希表字段, 字段不存在时为幂等 no-op
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<()>;

    /// 读取哈希表全部字段
    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// 向通道发布一条消息
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// 订阅通道, 返回消息接收端
    ///
    /// 至少一次投递语义; 接收端被丢弃后订阅自动终止。
    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::UnboundedReceiver<String>>;
}

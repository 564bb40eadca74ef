//! 手动(静态)注册发现实现
//!
//! 不依赖外部存储的注册发现变体: 地址表在进程内维护,
//! 作为一个显式构造的组件同时实现 `Registry` 与 `Discover`,
//! 两侧需要共享同一个实例。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use super::{Discover, ResolverHandle};
use crate::error::{DiscoveryError, Result};
use crate::registry::Registry;
use crate::types::{AddrInfo, Membership, parse_addr};

struct ManualEntry {
    addrs: Vec<AddrInfo>,
    tx: watch::Sender<Membership>,
}

impl ManualEntry {
    fn push_members(&self) {
        self.tx.send_replace(Membership::new(self.addrs.clone()));
    }
}

/// 手动注册发现
#[derive(Default)]
pub struct ManualRegistry {
    entries: RwLock<HashMap<String, ManualEntry>>,
}

impl ManualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个地址
    pub async fn add_addr(&self, server_name: &str, addr: AddrInfo) {
        let addr = if addr.name.is_empty() {
            let name = addr.endpoint.clone();
            addr.with_name(name)
        } else {
            addr
        };

        let mut entries = self.entries.write().await;
        let entry = entries.entry(server_name.to_string()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(Membership::new(Vec::new()));
            ManualEntry {
                addrs: Vec::new(),
                tx,
            }
        });
        entry.addrs.push(addr);
        entry.push_members();
    }

    /// 解析并添加一个地址, 示例: grpc://localhost:3000?weight=100&name=service1
    pub async fn add_addr_str(&self, server_name: &str, addr: &str) -> Result<()> {
        let addr = parse_addr(addr)?;
        self.add_addr(server_name, addr).await;
        Ok(())
    }
}

#[async_trait]
impl Registry for ManualRegistry {
    async fn register(&self, server_name: &str, addr: &AddrInfo) -> Result<()> {
        self.add_addr(server_name, addr.clone()).await;
        Ok(())
    }

    async fn unregister(&self, server_name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.remove(server_name) {
            // 已有句柄看到空成员集
            entry.tx.send_replace(Membership::new(Vec::new()));
        }
    }

    fn close(&self) {}
}

#[async_trait]
impl Discover for ManualRegistry {
    async fn resolve(&self, server_name: &str) -> Result<ResolverHandle> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(server_name)
            .filter(|entry| !entry.addrs.is_empty())
            .ok_or_else(|| DiscoveryError::NotFound(server_name.to_string()))?;
        Ok(ResolverHandle::new(server_name, entry.tx.subscribe()))
    }

    fn close(&self) {}
}

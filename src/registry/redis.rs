//! redis 服务注册实现

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::Registry;
use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result};
use crate::store::{self, KvStore};
use crate::types::{AddrInfo, RegRecord, RegSignal};

/// redis 服务注册器
///
/// 写路径: 申请序号 -> 写入注册记录 -> 发布变更信号。
/// 后台循环周期性重写本进程注册过的记录以刷新截止时间,
/// 拥有进程崩溃后记录不再刷新, 读取方据此剔除。
pub struct RedisRegistry {
    store: Arc<dyn KvStore>,
    ttl: i64,
    servers: Arc<Mutex<HashMap<String, RegRecord>>>,
    re_reg_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RedisRegistry {
    /// 创建注册器并启动重注册循环
    pub fn new(store: Arc<dyn KvStore>, conf: &RegistryConfig) -> Result<Self> {
        conf.validate()?;

        let servers: Arc<Mutex<HashMap<String, RegRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let handle = tokio::spawn(Self::re_reg_loop(
            store.clone(),
            servers.clone(),
            conf.re_reg_interval,
            conf.ttl as i64,
        ));

        Ok(Self {
            store,
            ttl: conf.ttl as i64,
            servers,
            re_reg_handle: std::sync::Mutex::new(Some(handle)),
        })
    }

    async fn re_reg_loop(
        store: Arc<dyn KvStore>,
        servers: Arc<Mutex<HashMap<String, RegRecord>>>,
        interval: u64,
        ttl: i64,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 首个 tick 立即完成, 跳过
        ticker.tick().await;
        loop {
            ticker.tick().await;
            Self::register_all(&store, &servers, ttl).await;
        }
    }

    /// 重写本进程注册过的所有记录, 刷新截止时间
    ///
    /// 单个服务失败不会中断同一轮其它服务的重注册。
    async fn register_all(
        store: &Arc<dyn KvStore>,
        servers: &Arc<Mutex<HashMap<String, RegRecord>>>,
        ttl: i64,
    ) {
        let mut servers = servers.lock().await;
        for (server_name, reg) in servers.iter_mut() {
            if let Err(err) = Self::register_one(store, server_name, reg, ttl).await {
                error!(server_name = %server_name, error = %err, "重注册服务失败");
            }
        }
    }

    /// 写入一条注册记录, 同时刷新截止时间
    async fn register_one(
        store: &Arc<dyn KvStore>,
        server_name: &str,
        reg: &mut RegRecord,
        ttl: i64,
    ) -> Result<()> {
        reg.deadline = Utc::now().timestamp() + ttl;

        let key = store::reg_key(server_name);
        let field = store::reg_field(reg.seq_no);
        let data = serde_json::to_string(reg)
            .map_err(|err| DiscoveryError::StoreWrite(format!("序列化注册记录失败: {err}")))?;
        store
            .hset(&key, &field, &data)
            .await
            .map_err(|err| DiscoveryError::StoreWrite(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Registry for RedisRegistry {
    async fn register(&self, server_name: &str, addr: &AddrInfo) -> Result<()> {
        let seq_key = store::seq_key(server_name);
        let seq_no = self.store.incr(&seq_key).await.map_err(|err| {
            error!(server_name = %server_name, endpoint = %addr.endpoint, error = %err,
                "注册服务失败, 申请序号出错");
            DiscoveryError::SeqAllocation(err.to_string())
        })?;

        let name = if addr.name.is_empty() {
            format!("{server_name}.{seq_no}")
        } else {
            addr.name.clone()
        };
        let mut reg = RegRecord {
            seq_no,
            name,
            endpoint: addr.endpoint.clone(),
            weight: addr.weight,
            deadline: 0,
        };

        Self::register_one(&self.store, server_name, &mut reg, self.ttl)
            .await
            .inspect_err(|err| {
                error!(server_name = %server_name, reg = ?reg, error = %err, "注册服务失败");
            })?;

        // 发布失败只降级为靠重新发现兜底, 不算注册失败
        let signal = RegSignal {
            reg: reg.clone(),
            is_unregister: false,
        };
        if let Ok(text) = serde_json::to_string(&signal) {
            if let Err(err) = self.store.publish(&store::signal_key(server_name), &text).await {
                error!(server_name = %server_name, reg = ?reg, error = %err,
                    "注册服务, 发布注册信号失败");
            }
        }

        info!(server_name = %server_name, seq_no = reg.seq_no, endpoint = %reg.endpoint, "注册服务成功");
        self.servers
            .lock()
            .await
            .insert(server_name.to_string(), reg);
        Ok(())
    }

    async fn unregister(&self, server_name: &str) {
        let reg = match self.servers.lock().await.remove(server_name) {
            Some(reg) => reg,
            // 取消注册未知服务是 no-op
            None => return,
        };

        let signal = RegSignal {
            reg: reg.clone(),
            is_unregister: true,
        };
        if let Ok(text) = serde_json::to_string(&signal) {
            if let Err(err) = self.store.publish(&store::signal_key(server_name), &text).await {
                error!(server_name = %server_name, reg = ?reg, error = %err,
                    "取消注册服务, 发布注册信号失败");
            }
        }

        let key = store::reg_key(server_name);
        let field = store::reg_field(reg.seq_no);
        if let Err(err) = self.store.hdel(&key, &[field]).await {
            error!(server_name = %server_name, reg = ?reg, error = %err, "取消注册服务失败");
            return;
        }
        info!(server_name = %server_name, seq_no = reg.seq_no, "取消注册服务成功");
    }

    fn close(&self) {
        if let Some(handle) = self.re_reg_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for RedisRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

//! redis 服务发现实现
//!
//! 读路径: 首次解析做一次全量读取建立成员集, 之后由注册信号推送维持低延迟,
//! 并以周期性重新发现兜底修复漏掉/重复/乱序的信号。
//! 推送是延迟优化, 拉取才是正确性保证, 两者始终同时开启。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{error, info, warn};

use super::{Discover, ResolverHandle};
use crate::config::DiscoverConfig;
use crate::error::{DiscoveryError, Result};
use crate::store::{self, KvStore};
use crate::types::{Membership, RegRecord, RegSignal};

/// 每个服务名的成员状态
///
/// 信号应用与重新发现替换都先锁住本条目再改动, 同名服务的变更串行化;
/// 不同服务名之间互不阻塞。
struct ServiceEntry {
    /// 按 SeqNo 升序、无重复序号的存活记录
    records: Vec<RegRecord>,
    /// 最近一次更新时间, 秒级时间戳; 重新发现用它跳过刚被信号更新过的服务
    up_time: i64,
    tx: watch::Sender<Membership>,
}

impl ServiceEntry {
    /// 从当前记录生成新快照并推送给所有句柄
    fn push_members(&self) {
        let membership = Membership::new(self.records.iter().map(RegRecord::addr_info).collect());
        self.tx.send_replace(membership);
    }
}

type ServiceMap = Arc<RwLock<HashMap<String, Arc<Mutex<ServiceEntry>>>>>;
type SubscribeCmd = (String, mpsc::UnboundedReceiver<String>);

/// redis 服务发现器
pub struct RedisDiscover {
    store: Arc<dyn KvStore>,
    hard_expiry_grace: i64,
    services: ServiceMap,
    sub_tx: mpsc::UnboundedSender<SubscribeCmd>,
    dispatch_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    re_discover_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RedisDiscover {
    /// 创建发现器并启动信号分发循环与重新发现循环
    pub fn new(store: Arc<dyn KvStore>, conf: &DiscoverConfig) -> Result<Self> {
        conf.validate()?;

        let services: ServiceMap = Arc::new(RwLock::new(HashMap::new()));
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();

        let dispatch_handle = tokio::spawn(Self::dispatch_loop(services.clone(), sub_rx));
        let re_discover_handle = tokio::spawn(Self::re_discover_loop(
            store.clone(),
            services.clone(),
            conf.re_discover_interval,
            conf.hard_expiry_grace as i64,
        ));

        Ok(Self {
            store,
            hard_expiry_grace: conf.hard_expiry_grace as i64,
            services,
            sub_tx,
            dispatch_handle: std::sync::Mutex::new(Some(dispatch_handle)),
            re_discover_handle: std::sync::Mutex::new(Some(re_discover_handle)),
        })
    }

    /// 全量读取一个服务的注册记录
    ///
    /// 无法解析的字段与过期超过硬删除阈值的字段会被顺手从存储中删除;
    /// 截止时间已过但未到阈值的记录不再进入成员集, 但保留在存储中。
    /// 返回的记录按 SeqNo 升序排列。
    async fn discover_one(
        store: &Arc<dyn KvStore>,
        server_name: &str,
        hard_expiry_grace: i64,
    ) -> Result<Vec<RegRecord>> {
        let key = store::reg_key(server_name);
        let data = store.hget_all(&key).await.map_err(|err| {
            error!(server_name = %server_name, error = %err, "发现服务失败");
            DiscoveryError::StoreRead(err.to_string())
        })?;

        let now = Utc::now().timestamp();
        let mut del_fields = Vec::new();
        let mut ret = Vec::with_capacity(data.len());
        for (field, text) in data {
            let reg: RegRecord = match serde_json::from_str(&text) {
                Ok(reg) => reg,
                Err(err) => {
                    warn!(server_name = %server_name, reg_data = %text, error = %err,
                        "发现服务, 注册记录无法解析");
                    del_fields.push(field);
                    continue;
                }
            };
            if now - reg.deadline >= hard_expiry_grace {
                warn!(server_name = %server_name, reg_data = %text, "发现服务, 注册记录已过期");
                del_fields.push(field);
                continue;
            }
            if reg.deadline < now {
                // 注册方已停止续期(可能已崩溃), 剔除出成员集
                continue;
            }
            ret.push(reg);
        }
        ret.sort_by_key(|reg| reg.seq_no);

        if !del_fields.is_empty() {
            if let Err(err) = store.hdel(&key, &del_fields).await {
                error!(server_name = %server_name, del_fields = ?del_fields, error = %err,
                    "发现服务, 删除无效注册记录失败");
            }
        }
        Ok(ret)
    }

    /// 信号分发循环: 单个任务消费所有已订阅服务的变更信号
    async fn dispatch_loop(services: ServiceMap, mut sub_rx: mpsc::UnboundedReceiver<SubscribeCmd>) {
        let mut streams: StreamMap<String, UnboundedReceiverStream<String>> = StreamMap::new();
        loop {
            tokio::select! {
                cmd = sub_rx.recv() => match cmd {
                    Some((server_name, rx)) => {
                        streams.insert(server_name, UnboundedReceiverStream::new(rx));
                    }
                    // 发现器已关闭
                    None => break,
                },
                Some((server_name, payload)) = streams.next() => {
                    Self::apply_signal(&services, &server_name, &payload).await;
                }
            }
        }
    }

    /// 应用一条注册信号, 幂等
    ///
    /// 重复添加同一序号、移除未知序号都是 no-op;
    /// 无法解析的信号直接丢弃, 不能影响其它服务的分发。
    async fn apply_signal(services: &ServiceMap, server_name: &str, payload: &str) {
        let signal: RegSignal = match serde_json::from_str(payload) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(server_name = %server_name, payload = %payload, error = %err,
                    "丢弃无法解析的注册信号");
                return;
            }
        };

        let entry = { services.read().await.get(server_name).cloned() };
        let Some(entry) = entry else { return };
        let mut entry = entry.lock().await;

        let changed = if signal.is_unregister {
            let before = entry.records.len();
            entry.records.retain(|reg| reg.seq_no != signal.reg.seq_no);
            entry.records.len() != before
        } else if entry
            .records
            .iter()
            .any(|reg| reg.seq_no == signal.reg.seq_no)
        {
            false
        } else {
            entry.records.push(signal.reg);
            entry.records.sort_by_key(|reg| reg.seq_no);
            true
        };

        entry.up_time = Utc::now().timestamp();
        if changed {
            entry.push_members();
        }
    }

    /// 重新发现循环: 周期性全量替换成员集, 兜底修复任何漂移
    async fn re_discover_loop(
        store: Arc<dyn KvStore>,
        services: ServiceMap,
        interval: u64,
        hard_expiry_grace: i64,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let snapshot: Vec<(String, Arc<Mutex<ServiceEntry>>)> = {
                let services = services.read().await;
                services
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.clone()))
                    .collect()
            };

            for (server_name, entry) in snapshot {
                // 刚被信号更新过的服务跳过, 避免冗余全量读取
                let now = Utc::now().timestamp();
                let up_time = entry.lock().await.up_time;
                if now - up_time < (interval / 2) as i64 {
                    continue;
                }

                // 单个服务失败不阻塞同一轮其它服务
                let records =
                    match Self::discover_one(&store, &server_name, hard_expiry_grace).await {
                        Ok(records) => records,
                        Err(err) => {
                            error!(server_name = %server_name, error = %err, "重新发现服务失败");
                            continue;
                        }
                    };

                let mut entry = entry.lock().await;
                entry.up_time = Utc::now().timestamp();
                if entry.records != records {
                    entry.records = records;
                    entry.push_members();
                }
            }
        }
    }
}

#[async_trait]
impl Discover for RedisDiscover {
    async fn resolve(&self, server_name: &str) -> Result<ResolverHandle> {
        // 发现是进程级的, 同名服务复用已有条目
        if let Some(entry) = self.services.read().await.get(server_name) {
            let rx = entry.lock().await.tx.subscribe();
            return Ok(ResolverHandle::new(server_name, rx));
        }

        // 先订阅再全量读取, 避免窗口期丢信号;
        // 解析失败时接收端直接丢弃, 订阅随之终止, 不会留下半初始化状态
        let sig_rx = self
            .store
            .subscribe(&store::signal_key(server_name))
            .await
            .map_err(|err| {
                error!(server_name = %server_name, error = %err, "订阅注册信号失败");
                DiscoveryError::StoreRead(err.to_string())
            })?;

        let records = Self::discover_one(&self.store, server_name, self.hard_expiry_grace).await?;
        if records.is_empty() {
            return Err(DiscoveryError::NotFound(server_name.to_string()));
        }

        let mut services = self.services.write().await;
        // 并发 resolve 竞争时只保留先到的条目
        if let Some(entry) = services.get(server_name) {
            let rx = entry.lock().await.tx.subscribe();
            return Ok(ResolverHandle::new(server_name, rx));
        }

        let membership = Membership::new(records.iter().map(RegRecord::addr_info).collect());
        let (tx, rx) = watch::channel(membership);
        let entry = ServiceEntry {
            records,
            up_time: Utc::now().timestamp(),
            tx,
        };
        services.insert(server_name.to_string(), Arc::new(Mutex::new(entry)));
        drop(services);

        // 分发循环退出后这里发送失败, 此时句柄仍可使用最后一次快照
        let _ = self.sub_tx.send((server_name.to_string(), sig_rx));

        info!(server_name = %server_name, "解析服务成功");
        Ok(ResolverHandle::new(server_name, rx))
    }

    fn close(&self) {
        if let Some(handle) = self.dispatch_handle.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.re_discover_handle.lock().unwrap().take() {
            handle.abort();
        }

        // 清空条目使 watch 发送端关闭, 阻塞在 changed() 上的句柄得以感知关闭;
        // 运行时已停止时跳过, 此时也不会再有等待者被调度
        let services = self.services.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                services.write().await.clear();
            });
        }
    }
}

impl Drop for RedisDiscover {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::AddrInfo;

    fn record(seq_no: i64, endpoint: &str, deadline: i64) -> RegRecord {
        RegRecord {
            seq_no,
            name: format!("svc.{seq_no}"),
            endpoint: endpoint.to_string(),
            weight: 100,
            deadline,
        }
    }

    async fn put_record(store: &Arc<dyn KvStore>, reg: &RegRecord) {
        store
            .hset(
                &store::reg_key("svc"),
                &store::reg_field(reg.seq_no),
                &serde_json::to_string(reg).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let discover = RedisDiscover::new(store.clone(), &DiscoverConfig::new("memory://")).unwrap();
        match discover.resolve("svc").await {
            Err(DiscoveryError::NotFound(name)) => assert_eq!(name, "svc"),
            other => panic!("期望 NotFound, 实际 {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_sorts_and_filters() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let now = Utc::now().timestamp();

        // 乱序写入 + 一条已过截止时间 + 一条超过硬删除阈值 + 一条坏数据
        put_record(&store, &record(3, "10.0.0.3:9000", now + 30)).await;
        put_record(&store, &record(1, "10.0.0.1:9000", now + 30)).await;
        put_record(&store, &record(2, "10.0.0.2:9000", now - 10)).await;
        put_record(&store, &record(4, "10.0.0.4:9000", now - 7200)).await;
        store
            .hset(&store::reg_key("svc"), "5", "not json")
            .await
            .unwrap();

        let discover = RedisDiscover::new(store.clone(), &DiscoverConfig::new("memory://")).unwrap();
        let handle = discover.resolve("svc").await.unwrap();

        let members = handle.members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].endpoint, "10.0.0.1:9000");
        assert_eq!(members[1].endpoint, "10.0.0.3:9000");

        // 坏数据与超过阈值的记录被顺手删除; 仅过期的记录保留在存储中
        let data = store.hget_all(&store::reg_key("svc")).await.unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.contains_key("2"));
        assert!(!data.contains_key("4"));
        assert!(!data.contains_key("5"));
    }

    #[tokio::test]
    async fn test_resolve_reuses_entry() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let now = Utc::now().timestamp();
        put_record(&store, &record(1, "10.0.0.1:9000", now + 30)).await;

        let discover = RedisDiscover::new(store.clone(), &DiscoverConfig::new("memory://")).unwrap();
        let h1 = discover.resolve("svc").await.unwrap();
        let h2 = discover.resolve("svc").await.unwrap();
        assert_eq!(h1.membership().version, h2.membership().version);
    }

    #[tokio::test]
    async fn test_signal_add_remove_idempotent() {
        let services: ServiceMap = Arc::new(RwLock::new(HashMap::new()));
        let now = Utc::now().timestamp();

        let (tx, rx) = watch::channel(Membership::new(vec![AddrInfo::new("10.0.0.1:9000")]));
        let entry = ServiceEntry {
            records: vec![record(1, "10.0.0.1:9000", now + 30)],
            up_time: now,
            tx,
        };
        services
            .write()
            .await
            .insert("svc".to_string(), Arc::new(Mutex::new(entry)));

        let add = serde_json::to_string(&RegSignal {
            reg: record(2, "10.0.0.2:9000", now + 30),
            is_unregister: false,
        })
        .unwrap();

        RedisDiscover::apply_signal(&services, "svc", &add).await;
        assert_eq!(rx.borrow().addrs.len(), 2);
        let v = rx.borrow().version;

        // 重复添加同一序号: 集合不变, 不推送新快照
        RedisDiscover::apply_signal(&services, "svc", &add).await;
        assert_eq!(rx.borrow().addrs.len(), 2);
        assert_eq!(rx.borrow().version, v);

        // 移除未知序号是 no-op
        let remove_unknown = serde_json::to_string(&RegSignal {
            reg: record(9, "10.0.0.9:9000", now + 30),
            is_unregister: true,
        })
        .unwrap();
        RedisDiscover::apply_signal(&services, "svc", &remove_unknown).await;
        assert_eq!(rx.borrow().addrs.len(), 2);

        // 正常移除
        let remove = serde_json::to_string(&RegSignal {
            reg: record(1, "10.0.0.1:9000", now + 30),
            is_unregister: true,
        })
        .unwrap();
        RedisDiscover::apply_signal(&services, "svc", &remove).await;
        let members: Vec<AddrInfo> = rx.borrow().addrs.as_ref().clone();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].endpoint, "10.0.0.2:9000");
    }

    #[tokio::test]
    async fn test_malformed_signal_discarded() {
        let services: ServiceMap = Arc::new(RwLock::new(HashMap::new()));
        let now = Utc::now().timestamp();
        let (tx, rx) = watch::channel(Membership::new(vec![AddrInfo::new("10.0.0.1:9000")]));
        let entry = ServiceEntry {
            records: vec![record(1, "10.0.0.1:9000", now + 30)],
            up_time: now,
            tx,
        };
        services
            .write()
            .await
            .insert("svc".to_string(), Arc::new(Mutex::new(entry)));

        RedisDiscover::apply_signal(&services, "svc", "garbage{{").await;
        assert_eq!(rx.borrow().addrs.len(), 1);

        // 未知服务名的信号同样被忽略
        RedisDiscover::apply_signal(&services, "other", "garbage{{").await;
    }

    #[tokio::test]
    async fn test_invalid_conf_rejected() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut conf = DiscoverConfig::new("memory://");
        conf.re_discover_interval = 0;
        assert!(RedisDiscover::new(store, &conf).is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_handles() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let now = Utc::now().timestamp();
        put_record(&store, &record(1, "10.0.0.1:9000", now + 30)).await;

        let discover = RedisDiscover::new(store, &DiscoverConfig::new("memory://")).unwrap();
        let mut handle = discover.resolve("svc").await.unwrap();

        // close 后不能让等待者悬挂, changed 必须返回 false
        discover.close();
        let closed = tokio::time::timeout(Duration::from_secs(5), handle.changed())
            .await
            .expect("等待关闭通知超时");
        assert!(!closed);
    }
}

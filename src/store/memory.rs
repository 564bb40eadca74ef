//! 内存存储实现
//!
//! 与 redis 实现语义一致的进程内存储, 供测试与单进程部署使用。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{KvStore, StoreResult};

#[derive(Default)]
struct Inner {
    counters: HashMap<String, i64>,
    hashes: HashMap<String, HashMap<String, String>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(hash) = inner.hashes.get_mut(key) {
            for field in fields {
                hash.remove(field);
            }
        }
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(senders) = inner.subscribers.get_mut(channel) {
            // 同时清理已经关闭的订阅
            senders.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("seq:svc").await.unwrap(), 1);
        assert_eq!(store.incr("seq:svc").await.unwrap(), 2);
        assert_eq!(store.incr("seq:other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_ops() {
        let store = MemoryStore::new();
        store.hset("reg:svc", "1", "a").await.unwrap();
        store.hset("reg:svc", "2", "b").await.unwrap();

        let all = store.hget_all("reg:svc").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["1"], "a");

        store.hdel("reg:svc", &["1".to_string()]).await.unwrap();
        let all = store.hget_all("reg:svc").await.unwrap();
        assert_eq!(all.len(), 1);

        // 删除不存在的字段是 no-op
        store.hdel("reg:svc", &["9".to_string()]).await.unwrap();
        store.hdel("reg:none", &["1".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_pub_sub() {
        let store = MemoryStore::new();
        let mut rx1 = store.subscribe("signal:svc").await.unwrap();
        let mut rx2 = store.subscribe("signal:svc").await.unwrap();

        store.publish("signal:svc", "hello").await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");

        // 丢弃一个订阅后发布仍然成功
        drop(rx1);
        store.publish("signal:svc", "again").await.unwrap();
        assert_eq!(rx2.recv().await.unwrap(), "again");
    }
}

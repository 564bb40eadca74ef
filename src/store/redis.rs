//! redis 存储实现

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::warn;

use super::{KvStore, StoreError, StoreResult};

/// 订阅连接断开后的重连间隔
const RESUBSCRIBE_RETRY: Duration = Duration::from_secs(1);

/// redis 存储
///
/// 普通命令复用一个 `ConnectionManager`; 每个订阅通道使用一条独立的
/// pub/sub 连接, 由后台任务把消息转发到 mpsc 通道。
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// 连接 redis, 如 "redis://127.0.0.1:6379"
    ///
    /// 连接失败会直接返回错误, 不会产生半初始化的实例。
    pub async fn connect(url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(url.as_ref())
            .map_err(|err| StoreError(format!("打开 redis 客户端失败: {err}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| StoreError(format!("连接 redis 失败: {err}")))?;
        Ok(Self { client, conn })
    }

    /// 建立一条 pub/sub 连接并订阅通道
    async fn open_pubsub(client: &redis::Client, channel: &str) -> StoreResult<redis::aio::PubSub> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|err| StoreError(format!("创建 pub/sub 连接失败: {err}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|err| StoreError(format!("订阅通道失败: {err}")))?;
        Ok(pubsub)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(key, 1)
            .await
            .map_err(|err| StoreError(err.to_string()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|err| StoreError(err.to_string()))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, fields.to_vec())
            .await
            .map_err(|err| StoreError(err.to_string()))
    }

    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall::<_, HashMap<String, String>>(key)
            .await
            .map_err(|err| StoreError(err.to_string()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, i64>(channel, payload)
            .await
            .map(|_receivers| ())
            .map_err(|err| StoreError(err.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<mpsc::UnboundedReceiver<String>> {
        let mut pubsub = Self::open_pubsub(&self.client, channel).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                {
                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(channel = %channel, error = %err, "读取订阅消息失败");
                                continue;
                            }
                        };
                        // 接收端被丢弃后结束转发
                        if tx.send(payload).is_err() {
                            return;
                        }
                    }
                }

                // 消息流结束说明 pub/sub 连接已断开, 重连并重新订阅,
                // 订阅不能停: 断开期间漏掉的信号由重新发现兜底
                warn!(channel = %channel, "订阅连接断开, 重连中");
                loop {
                    if tx.is_closed() {
                        return;
                    }
                    match Self::open_pubsub(&client, &channel).await {
                        Ok(next) => {
                            pubsub = next;
                            break;
                        }
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "重连订阅失败");
                            tokio::time::sleep(RESUBSCRIBE_RETRY).await;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

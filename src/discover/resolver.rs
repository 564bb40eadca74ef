//! 成员快照的分发句柄

use tokio::sync::watch;

use crate::types::{AddrInfo, Membership};

/// 解析句柄
///
/// 对一个服务名当前成员集的只读视图: 可以随时拉取快照,
/// 也可以等待成员变更推送(供连接池消费者主动开关连接, 而不是轮询)。
/// 克隆后各自独立接收变更通知。
#[derive(Debug, Clone)]
pub struct ResolverHandle {
    server_name: String,
    rx: watch::Receiver<Membership>,
}

impl ResolverHandle {
    pub(crate) fn new(server_name: impl Into<String>, rx: watch::Receiver<Membership>) -> Self {
        Self {
            server_name: server_name.into(),
            rx,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// 当前成员快照, 供均衡器每次调用时取用; 不持锁跨调用
    pub fn membership(&self) -> Membership {
        self.rx.borrow().clone()
    }

    /// 当前成员地址列表
    pub fn members(&self) -> Vec<AddrInfo> {
        self.rx.borrow().addrs.as_ref().clone()
    }

    /// 等待下一次成员变更
    ///
    /// 返回 false 表示发现器已关闭, 不会再有更新。
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

//! 服务地址与注册记录定义

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DiscoveryError, Result};

/// addr 字符串的 scheme
pub const SCHEME: &str = "grpc";
/// 默认权重
pub const DEF_WEIGHT: u16 = 100;

const NAME_FIELD: &str = "name";
const WEIGHT_FIELD: &str = "weight";

/// 服务地址信息
///
/// 一个实例对外公布的地址与权重, 构造后不可变。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddrInfo {
    /// 名称, 用于直接指定目标
    pub name: String,

    /// 端点, 如 "10.0.0.1:9000"
    pub endpoint: String,

    /// 权重, 用于负载均衡
    pub weight: u16,
}

impl AddrInfo {
    /// 创建地址信息, 权重默认为 100
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            endpoint: endpoint.into(),
            weight: DEF_WEIGHT,
        }
    }

    /// 设置名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: u16) -> Self {
        self.weight = weight;
        self
    }
}

/// 解析 addr 字符串, 示例: grpc://localhost:3000?weight=100&name=service1
///
/// scheme 可省略; name 缺省为端点本身; weight 缺省为 100。
pub fn parse_addr(addr: &str) -> Result<AddrInfo> {
    let text = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("{SCHEME}://{addr}")
    };

    let u = Url::parse(&text)
        .map_err(|err| DiscoveryError::InvalidAddr(format!("addr解析失败: {err}")))?;
    if u.scheme() != SCHEME {
        return Err(DiscoveryError::InvalidAddr(format!(
            "不支持的scheme: {}",
            u.scheme()
        )));
    }
    let host = u
        .host_str()
        .ok_or_else(|| DiscoveryError::InvalidAddr("endpoint为空".to_string()))?;
    if !u.path().is_empty() && u.path() != "/" {
        return Err(DiscoveryError::InvalidAddr(format!(
            "不应该存在path: {}",
            u.path()
        )));
    }

    let endpoint = match u.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut name = String::new();
    let mut weight = DEF_WEIGHT;
    for (k, v) in u.query_pairs() {
        match k.as_ref() {
            NAME_FIELD => name = v.to_string(),
            WEIGHT_FIELD => {
                weight = v
                    .parse::<u16>()
                    .map_err(|err| DiscoveryError::InvalidAddr(format!("weight无法解析: {err}")))?;
            }
            _ => {}
        }
    }
    if name.is_empty() {
        name = endpoint.clone();
    }

    Ok(AddrInfo {
        name,
        endpoint,
        weight,
    })
}

/// 注册记录
///
/// 存储在 `reg:<serverName>` 哈希表中的一条实例记录, 字段名与线上格式保持一致。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegRecord {
    /// 序列号, 同名服务内单调递增, 同时作为去重与排序键
    #[serde(rename = "SeqNo")]
    pub seq_no: i64,

    /// 名称, 形如 "<serverName>.<SeqNo>"
    #[serde(rename = "Name")]
    pub name: String,

    /// 端点
    #[serde(rename = "Endpoint")]
    pub endpoint: String,

    /// 权重
    #[serde(rename = "Weight")]
    pub weight: u16,

    /// 截止时间, 秒级时间戳; 由注册方周期性刷新
    #[serde(rename = "Deadline")]
    pub deadline: i64,
}

impl RegRecord {
    /// 转换为地址信息
    pub fn addr_info(&self) -> AddrInfo {
        AddrInfo {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            weight: self.weight,
        }
    }
}

/// 注册信号
///
/// 在 `signal:<serverName>` 通道上发布的变更消息, 至少一次投递, 消费方需要幂等。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegSignal {
    /// 变更的注册记录
    #[serde(rename = "Reg")]
    pub reg: RegRecord,

    /// 是否为取消注册
    #[serde(rename = "IsUnregister")]
    pub is_unregister: bool,
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// 成员快照
///
/// 发现层交给均衡器的不可变快照; `version` 全局唯一,
/// 均衡器以它判断内部缓存(前缀和/哈希环)是否需要重建。
#[derive(Debug, Clone)]
pub struct Membership {
    /// 快照版本
    pub version: u64,
    /// 按 SeqNo 升序排列的地址列表
    pub addrs: Arc<Vec<AddrInfo>>,
}

impl Membership {
    /// 从地址列表创建快照, 分配新的版本号
    pub fn new(addrs: Vec<AddrInfo>) -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            addrs: Arc::new(addrs),
        }
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

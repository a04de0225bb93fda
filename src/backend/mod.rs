//! 注册/配置中心后端抽象和实现
//!
//! 后端封装了与远端的全部协议细节（连接管理、watch 传输、长轮询），
//! 上层的 [`ServiceAgent`](crate::registry::ServiceAgent) 和
//! [`ConfigCenter`](crate::config_center::ConfigCenter) 只依赖这里的 trait。

pub mod etcd;
pub mod http;

#[cfg(test)]
pub(crate) mod mock;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{BackendKind, ClientConfig};
use crate::error::Result;
use crate::types::ServiceInstance;

pub use etcd::EtcdBackend;
pub use http::HttpBackend;

/// 注册/配置中心后端 trait
///
/// 注意：需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait Backend: Send + Sync {
    // ===== 服务注册与发现 =====

    /// 注册服务实例
    async fn register_instance(&self, instance: &ServiceInstance) -> Result<()>;

    /// 注销服务实例
    async fn deregister_instance(&self, instance: &ServiceInstance) -> Result<()>;

    /// 发送心跳
    ///
    /// 返回值为后端下发的下一次心跳间隔（如果协议支持下发）：
    /// - **HTTP**: 应答中的 `clientBeatInterval`（毫秒）
    /// - **etcd**: lease keep-alive 应答的 TTL 的 1/3
    ///
    /// 返回 `Ok(None)` 表示后端不下发间隔，调用方沿用当前间隔。
    async fn heartbeat(&self, instance: &ServiceInstance) -> Result<Option<Duration>>;

    /// 列出服务的全部实例
    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;

    /// 监听服务实例变化
    ///
    /// 每次变化推送一份完整的实例快照。etcd 后端使用原生 watch，
    /// HTTP 后端退化为轮询。
    async fn watch_instances(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>>;

    // ===== 配置中心 =====

    /// 拉取配置内容，不存在时返回 `Ok(None)`
    async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>>;

    /// 发布配置内容
    async fn publish_config(&self, data_id: &str, group: &str, content: &str) -> Result<()>;

    /// 删除配置
    async fn remove_config(&self, data_id: &str, group: &str) -> Result<()>;

    /// 监听配置变化
    ///
    /// 每次变化推送完整的原始文本内容。
    async fn watch_config(&self, data_id: &str, group: &str) -> Result<mpsc::Receiver<String>>;
}

/// 根据客户端设置创建后端实例
pub async fn create_backend(config: &ClientConfig) -> Result<Arc<dyn Backend>> {
    match config.backend {
        BackendKind::Etcd => {
            let backend = EtcdBackend::new(config).await?;
            Ok(Arc::new(backend))
        }
        BackendKind::Http => {
            let backend = HttpBackend::new(config)?;
            Ok(Arc::new(backend))
        }
    }
}

/// 解析实例 JSON 值
///
/// 后端存储的实例统一为 JSON，解析失败的脏数据跳过并告警。
pub(crate) fn parse_instances(values: impl Iterator<Item = Vec<u8>>) -> Vec<ServiceInstance> {
    let mut instances = Vec::new();
    for value in values {
        match serde_json::from_slice::<ServiceInstance>(&value) {
            Ok(instance) => instances.push(instance),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparsable instance record");
            }
        }
    }
    instances
}

/// 把元数据序列化为 query 参数形式
pub(crate) fn metadata_to_json(metadata: &HashMap<String, String>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

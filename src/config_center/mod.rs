//! 配置中心访问模块
//!
//! [`ConfigCenter`] 持有一对 `(data_id, group)`，在本地维护解析后的配置文档：
//! 构造时拉取一次全量内容，此后通过后端 watch 推送自动刷新。
//! 读取始终命中本地存储，刷新通过写锁整体替换，读者看到的要么是旧文档
//! 要么是新文档，不会读到解析到一半的状态。

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::{Backend, create_backend};
use crate::config::ClientConfig;
use crate::error::Result;

pub use store::{ConfigStore, DEFAULT_SECTION};

/// 默认配置分组
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// 配置中心访问器
///
/// 每个实例跟踪一份远端配置文档，后台 watch 任务随实例存活，drop 时终止。
pub struct ConfigCenter {
    data_id: String,
    group: String,
    backend: Arc<dyn Backend>,
    store: Arc<RwLock<ConfigStore>>,
    watch_handle: Option<JoinHandle<()>>,
}

impl ConfigCenter {
    /// 连接配置中心并开始跟踪 `(data_id, group)`
    ///
    /// 自行创建后端连接；复用已有后端时用 [`ConfigCenter::new`]。
    pub async fn connect(config: &ClientConfig, data_id: &str, group: &str) -> Result<Self> {
        let backend = create_backend(config).await?;
        Self::new(backend, data_id, group).await
    }

    /// 使用已有后端开始跟踪 `(data_id, group)`
    pub async fn new(backend: Arc<dyn Backend>, data_id: &str, group: &str) -> Result<Self> {
        // 启动时加载一次全量配置
        let initial = match backend.get_config(data_id, group).await? {
            Some(content) => match ConfigStore::parse(&content) {
                Ok(store) => store,
                Err(e) => {
                    warn!(data_id, group, error = %e, "Initial config unparsable, starting empty");
                    ConfigStore::default()
                }
            },
            None => {
                warn!(data_id, group, "Config not found on startup, starting empty");
                ConfigStore::default()
            }
        };

        let store = Arc::new(RwLock::new(initial));
        let mut rx = backend.watch_config(data_id, group).await?;

        let watch_store = store.clone();
        let watch_data_id = data_id.to_string();
        let watch_group = group.to_string();
        let watch_handle = tokio::spawn(async move {
            while let Some(content) = rx.recv().await {
                match ConfigStore::parse(&content) {
                    Ok(parsed) => {
                        let mut guard = watch_store.write().await;
                        *guard = parsed;
                        drop(guard);
                        info!(
                            data_id = %watch_data_id,
                            group = %watch_group,
                            bytes = content.len(),
                            "🔄 Config refreshed"
                        );
                    }
                    Err(e) => {
                        // 解析失败保留旧文档
                        warn!(
                            data_id = %watch_data_id,
                            group = %watch_group,
                            error = %e,
                            "Ignoring unparsable config update"
                        );
                    }
                }
            }
        });

        Ok(Self {
            data_id: data_id.to_string(),
            group: group.to_string(),
            backend,
            store,
            watch_handle: Some(watch_handle),
        })
    }

    /// 跟踪默认分组下的 `data_id`
    pub async fn new_default_group(backend: Arc<dyn Backend>, data_id: &str) -> Result<Self> {
        Self::new(backend, data_id, DEFAULT_GROUP).await
    }

    /// 读取默认小节下的键
    pub async fn get(&self, key: &str) -> Option<String> {
        self.get_from(DEFAULT_SECTION, key).await
    }

    /// 读取指定小节下的键
    pub async fn get_from(&self, section: &str, key: &str) -> Option<String> {
        let store = self.store.read().await;
        store.get(section, key).map(str::to_string)
    }

    /// 读取默认小节下的键并解析为目标类型
    ///
    /// 键不存在或解析失败都返回 `None`。
    pub async fn get_as<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).await.and_then(|v| v.parse().ok())
    }

    /// 返回整个小节的键值对副本
    pub async fn section(&self, name: &str) -> Option<HashMap<String, String>> {
        let store = self.store.read().await;
        store.section(name).cloned()
    }

    /// 发布新的配置内容
    ///
    /// 写入远端后由 watch 推送刷新本地存储。
    pub async fn publish(&self, content: &str) -> Result<()> {
        self.backend
            .publish_config(&self.data_id, &self.group, content)
            .await
    }

    /// 删除远端配置
    pub async fn remove(&self) -> Result<()> {
        self.backend.remove_config(&self.data_id, &self.group).await
    }

    /// 配置的 data_id
    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    /// 配置的分组
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Drop for ConfigCenter {
    fn drop(&mut self) {
        if let Some(handle) = self.watch_handle.take() {
            handle.abort();
        }
    }
}

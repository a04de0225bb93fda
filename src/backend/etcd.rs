//! etcd 后端实现
//!
//! 实例以带 lease 的 JSON 键值存储，心跳即 lease keep-alive；
//! watch 使用 etcd 原生前缀监听，配置文档存为普通键值。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::{Backend, parse_instances};
use crate::config::ClientConfig;
use crate::error::{BeaconError, Result};
use crate::types::ServiceInstance;

/// etcd 注册/配置中心后端
pub struct EtcdBackend {
    client: Client,
    namespace: String,
    ttl: u64,
    // instance_id -> lease_id，心跳续期和注销时使用
    leases: Arc<RwLock<HashMap<String, i64>>>,
}

impl EtcdBackend {
    /// 连接 etcd 并创建后端
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(BeaconError::settings("etcd endpoints not configured"));
        }

        let options = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some(ConnectOptions::new().with_user(user, pass)),
            _ => None,
        };

        let client = Client::connect(&config.endpoints, options).await?;

        Ok(Self {
            client,
            namespace: config.namespace.clone(),
            ttl: config.ttl,
            leases: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn instance_key(&self, service_name: &str, instance_id: &str) -> String {
        format!("{}/services/{}/{}", self.namespace, service_name, instance_id)
    }

    fn service_prefix(&self, service_name: &str) -> String {
        format!("{}/services/{}/", self.namespace, service_name)
    }

    fn config_key(&self, data_id: &str, group: &str) -> String {
        format!("{}/config/{}/{}", self.namespace, group, data_id)
    }

    /// 授予 lease 并写入实例键
    async fn put_with_lease(&self, instance: &ServiceInstance) -> Result<i64> {
        let mut client = self.client.clone();

        let lease = client.lease_grant(self.ttl as i64, None).await?;
        let lease_id = lease.id();

        let key = self.instance_key(&instance.service_name, &instance.instance_id);
        let value = serde_json::to_vec(instance)?;
        let opts = PutOptions::new().with_lease(lease_id);
        client.put(key, value, Some(opts)).await?;

        Ok(lease_id)
    }

    /// 列出前缀下的全部实例
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ServiceInstance>> {
        let mut client = self.client.clone();
        let opts = GetOptions::new().with_prefix();
        let resp = client.get(prefix, Some(opts)).await?;
        Ok(parse_instances(resp.kvs().iter().map(|kv| kv.value().to_vec())))
    }
}

#[async_trait]
impl Backend for EtcdBackend {
    async fn register_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let lease_id = self.put_with_lease(instance).await?;

        let mut leases = self.leases.write().await;
        leases.insert(instance.instance_id.clone(), lease_id);

        info!(
            service = %instance.service_name,
            instance_id = %instance.instance_id,
            address = %instance.to_http_url(),
            lease_id,
            "✅ Instance registered with etcd"
        );

        Ok(())
    }

    async fn deregister_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let mut client = self.client.clone();

        let key = self.instance_key(&instance.service_name, &instance.instance_id);
        client.delete(key, None).await?;

        let lease_id = {
            let mut leases = self.leases.write().await;
            leases.remove(&instance.instance_id)
        };
        if let Some(lease_id) = lease_id {
            // lease 失效即可，revoke 失败不影响注销结果
            if let Err(e) = client.lease_revoke(lease_id).await {
                debug!(lease_id, error = %e, "Lease revoke failed during deregister");
            }
        }

        info!(
            service = %instance.service_name,
            instance_id = %instance.instance_id,
            "Instance deregistered from etcd"
        );

        Ok(())
    }

    async fn heartbeat(&self, instance: &ServiceInstance) -> Result<Option<Duration>> {
        let lease_id = {
            let leases = self.leases.read().await;
            leases.get(&instance.instance_id).copied()
        };

        let Some(lease_id) = lease_id else {
            // 实例尚未经由本后端注册，补一次注册
            self.register_instance(instance).await?;
            return Ok(Some(Duration::from_secs((self.ttl / 3).max(1))));
        };

        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
        keeper.keep_alive().await?;

        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => {
                debug!(lease_id, ttl = resp.ttl(), "💓 Lease keep-alive ok");
                Ok(Some(Duration::from_secs((resp.ttl() as u64 / 3).max(1))))
            }
            _ => {
                // lease 已过期，重新注册拿一个新 lease
                warn!(
                    instance_id = %instance.instance_id,
                    lease_id,
                    "Lease expired, re-registering instance"
                );
                self.register_instance(instance).await?;
                Ok(Some(Duration::from_secs((self.ttl / 3).max(1))))
            }
        }
    }

    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        self.list_prefix(&self.service_prefix(service_name)).await
    }

    async fn watch_instances(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>> {
        let (tx, rx) = mpsc::channel(16);
        let prefix = self.service_prefix(service_name);
        let mut client = self.client.clone();
        let service = service_name.to_string();

        let opts = WatchOptions::new().with_prefix();
        let (watcher, mut stream) = client.watch(prefix.clone(), Some(opts)).await?;

        tokio::spawn(async move {
            // watcher 随任务存活，drop 即取消监听
            let _watcher = watcher;
            while let Ok(Some(resp)) = stream.message().await {
                if resp.events().is_empty() {
                    continue;
                }
                // 任意事件后重新拉取全量快照，保证推送的实例集完整
                let opts = GetOptions::new().with_prefix();
                match client.get(prefix.clone(), Some(opts)).await {
                    Ok(list) => {
                        let instances =
                            parse_instances(list.kvs().iter().map(|kv| kv.value().to_vec()));
                        if tx.send(instances).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(service = %service, error = %e, "Failed to re-list instances after watch event");
                    }
                }
            }
            debug!(service = %service, "Instance watch stream closed");
        });

        Ok(rx)
    }

    async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let resp = client.get(self.config_key(data_id, group), None).await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.value()).to_string()))
    }

    async fn publish_config(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .put(self.config_key(data_id, group), content, None)
            .await?;
        info!(data_id, group, "Config published to etcd");
        Ok(())
    }

    async fn remove_config(&self, data_id: &str, group: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(self.config_key(data_id, group), None).await?;
        info!(data_id, group, "Config removed from etcd");
        Ok(())
    }

    async fn watch_config(&self, data_id: &str, group: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(16);
        let key = self.config_key(data_id, group);
        let mut client = self.client.clone();
        let data_id = data_id.to_string();

        let (watcher, mut stream) = client.watch(key, None).await?;

        tokio::spawn(async move {
            let _watcher = watcher;
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    // 配置被删除时推送空内容
                    let content = if event.event_type() == EventType::Delete {
                        Some(String::new())
                    } else {
                        event
                            .kv()
                            .map(|kv| String::from_utf8_lossy(kv.value()).to_string())
                    };
                    if let Some(content) = content {
                        if tx.send(content).await.is_err() {
                            return;
                        }
                    }
                }
            }
            debug!(data_id = %data_id, "Config watch stream closed");
        });

        Ok(rx)
    }
}

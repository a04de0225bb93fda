//! 测试用内存后端
//!
//! 单元测试里代替真实 etcd/HTTP 后端，可手动驱动 watch 推送。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::Backend;
use crate::error::{BeaconError, Result};
use crate::types::ServiceInstance;

#[derive(Default)]
pub(crate) struct MockBackend {
    pub registered: Mutex<Vec<ServiceInstance>>,
    pub deregistered: Mutex<Vec<String>>,
    pub beats: AtomicUsize,
    pub fail_heartbeat: AtomicBool,
    beat_interval: Mutex<Option<Duration>>,
    instances: Mutex<HashMap<String, Vec<ServiceInstance>>>,
    configs: Mutex<HashMap<(String, String), String>>,
    config_watchers: Mutex<Vec<mpsc::Sender<String>>>,
    instance_watchers: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<ServiceInstance>>>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_config(&self, data_id: &str, group: &str, content: &str) {
        let mut configs = self.configs.lock().await;
        configs.insert((data_id.to_string(), group.to_string()), content.to_string());
    }

    /// 向所有配置监听者推送一条变更
    pub async fn push_config(&self, content: &str) {
        let watchers = self.config_watchers.lock().await;
        for tx in watchers.iter() {
            let _ = tx.send(content.to_string()).await;
        }
    }

    pub async fn set_instances(&self, service: &str, list: Vec<ServiceInstance>) {
        let mut instances = self.instances.lock().await;
        instances.insert(service.to_string(), list);
    }

    /// 更新实例集并推送给该服务的监听者
    pub async fn push_instances(&self, service: &str, list: Vec<ServiceInstance>) {
        self.set_instances(service, list.clone()).await;
        let watchers = self.instance_watchers.lock().await;
        if let Some(txs) = watchers.get(service) {
            for tx in txs {
                let _ = tx.send(list.clone()).await;
            }
        }
    }

    pub async fn set_beat_interval(&self, interval: Option<Duration>) {
        let mut guard = self.beat_interval.lock().await;
        *guard = interval;
    }

    pub fn beat_count(&self) -> usize {
        self.beats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn register_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let mut registered = self.registered.lock().await;
        registered.push(instance.clone());

        let mut instances = self.instances.lock().await;
        instances
            .entry(instance.service_name.clone())
            .or_default()
            .push(instance.clone());
        Ok(())
    }

    async fn deregister_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let mut deregistered = self.deregistered.lock().await;
        deregistered.push(instance.instance_id.clone());

        let mut instances = self.instances.lock().await;
        if let Some(list) = instances.get_mut(&instance.service_name) {
            list.retain(|i| i.instance_id != instance.instance_id);
        }
        Ok(())
    }

    async fn heartbeat(&self, _instance: &ServiceInstance) -> Result<Option<Duration>> {
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(BeaconError::registry("mock heartbeat failure"));
        }
        self.beats.fetch_add(1, Ordering::SeqCst);
        let guard = self.beat_interval.lock().await;
        Ok(*guard)
    }

    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let instances = self.instances.lock().await;
        Ok(instances.get(service_name).cloned().unwrap_or_default())
    }

    async fn watch_instances(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>> {
        let (tx, rx) = mpsc::channel(16);
        let mut watchers = self.instance_watchers.lock().await;
        watchers.entry(service_name.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        let configs = self.configs.lock().await;
        Ok(configs.get(&(data_id.to_string(), group.to_string())).cloned())
    }

    async fn publish_config(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        self.set_config(data_id, group, content).await;
        self.push_config(content).await;
        Ok(())
    }

    async fn remove_config(&self, data_id: &str, group: &str) -> Result<()> {
        let mut configs = self.configs.lock().await;
        configs.remove(&(data_id.to_string(), group.to_string()));
        drop(configs);
        self.push_config("").await;
        Ok(())
    }

    async fn watch_config(&self, _data_id: &str, _group: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(16);
        let mut watchers = self.config_watchers.lock().await;
        watchers.push(tx);
        Ok(rx)
    }
}

//! HTTP 后端实现
//!
//! 通过注册中心的 open-api 完成实例注册、心跳与配置读写。
//! open-api 没有推送通道，watch 退化为周期轮询，仅在内容变化时向上层推送。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Backend, metadata_to_json};
use crate::config::ClientConfig;
use crate::error::{BeaconError, Result};
use crate::types::ServiceInstance;

/// HTTP 注册/配置中心后端
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    poll_interval: Duration,
    auth: Option<(String, String)>,
}

/// 心跳应答
///
/// `clientBeatInterval` 为服务端下发的下一次心跳间隔（毫秒）。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeatResponse {
    client_beat_interval: Option<u64>,
}

/// 心跳请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeatPayload<'a> {
    service_name: &'a str,
    ip: &'a str,
    port: u16,
    cluster: Option<&'a str>,
    weight: f64,
    metadata: &'a HashMap<String, String>,
    /// 客户端发出心跳的毫秒时间戳
    timestamp: i64,
}

/// 实例列表应答
#[derive(Debug, Deserialize)]
struct InstanceListResponse {
    hosts: Vec<InstancePayload>,
}

/// 实例在 open-api 里的形态
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstancePayload {
    #[serde(default)]
    instance_id: Option<String>,
    ip: String,
    port: u16,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default = "default_true")]
    healthy: bool,
    #[serde(default = "default_true")]
    ephemeral: bool,
    #[serde(default)]
    cluster_name: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl InstancePayload {
    fn into_instance(self, service_name: &str) -> ServiceInstance {
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| format!("{}#{}#{}", self.ip, self.port, service_name));
        ServiceInstance {
            service_name: service_name.to_string(),
            instance_id,
            ip: self.ip,
            port: self.port,
            cluster: self.cluster_name,
            weight: self.weight,
            healthy: self.healthy,
            ephemeral: self.ephemeral,
            metadata: self.metadata,
        }
    }
}

impl HttpBackend {
    /// 创建 HTTP 后端
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config
            .endpoints
            .first()
            .ok_or_else(|| BeaconError::settings("no http endpoint provided"))?
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        let auth = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            base_url,
            namespace: config.namespace.clone(),
            poll_interval: Duration::from_secs(config.poll_interval.max(1)),
            auth,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some((user, pass)) = &self.auth {
            builder = builder.basic_auth(user, Some(pass.as_str()));
        }
        builder
    }

    async fn fetch_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let resp = self
            .request(reqwest::Method::GET, "/v1/ns/instance/list")
            .query(&[
                ("namespaceId", self.namespace.as_str()),
                ("serviceName", service_name),
            ])
            .send()
            .await?
            .error_for_status()?;

        let list: InstanceListResponse = resp.json().await?;
        Ok(list
            .hosts
            .into_iter()
            .map(|payload| payload.into_instance(service_name))
            .collect())
    }

    async fn fetch_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        let resp = self
            .request(reqwest::Method::GET, "/v1/cs/configs")
            .query(&[
                ("tenant", self.namespace.as_str()),
                ("dataId", data_id),
                ("group", group),
            ])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.text().await?))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let port = instance.port.to_string();
        let weight = instance.weight.to_string();
        let healthy = instance.healthy.to_string();
        let ephemeral = instance.ephemeral.to_string();
        let metadata = metadata_to_json(&instance.metadata);

        let mut params = vec![
            ("namespaceId", self.namespace.as_str()),
            ("serviceName", instance.service_name.as_str()),
            ("instanceId", instance.instance_id.as_str()),
            ("ip", instance.ip.as_str()),
            ("port", port.as_str()),
            ("weight", weight.as_str()),
            ("healthy", healthy.as_str()),
            ("ephemeral", ephemeral.as_str()),
            ("metadata", metadata.as_str()),
        ];
        if let Some(cluster) = &instance.cluster {
            params.push(("clusterName", cluster.as_str()));
        }

        self.request(reqwest::Method::POST, "/v1/ns/instance")
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        info!(
            service = %instance.service_name,
            instance_id = %instance.instance_id,
            address = %instance.to_http_url(),
            "✅ Instance registered"
        );

        Ok(())
    }

    async fn deregister_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let port = instance.port.to_string();
        let ephemeral = instance.ephemeral.to_string();

        let mut params = vec![
            ("namespaceId", self.namespace.as_str()),
            ("serviceName", instance.service_name.as_str()),
            ("ip", instance.ip.as_str()),
            ("port", port.as_str()),
            ("ephemeral", ephemeral.as_str()),
        ];
        if let Some(cluster) = &instance.cluster {
            params.push(("clusterName", cluster.as_str()));
        }

        self.request(reqwest::Method::DELETE, "/v1/ns/instance")
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        info!(
            service = %instance.service_name,
            instance_id = %instance.instance_id,
            "Instance deregistered"
        );

        Ok(())
    }

    async fn heartbeat(&self, instance: &ServiceInstance) -> Result<Option<Duration>> {
        let payload = BeatPayload {
            service_name: &instance.service_name,
            ip: &instance.ip,
            port: instance.port,
            cluster: instance.cluster.as_deref(),
            weight: instance.weight,
            metadata: &instance.metadata,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let resp = self
            .request(reqwest::Method::PUT, "/v1/ns/instance/beat")
            .query(&[
                ("namespaceId", self.namespace.as_str()),
                ("serviceName", instance.service_name.as_str()),
            ])
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let beat: BeatResponse = resp.json().await?;
        debug!(
            service = %instance.service_name,
            interval_ms = ?beat.client_beat_interval,
            "💓 Heartbeat sent"
        );

        Ok(beat.client_beat_interval.map(Duration::from_millis))
    }

    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        self.fetch_instances(service_name).await
    }

    async fn watch_instances(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>> {
        let (tx, rx) = mpsc::channel(16);
        let backend = self.clone_for_task();
        let service = service_name.to_string();

        tokio::spawn(async move {
            let mut last: Option<Vec<ServiceInstance>> = None;
            let mut timer = tokio::time::interval(backend.poll_interval);
            // 第一个 tick 立即返回，轮询从当下开始
            loop {
                timer.tick().await;
                match backend.fetch_instances(&service).await {
                    Ok(instances) => {
                        if last.as_ref() != Some(&instances) {
                            last = Some(instances.clone());
                            if tx.send(instances).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(service = %service, error = %e, "Failed to poll service instances");
                    }
                }
            }
            debug!(service = %service, "Instance poll task stopped");
        });

        Ok(rx)
    }

    async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        self.fetch_config(data_id, group).await
    }

    async fn publish_config(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        self.request(reqwest::Method::POST, "/v1/cs/configs")
            .form(&[
                ("tenant", self.namespace.as_str()),
                ("dataId", data_id),
                ("group", group),
                ("content", content),
            ])
            .send()
            .await?
            .error_for_status()?;

        info!(data_id, group, "Config published");
        Ok(())
    }

    async fn remove_config(&self, data_id: &str, group: &str) -> Result<()> {
        self.request(reqwest::Method::DELETE, "/v1/cs/configs")
            .query(&[
                ("tenant", self.namespace.as_str()),
                ("dataId", data_id),
                ("group", group),
            ])
            .send()
            .await?
            .error_for_status()?;

        info!(data_id, group, "Config removed");
        Ok(())
    }

    async fn watch_config(&self, data_id: &str, group: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(16);
        let backend = self.clone_for_task();
        let data_id = data_id.to_string();
        let group = group.to_string();

        tokio::spawn(async move {
            let mut last: Option<String> = None;
            let mut timer = tokio::time::interval(backend.poll_interval);
            loop {
                timer.tick().await;
                match backend.fetch_config(&data_id, &group).await {
                    Ok(content) => {
                        // 配置被删除时推送空内容
                        let content = content.unwrap_or_default();
                        if last.as_deref() != Some(content.as_str()) {
                            last = Some(content.clone());
                            if tx.send(content).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(data_id = %data_id, group = %group, error = %e, "Failed to poll config");
                    }
                }
            }
            debug!(data_id = %data_id, "Config poll task stopped");
        });

        Ok(rx)
    }
}

impl HttpBackend {
    /// 克隆一份给后台轮询任务用的句柄
    fn clone_for_task(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            namespace: self.namespace.clone(),
            poll_interval: self.poll_interval,
            auth: self.auth.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_response_parse() {
        let beat: BeatResponse = serde_json::from_str(r#"{"clientBeatInterval": 5000}"#).unwrap();
        assert_eq!(beat.client_beat_interval, Some(5000));

        let beat: BeatResponse = serde_json::from_str(r#"{"code": 200}"#).unwrap();
        assert_eq!(beat.client_beat_interval, None);
    }

    #[test]
    fn test_instance_list_parse() {
        let raw = r#"{
            "hosts": [
                {"ip": "10.0.0.1", "port": 8080, "healthy": true, "weight": 2.0,
                 "clusterName": "cn-beijing", "metadata": {"env": "prod"}},
                {"ip": "10.0.0.2", "port": 8080, "healthy": false}
            ]
        }"#;
        let list: InstanceListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(list.hosts.len(), 2);

        let first = list.hosts.into_iter().next().unwrap().into_instance("order-service");
        assert_eq!(first.service_name, "order-service");
        assert_eq!(first.cluster.as_deref(), Some("cn-beijing"));
        assert_eq!(first.weight, 2.0);
        assert_eq!(first.instance_id, "10.0.0.1#8080#order-service");
        assert_eq!(first.metadata.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_beat_payload_shape() {
        let metadata = HashMap::new();
        let payload = BeatPayload {
            service_name: "order-service",
            ip: "10.0.0.1",
            port: 8080,
            cluster: None,
            weight: 1.0,
            metadata: &metadata,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["serviceName"], "order-service");
        assert_eq!(json["port"], 8080);
        assert!(json["cluster"].is_null());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务实例
///
/// 一条已注册的 `(ip, port, metadata)` 记录，对应注册中心里一个可达节点。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstance {
    /// 服务名
    pub service_name: String,

    /// 实例 ID（唯一标识）
    pub instance_id: String,

    /// 实例 IP
    pub ip: String,

    /// 实例端口
    pub port: u16,

    /// 集群名（可选）
    pub cluster: Option<String>,

    /// 权重，用于负载均衡
    pub weight: f64,

    /// 是否健康
    pub healthy: bool,

    /// 是否临时实例（停止心跳后由注册中心摘除）
    pub ephemeral: bool,

    /// 自定义元数据
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// 创建新的服务实例，实例 ID 自动生成
    pub fn new(service_name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            ip: ip.into(),
            port,
            cluster: None,
            weight: 1.0,
            healthy: true,
            ephemeral: true,
            metadata: HashMap::new(),
        }
    }

    /// 设置实例 ID
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// 设置集群名
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// 设置健康状态
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// 设置是否临时实例
    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// 添加一条元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 转换为 HTTP 基地址（格式：`http://ip:port`）
    pub fn to_http_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// 注册选项
///
/// `ServiceAgent::register` 的附加参数，全部字段有默认值。
#[derive(Debug, Clone)]
pub struct RegisterOpts {
    /// 权重，默认 1.0
    pub weight: f64,

    /// 自定义元数据
    pub metadata: HashMap<String, String>,

    /// 是否临时实例，默认 true
    pub ephemeral: bool,
}

impl Default for RegisterOpts {
    fn default() -> Self {
        Self {
            weight: 1.0,
            metadata: HashMap::new(),
            ephemeral: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_builder() {
        let instance = ServiceInstance::new("order-service", "192.168.3.4", 8080)
            .with_cluster("cn-beijing")
            .with_weight(2.0)
            .with_metadata("env", "prod");

        assert_eq!(instance.service_name, "order-service");
        assert_eq!(instance.port, 8080);
        assert_eq!(instance.cluster.as_deref(), Some("cn-beijing"));
        assert_eq!(instance.weight, 2.0);
        assert_eq!(instance.metadata.get("env").map(String::as_str), Some("prod"));
        assert!(instance.healthy);
        assert!(instance.ephemeral);
        assert!(!instance.instance_id.is_empty());
    }

    #[test]
    fn test_to_http_url() {
        let instance = ServiceInstance::new("order-service", "192.168.3.4", 8080);
        assert_eq!(instance.to_http_url(), "http://192.168.3.4:8080");
    }

    #[test]
    fn test_instance_json_roundtrip() {
        let instance = ServiceInstance::new("order-service", "10.0.0.1", 9000)
            .with_instance_id("node-1")
            .with_healthy(false);
        let json = serde_json::to_string(&instance).unwrap();
        let parsed: ServiceInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, instance);
        assert!(!parsed.healthy);
    }
}

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Etcd,
    Http,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(BackendKind::Etcd),
            "http" | "rest" => Ok(BackendKind::Http),
            _ => Err(format!("Unknown backend kind: {}", s)),
        }
    }
}

/// 客户端设置
///
/// 描述如何连接注册/配置中心，支持从 TOML 文件加载。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// 后端类型：etcd 或 http
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// 后端地址列表
    ///
    /// etcd: `http://127.0.0.1:2379`；http: 注册中心 open-api 基地址
    pub endpoints: Vec<String>,

    /// 命名空间，隔离不同环境的服务与配置
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// 认证用户名（可选）
    #[serde(default)]
    pub username: Option<String>,

    /// 认证密码（可选）
    #[serde(default)]
    pub password: Option<String>,

    /// 实例存活 TTL（秒），etcd lease 的有效期
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    /// 心跳默认间隔（毫秒），后端未下发间隔或心跳失败时使用
    #[serde(default = "default_beat_interval_ms")]
    pub beat_interval_ms: u64,

    /// HTTP 后端的轮询间隔（秒），watch 退化为轮询时使用
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// 远程调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_backend() -> BackendKind {
    BackendKind::Etcd
}

fn default_namespace() -> String {
    "beacon".to_string()
}

fn default_ttl() -> u64 {
    30
}

fn default_beat_interval_ms() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            namespace: default_namespace(),
            username: None,
            password: None,
            ttl: default_ttl(),
            beat_interval_ms: default_beat_interval_ms(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// 使用给定地址创建设置，其余字段取默认值
    pub fn with_endpoints(backend: BackendKind, endpoints: Vec<String>) -> Self {
        Self {
            backend,
            endpoints,
            ..Self::default()
        }
    }

    /// 从 TOML 文件加载
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!(BackendKind::from_str("etcd").unwrap(), BackendKind::Etcd);
        assert_eq!(BackendKind::from_str("HTTP").unwrap(), BackendKind::Http);
        assert_eq!(BackendKind::from_str("rest").unwrap(), BackendKind::Http);
        assert!(BackendKind::from_str("zookeeper").is_err());
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            endpoints = ["http://127.0.0.1:2379"]
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Etcd);
        assert_eq!(config.namespace, "beacon");
        assert_eq!(config.ttl, 30);
        assert_eq!(config.beat_interval_ms, 5000);
        assert!(config.username.is_none());
    }

    #[test]
    fn test_full_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            backend = "http"
            endpoints = ["http://10.0.0.1:8848", "http://10.0.0.2:8848"]
            namespace = "prod"
            username = "beacon"
            password = "secret"
            ttl = 60
            beat_interval_ms = 10000
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Http);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.username.as_deref(), Some("beacon"));
        assert_eq!(config.ttl, 60);
    }
}

//! Beacon Client 错误处理模块
//!
//! 提供统一的错误类型，覆盖后端通信、配置解析和远程调用

use thiserror::Error;

/// 本 crate 统一使用的结果类型
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Beacon Client 统一错误类型
#[derive(Error, Debug)]
pub enum BeaconError {
    /// 注册中心操作失败（注册、注销、心跳、实例列表）
    #[error("registry backend error: {0}")]
    Registry(String),

    /// 配置中心操作失败（拉取、发布、删除、监听）
    #[error("config center error: {0}")]
    Config(String),

    /// 配置内容解析失败
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 服务当前没有任何已知实例
    #[error("no instance available for service [{0}]")]
    NoInstance(String),

    /// 远程服务调用在重试耗尽后仍然失败
    #[error("remote service [{service}] http request error after {attempts} attempts: {message}")]
    RequestFailed {
        service: String,
        attempts: usize,
        message: String,
    },

    /// 客户端设置不合法
    #[error("invalid client settings: {0}")]
    Settings(String),

    /// etcd 客户端错误
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// HTTP 传输错误
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON 编解码错误
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// TOML 配置文件解析错误
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BeaconError {
    /// 创建注册中心错误
    pub fn registry(msg: impl Into<String>) -> Self {
        BeaconError::Registry(msg.into())
    }

    /// 创建配置中心错误
    pub fn config(msg: impl Into<String>) -> Self {
        BeaconError::Config(msg.into())
    }

    /// 创建配置解析错误
    pub fn config_parse(msg: impl Into<String>) -> Self {
        BeaconError::ConfigParse(msg.into())
    }

    /// 创建设置错误
    pub fn settings(msg: impl Into<String>) -> Self {
        BeaconError::Settings(msg.into())
    }

    /// 是否属于瞬时错误
    ///
    /// 瞬时错误（网络抖动、实例暂时不可达）适合重试，
    /// 配置/设置类错误重试也不会成功。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BeaconError::Registry(_)
                | BeaconError::NoInstance(_)
                | BeaconError::Etcd(_)
                | BeaconError::Http(_)
        )
    }
}

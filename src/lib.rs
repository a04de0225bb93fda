//! Beacon Client Library
//!
//! Convenience layer over a registry/config center: auto-refreshing remote
//! config, service registration with heartbeat keep-alive, client-side
//! discovery and load-balanced HTTP dispatch.

pub mod backend;
pub mod config;
pub mod config_center;
pub mod error;
pub mod registry;
pub mod retry;
pub mod telemetry;
pub mod types;

// Re-exports
pub use config::{BackendKind, ClientConfig};
pub use error::{BeaconError, Result};
pub use types::{RegisterOpts, ServiceInstance};

// 配置中心
pub use config_center::{ConfigCenter, ConfigStore, DEFAULT_GROUP, DEFAULT_SECTION};

// 服务注册与发现
pub use backend::{Backend, EtcdBackend, HttpBackend, create_backend};
pub use registry::{LoadBalanceStrategy, ServiceAgent, ServiceSelector};

// 重试策略
pub use retry::{ExponentialBackoffPolicy, LinearBackoffPolicy, RetryPolicy};

//! 日志初始化
//!
//! 库本身只通过 `tracing` 产出结构化日志，这里提供给二进制入口使用的
//! 订阅器初始化入口。重复调用是安全的（后续调用不生效）。

use tracing_subscriber::EnvFilter;

/// 以默认级别 `info` 初始化日志输出
pub fn init() {
    init_with_filter("info");
}

/// 初始化日志输出
///
/// 过滤规则优先读 `RUST_LOG` 环境变量，未设置时使用 `default_filter`。
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

//! 日志初始化
//!
//! 通过 `RUST_LOG` 控制过滤级别，默认 `info`。
use tracing_subscriber::EnvFilter;

/// 安装全局 fmt 订阅器；重复调用不会报错（后续调用为空操作）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

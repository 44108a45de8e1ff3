//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info 级别，RUST_LOG 可覆盖（如 `RUST_LOG=strategy_arbiter=debug`）。
//! 处理器调用的审计记录以 `activity_audit` JSON 字段输出在 info 级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_twice_is_harmless() {
        super::init();
        super::init();
        tracing::info!("observability ready");
    }
}

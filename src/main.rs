//! Strategy Arbiter 批处理入口
//!
//! 用法：strategy-arbiter <requests.json> [config.toml]
//! 读取 AuthorizeStrategiesRequest 的 JSON 数组，逐个提交给协调器，每个广播事件输出一行 JSON，
//! 全部批次执行完（或收到 Ctrl+C / SIGTERM）后优雅退出。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use strategy_arbiter::{
    config::{load_config, AppConfig},
    core::{create_coordinator, run_with_graceful_shutdown, ShutdownManager},
    dispatch::{HandlerRegistry, LoggingHandler},
    observability, AuthorizeStrategiesRequest,
};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let requests_path = args
        .next()
        .context("usage: strategy-arbiter <requests.json> [config.toml]")?;
    let config_path = args.next().map(PathBuf::from);

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let raw = std::fs::read_to_string(&requests_path)
        .with_context(|| format!("Failed to read {requests_path}"))?;
    let requests: Vec<AuthorizeStrategiesRequest> =
        serde_json::from_str(&raw).context("Invalid authorization request file")?;

    let mut registry = HandlerRegistry::new();
    registry.register(LoggingHandler::default());

    let manager = Arc::new(ShutdownManager::new());
    let coordinator = create_coordinator(&cfg, registry, manager.token());

    let mut events = coordinator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!("Event serialization failed: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged, {} events dropped", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let submitter = coordinator.clone();
    let app = async move {
        for request in requests {
            match submitter.submit(request).await {
                Ok(receipt) => tracing::info!(applied = ?receipt.applied, pending = ?receipt.pending, "request submitted"),
                Err(e) => {
                    tracing::error!("Submit failed: {}", e);
                    return;
                }
            }
        }
        if let Err(e) = submitter.wait_idle().await {
            tracing::warn!("Wait for batches failed: {}", e);
        }
    };

    run_with_graceful_shutdown(manager, app, move || async move {
        if let Err(e) = coordinator.shutdown().await {
            tracing::debug!("Coordinator already stopped: {}", e);
        }
        drop(coordinator);
        if tokio::time::timeout(Duration::from_secs(2), printer).await.is_err() {
            tracing::warn!("Event printer did not drain in time");
        }
    })
    .await;

    Ok(())
}

//! Strategy Arbiter Web 接口
//!
//! 启动: cargo run --bin strategy-arbiter-web --features web
//! 监听地址由 ARBITER_WEB_ADDR 指定，默认 127.0.0.1:8080。
//! 请求 / 批次 / 状态均使用库中的信封类型作为 JSON 契约；/api/events 以 SSE 推送广播事件。

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde::Deserialize;
use tokio::sync::broadcast;

use strategy_arbiter::{
    config::{load_config, AppConfig},
    core::{create_coordinator, CoordinatorHandle, ShutdownManager, ShutdownReason, SubmitReceipt},
    dispatch::{HandlerRegistry, LoggingHandler},
    observability, ApplyStrategies, AuthorizeStrategiesRequest, StrategyError, StrategyStateUpdate,
};

struct AppState {
    coordinator: CoordinatorHandle,
}

/// 评估员决定（批准 / 拒绝）
#[derive(Debug, Deserialize)]
struct DecisionBody {
    reason: String,
    evaluator: String,
}

/// StrategyError → HTTP 响应
struct ApiError(StrategyError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StrategyError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            StrategyError::AlreadyApplied(_) => StatusCode::CONFLICT,
            StrategyError::UnknownBatch(_) => StatusCode::NOT_FOUND,
            StrategyError::CoordinatorStopped => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0, "message": self.0.to_string() }))).into_response()
    }
}

impl From<StrategyError> for ApiError {
    fn from(e: StrategyError) -> Self {
        Self(e)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut registry = HandlerRegistry::new();
    registry.register(LoggingHandler::default());

    let manager = Arc::new(ShutdownManager::new());
    manager.install_signal_handlers();
    let coordinator = create_coordinator(&cfg, registry, manager.token());
    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
    });

    let app = Router::new()
        .route("/api/requests", post(api_submit))
        .route("/api/apply", post(api_apply))
        .route("/api/approve", post(api_approve))
        .route("/api/reject", post(api_reject))
        .route("/api/state", get(api_state))
        .route("/api/events", get(api_events_sse))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(Arc::clone(&state));

    let addr = std::env::var("ARBITER_WEB_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    tracing::info!("Strategy arbiter web listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown = Arc::clone(&manager);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;

    manager.shutdown(ShutdownReason::SessionEnded);
    if let Err(e) = coordinator.shutdown().await {
        tracing::debug!("Coordinator already stopped: {}", e);
    }
    Ok(())
}

/// POST /api/requests：提交授权请求
async fn api_submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthorizeStrategiesRequest>,
) -> Result<Json<SubmitReceipt>, ApiError> {
    Ok(Json(state.coordinator.submit(request).await?))
}

/// POST /api/apply：场景触发的策略，直接执行
async fn api_apply(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<ApplyStrategies>,
) -> Result<Json<ApplyStrategies>, ApiError> {
    let evaluator = batch.evaluator().map(str::to_string);
    let scenario_support = batch.is_scenario_support();
    let applied = state
        .coordinator
        .apply_immediately(batch.into_strategies(), evaluator, scenario_support)
        .await?;
    Ok(Json(applied))
}

/// POST /api/approve：批准待批批次
async fn api_approve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<ApplyStrategies>, ApiError> {
    Ok(Json(state.coordinator.approve(&body.reason, &body.evaluator).await?))
}

/// POST /api/reject：拒绝待批批次
async fn api_reject(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.reject(&body.reason, &body.evaluator).await?;
    Ok(Json(serde_json::json!({ "rejected": body.reason })))
}

/// GET /api/state：当前 applied / pending / failed 视图
async fn api_state(State(state): State<Arc<AppState>>) -> Result<Json<StrategyStateUpdate>, ApiError> {
    Ok(Json(state.coordinator.snapshot().await?))
}

/// GET /api/events：SSE 流，推送 state_update / activity_completed / batch_completed
async fn api_events_sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.coordinator.subscribe();
    let event_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(data) => return Some((Ok(Event::default().data(data)), rx)),
                    Err(e) => tracing::warn!("SSE event serialization failed: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("SSE subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

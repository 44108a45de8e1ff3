//! 协调器：单写者主控循环
//!
//! 授权闸门与状态账本只在这个后台任务里被修改；外部通过 CoordinatorHandle 发送命令并等待 oneshot 回复。
//! 批次执行交给 Arbiter 在独立任务上运行，完成后把报告送回循环记账，慢处理器不会阻塞其它批次的仲裁。

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::error::StrategyError;
use super::state::StrategyLedger;
use crate::broadcast::{ArbiterEvent, StateBroadcaster};
use crate::config::AppConfig;
use crate::dispatch::{ActivityExecutor, Arbiter, ArbiterSettings, BatchReport, HandlerRegistry};
use crate::gate::{policy_from_config, AuthorizationGate, PendingExpiry, PendingTimeout};
use crate::request::{ApplyStrategies, AuthorizeStrategiesRequest, StrategyStateUpdate, StrategyToApply};

/// 提交授权请求后的回执
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

enum Command {
    Submit {
        request: AuthorizeStrategiesRequest,
        reply: oneshot::Sender<SubmitReceipt>,
    },
    Approve {
        reason: String,
        evaluator: String,
        reply: oneshot::Sender<Result<ApplyStrategies, StrategyError>>,
    },
    Reject {
        reason: String,
        evaluator: String,
        reply: oneshot::Sender<Result<(), StrategyError>>,
    },
    ApplyImmediately {
        batch: ApplyStrategies,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<StrategyStateUpdate>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    EndSession {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 协调器句柄，可克隆，跨任务共享
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: StateBroadcaster,
}

impl CoordinatorHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, StrategyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| StrategyError::CoordinatorStopped)?;
        rx.await.map_err(|_| StrategyError::CoordinatorStopped)
    }

    /// 提交一个授权请求
    pub async fn submit(&self, request: AuthorizeStrategiesRequest) -> Result<SubmitReceipt, StrategyError> {
        self.call(|reply| Command::Submit { request, reply }).await
    }

    /// 由原因映射构造请求并提交，返回构造出的请求
    pub async fn submit_authorization_request(
        &self,
        reason_to_strategies: BTreeMap<String, Vec<StrategyToApply>>,
        evaluator: Option<String>,
    ) -> Result<AuthorizeStrategiesRequest, StrategyError> {
        let request = AuthorizeStrategiesRequest::new(reason_to_strategies, evaluator)?;
        self.submit(request.clone()).await?;
        Ok(request)
    }

    /// 批准待批批次，返回转发给调度器的批次
    pub async fn approve(&self, reason: &str, evaluator: &str) -> Result<ApplyStrategies, StrategyError> {
        let reason = reason.to_string();
        let evaluator = evaluator.to_string();
        self.call(|reply| Command::Approve { reason, evaluator, reply }).await?
    }

    pub async fn reject(&self, reason: &str, evaluator: &str) -> Result<(), StrategyError> {
        let reason = reason.to_string();
        let evaluator = evaluator.to_string();
        self.call(|reply| Command::Reject { reason, evaluator, reply }).await?
    }

    /// 绕过闸门直接执行（场景触发的策略）
    pub async fn apply_immediately(
        &self,
        strategies: Vec<StrategyToApply>,
        evaluator: Option<String>,
        scenario_support: bool,
    ) -> Result<ApplyStrategies, StrategyError> {
        let batch = ApplyStrategies::new(strategies, evaluator, scenario_support);
        let forwarded = batch.clone();
        self.call(|reply| Command::ApplyImmediately { batch: forwarded, reply }).await?;
        Ok(batch)
    }

    /// 当前状态的拷贝
    pub async fn snapshot(&self) -> Result<StrategyStateUpdate, StrategyError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// 等待所有在途批次执行完毕
    pub async fn wait_idle(&self) -> Result<(), StrategyError> {
        self.call(|reply| Command::WaitIdle { reply }).await
    }

    /// 结束会话：拒绝全部待批批次
    pub async fn end_session(&self) -> Result<Vec<String>, StrategyError> {
        self.call(|reply| Command::EndSession { reply }).await
    }

    /// 停止协调器；在途批次会先执行完
    pub async fn shutdown(&self) -> Result<(), StrategyError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 协调器运行参数
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub reject_pending_on_shutdown: bool,
    pub sweep_interval: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            reject_pending_on_shutdown: cfg.authorization.reject_pending_on_shutdown,
            sweep_interval: Duration::from_secs(cfg.authorization.sweep_interval_secs.max(1)),
        }
    }
}

pub struct Coordinator {
    gate: AuthorizationGate,
    ledger: StrategyLedger,
    arbiter: Arbiter,
    events: StateBroadcaster,
    settings: CoordinatorSettings,
    done_tx: mpsc::UnboundedSender<BatchReport>,
    done_rx: mpsc::UnboundedReceiver<BatchReport>,
    running: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

/// 按配置组装闸门、执行器与调度器并启动协调器
pub fn create_coordinator(
    cfg: &AppConfig,
    registry: HandlerRegistry,
    shutdown: CancellationToken,
) -> CoordinatorHandle {
    let events = StateBroadcaster::new(cfg.broadcast.capacity);
    let gate = AuthorizationGate::new(
        policy_from_config(&cfg.authorization),
        PendingTimeout::from_config(&cfg.authorization),
    );
    let handlers = registry.handler_names();
    let executor = ActivityExecutor::new(registry, cfg.arbiter.handler_timeout_secs);
    let arbiter = Arbiter::with_broadcaster(executor, ArbiterSettings::from(&cfg.arbiter), events.clone());
    tracing::info!(
        mode = ?cfg.authorization.mode,
        handlers = ?handlers,
        pending_timeout = ?cfg.authorization.pending_timeout_secs,
        node_scoped = cfg.arbiter.node_scoped_serialization,
        "strategy coordinator starting"
    );
    Coordinator::new(gate, arbiter, events, CoordinatorSettings::from_config(cfg)).spawn(shutdown)
}

impl Coordinator {
    pub fn new(
        gate: AuthorizationGate,
        arbiter: Arbiter,
        events: StateBroadcaster,
        settings: CoordinatorSettings,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            gate,
            ledger: StrategyLedger::new(),
            arbiter,
            events,
            settings,
            done_tx,
            done_rx,
            running: 0,
            idle_waiters: Vec::new(),
        }
    }

    /// 在后台任务中运行主控循环；token 取消时按关闭流程退出
    pub fn spawn(self, shutdown: CancellationToken) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            tx,
            events: self.events.clone(),
        };
        tokio::spawn(self.run(rx, shutdown));
        handle
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken) {
        let mut sweep = match self.gate.timeout() {
            PendingTimeout::Never => None,
            _ => {
                let mut interval = tokio::time::interval(self.settings.sweep_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(interval)
            }
        };

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.finish().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => {
                        self.finish().await;
                        break;
                    }
                },
                Some(report) = self.done_rx.recv() => self.on_batch_finished(report),
                _ = next_sweep(&mut sweep) => self.sweep(Instant::now()),
                _ = shutdown.cancelled() => {
                    self.finish().await;
                    break;
                }
            }
        }
        tracing::info!("strategy coordinator stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { request, reply } => {
                let evaluator = request.evaluator().map(str::to_string);
                let decision = self.gate.submit(request, Instant::now());
                for (reason, strategies) in &decision.applied {
                    self.ledger.record_applied(reason, strategies);
                }
                let receipt = SubmitReceipt {
                    applied: decision.applied.keys().cloned().collect(),
                    pending: decision.pending.clone(),
                };
                if let Some(batch) = decision.apply_batch() {
                    self.dispatch(batch);
                }
                if !receipt.applied.is_empty() || !receipt.pending.is_empty() {
                    self.publish_state(evaluator);
                }
                let _ = reply.send(receipt);
            }
            Command::Approve { reason, evaluator, reply } => {
                let result = self.gate.approve(&reason, &evaluator);
                if let Ok(batch) = &result {
                    self.ledger.record_applied(&reason, batch.strategies());
                    self.dispatch(batch.clone());
                    self.publish_state(Some(evaluator));
                }
                let _ = reply.send(result);
            }
            Command::Reject { reason, evaluator, reply } => {
                let was_pending = self.gate.is_pending(&reason);
                let result = self.gate.reject(&reason, &evaluator);
                if was_pending && result.is_ok() {
                    self.publish_state(Some(evaluator));
                }
                let _ = reply.send(result);
            }
            Command::ApplyImmediately { batch, reply } => {
                for envelope in batch.strategies() {
                    self.ledger.record_applied(envelope.trigger(), [envelope]);
                }
                let evaluator = batch.evaluator().map(str::to_string);
                if !batch.is_empty() {
                    self.dispatch(batch);
                    self.publish_state(evaluator);
                }
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.projection(None));
            }
            Command::WaitIdle { reply } => {
                if self.running == 0 {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::EndSession { reply } => {
                let rejected = self.gate.end_session();
                if !rejected.is_empty() {
                    self.publish_state(None);
                }
                let _ = reply.send(rejected);
            }
            Command::Shutdown { reply } => {
                // 在 run 中处理
                let _ = reply.send(());
            }
        }
    }

    fn dispatch(&mut self, batch: ApplyStrategies) {
        self.running += 1;
        let arbiter = self.arbiter.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let report = arbiter.apply(batch).await;
            let _ = done.send(report);
        });
    }

    fn on_batch_finished(&mut self, report: BatchReport) {
        self.running = self.running.saturating_sub(1);
        self.ledger.record_batch(&report);
        self.events.publish(ArbiterEvent::BatchCompleted {
            summary: report.summary(),
        });
        self.publish_state(report.evaluator.clone());
        if self.running == 0 {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        let expired = self.gate.expire_pending(now);
        if expired.is_empty() {
            return;
        }
        for expiry in expired {
            match expiry {
                PendingExpiry::Rejected { reason } => {
                    tracing::debug!(reason = %reason, "expired batch rejected");
                }
                PendingExpiry::Applied { reason, batch } => {
                    self.ledger.record_applied(&reason, batch.strategies());
                    self.dispatch(batch);
                }
            }
        }
        self.publish_state(None);
    }

    /// 关闭流程：按配置拒绝待批，等待在途批次记账完毕
    async fn finish(&mut self) {
        if self.settings.reject_pending_on_shutdown {
            let rejected = self.gate.end_session();
            if !rejected.is_empty() {
                self.publish_state(None);
            }
        }
        while self.running > 0 {
            match self.done_rx.recv().await {
                Some(report) => self.on_batch_finished(report),
                None => break,
            }
        }
    }

    fn projection(&self, evaluator: Option<String>) -> StrategyStateUpdate {
        self.ledger.project(self.gate.pending_strategies(), evaluator)
    }

    fn publish_state(&self, evaluator: Option<String>) {
        let update = self.projection(evaluator);
        self.events.publish(ArbiterEvent::StateUpdate { update });
    }
}

async fn next_sweep(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

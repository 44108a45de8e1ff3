//! 授权闸门：每个触发原因的批次 Submitted → {AutoApplied | PendingApproval} → {Applied | Rejected}
//!
//! 闸门本身不加锁，由协调器独占持有；所有方法都是同步的状态迁移。
//! 批准 / 拒绝是幂等的：对已应用批次的重复操作报告 AlreadyApplied，不修改状态。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::policy::{AuthorizationPolicy, PendingTimeout};
use crate::core::StrategyError;
use crate::request::{ApplyStrategies, AuthorizeStrategiesRequest, StrategyToApply};
use crate::strategy::Strategy;

/// 批次的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchResolution {
    Applied,
    Rejected,
}

#[derive(Debug, Clone)]
struct PendingBatch {
    strategies: Vec<StrategyToApply>,
    evaluator: Option<String>,
    since: Instant,
}

/// 一次提交的结果
#[derive(Debug, Clone, Default)]
pub struct GateDecision {
    /// 自动应用的原因 → 策略
    pub applied: BTreeMap<String, Vec<StrategyToApply>>,
    /// 进入（或合并到）待批的原因
    pub pending: Vec<String>,
    pub evaluator: Option<String>,
}

impl GateDecision {
    /// 自动应用部分合成一个调度批次；没有则 None
    pub fn apply_batch(&self) -> Option<ApplyStrategies> {
        if self.applied.is_empty() {
            return None;
        }
        let strategies = self.applied.values().flatten().cloned().collect();
        Some(ApplyStrategies::new(strategies, self.evaluator.clone(), false))
    }
}

/// 超时处理的结果
#[derive(Debug, Clone)]
pub enum PendingExpiry {
    Rejected { reason: String },
    Applied { reason: String, batch: ApplyStrategies },
}

pub struct AuthorizationGate {
    policy: Arc<dyn AuthorizationPolicy>,
    timeout: PendingTimeout,
    pending: BTreeMap<String, PendingBatch>,
    resolved: HashMap<String, BatchResolution>,
}

impl AuthorizationGate {
    pub fn new(policy: Arc<dyn AuthorizationPolicy>, timeout: PendingTimeout) -> Self {
        Self {
            policy,
            timeout,
            pending: BTreeMap::new(),
            resolved: HashMap::new(),
        }
    }

    /// 按策略逐原因分流；已在待批中的原因会合并（按应用身份去重）
    pub fn submit(&mut self, request: AuthorizeStrategiesRequest, now: Instant) -> GateDecision {
        let (reason_to_strategies, evaluator) = request.into_parts();
        let mut decision = GateDecision {
            evaluator: evaluator.clone(),
            ..Default::default()
        };

        for (reason, strategies) in reason_to_strategies {
            if strategies.is_empty() {
                tracing::debug!(reason = %reason, "empty strategy list, nothing to authorize");
                continue;
            }

            if self.policy.requires_approval(&reason, evaluator.as_deref()) {
                self.resolved.remove(&reason);
                let batch = self.pending.entry(reason.clone()).or_insert_with(|| PendingBatch {
                    strategies: Vec::new(),
                    evaluator: evaluator.clone(),
                    since: now,
                });
                for strategy in strategies {
                    let key = strategy.key();
                    if batch.strategies.iter().any(|s| s.key() == key) {
                        tracing::debug!(reason = %reason, key = %key, "duplicate pending strategy dropped");
                        continue;
                    }
                    batch.strategies.push(strategy);
                }
                tracing::info!(
                    reason = %reason,
                    policy = self.policy.name(),
                    pending = batch.strategies.len(),
                    "strategies awaiting authorization"
                );
                decision.pending.push(reason);
            } else {
                tracing::info!(reason = %reason, count = strategies.len(), "strategies auto-applied");
                self.resolved.insert(reason.clone(), BatchResolution::Applied);
                decision.applied.insert(reason, strategies);
            }
        }

        decision
    }

    /// 批准待批批次，返回要交给调度器的批次
    pub fn approve(&mut self, reason: &str, evaluator: &str) -> Result<ApplyStrategies, StrategyError> {
        if evaluator.trim().is_empty() {
            return Err(StrategyError::invalid("The approving evaluator can't be blank."));
        }
        match self.pending.remove(reason) {
            Some(batch) => {
                self.resolved.insert(reason.to_string(), BatchResolution::Applied);
                tracing::info!(reason, evaluator, count = batch.strategies.len(), "pending strategies approved");
                Ok(ApplyStrategies::new(batch.strategies, Some(evaluator.to_string()), false))
            }
            None => Err(self.not_pending(reason)),
        }
    }

    /// 拒绝待批批次；重复拒绝是空操作
    pub fn reject(&mut self, reason: &str, evaluator: &str) -> Result<(), StrategyError> {
        if evaluator.trim().is_empty() {
            return Err(StrategyError::invalid("The rejecting evaluator can't be blank."));
        }
        if let Some(batch) = self.pending.remove(reason) {
            self.resolved.insert(reason.to_string(), BatchResolution::Rejected);
            tracing::info!(reason, evaluator, count = batch.strategies.len(), "pending strategies rejected");
            return Ok(());
        }
        match self.resolved.get(reason) {
            Some(BatchResolution::Rejected) => Ok(()),
            _ => Err(self.not_pending(reason)),
        }
    }

    fn not_pending(&self, reason: &str) -> StrategyError {
        match self.resolved.get(reason) {
            Some(BatchResolution::Applied) => StrategyError::AlreadyApplied(reason.to_string()),
            Some(BatchResolution::Rejected) => {
                StrategyError::UnknownBatch(format!("{reason} (already rejected)"))
            }
            None => StrategyError::UnknownBatch(reason.to_string()),
        }
    }

    /// 按超时策略处理等待过久的批次
    pub fn expire_pending(&mut self, now: Instant) -> Vec<PendingExpiry> {
        let Some(after) = self.timeout.after() else {
            return Vec::new();
        };
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, batch)| now.saturating_duration_since(batch.since) >= after)
            .map(|(reason, _)| reason.clone())
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for reason in expired {
            let Some(batch) = self.pending.remove(&reason) else {
                continue;
            };
            match self.timeout {
                PendingTimeout::Apply(_) => {
                    tracing::warn!(reason = %reason, "pending authorization timed out, applying");
                    self.resolved.insert(reason.clone(), BatchResolution::Applied);
                    let batch = ApplyStrategies::new(batch.strategies, batch.evaluator, false);
                    out.push(PendingExpiry::Applied { reason, batch });
                }
                PendingTimeout::Reject(_) | PendingTimeout::Never => {
                    tracing::warn!(reason = %reason, "pending authorization timed out, rejecting");
                    self.resolved.insert(reason.clone(), BatchResolution::Rejected);
                    out.push(PendingExpiry::Rejected { reason });
                }
            }
        }
        out
    }

    /// 会话结束：拒绝全部待批批次，返回被拒绝的原因
    pub fn end_session(&mut self) -> Vec<String> {
        let reasons: Vec<String> = std::mem::take(&mut self.pending).into_keys().collect();
        for reason in &reasons {
            self.resolved.insert(reason.clone(), BatchResolution::Rejected);
        }
        if !reasons.is_empty() {
            tracing::info!(count = reasons.len(), "session ended, pending strategies rejected");
        }
        reasons
    }

    pub fn pending_strategies(&self) -> BTreeMap<String, Vec<Strategy>> {
        self.pending
            .iter()
            .map(|(reason, batch)| {
                let strategies = batch.strategies.iter().map(|s| s.strategy().clone()).collect();
                (reason.clone(), strategies)
            })
            .collect()
    }

    pub fn is_pending(&self, reason: &str) -> bool {
        self.pending.contains_key(reason)
    }

    pub fn resolution(&self, reason: &str) -> Option<BatchResolution> {
        self.resolved.get(reason).copied()
    }

    pub fn timeout(&self) -> PendingTimeout {
        self.timeout
    }
}

//! 状态账本：已应用 / 失败记录，以及对外的 StrategyStateUpdate 投影
//!
//! 账本由协调器独占；对外只给出拷贝（snapshot），不暴露可变引用。
//! 待批部分由授权闸门持有，投影时传入。
//! 放行时先记为 applied；批次报告回来后，被调度器以 AlreadyApplied 拒绝的信封从 applied 撤回并记入 refused。

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use super::error::StrategyError;
use crate::dispatch::{ActivityOutcome, BatchReport, SequenceReport};
use crate::request::{ActivityFailure, RefusedStrategy, StrategyStateUpdate, StrategyToApply};
use crate::strategy::Strategy;

#[derive(Debug, Clone, Default)]
pub struct StrategyLedger {
    /// 原因 → (信封 id, 策略)
    applied: BTreeMap<String, Vec<(Uuid, Strategy)>>,
    failed: BTreeMap<String, Vec<ActivityFailure>>,
    refused: BTreeMap<String, Vec<RefusedStrategy>>,
    /// 至少有一个活动执行成功的原因
    executed: BTreeSet<String>,
}

impl StrategyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录某原因下被放行的策略
    pub fn record_applied<'a>(&mut self, reason: &str, strategies: impl IntoIterator<Item = &'a StrategyToApply>) {
        let entry = self.applied.entry(reason.to_string()).or_default();
        entry.extend(strategies.into_iter().map(|s| (s.id(), s.strategy().clone())));
    }

    /// 记录批次执行结果；失败按触发原因归档
    pub fn record_batch(&mut self, report: &BatchReport) {
        for sequence in &report.sequences {
            if let Err(error) = &sequence.admission {
                self.record_unadmitted(sequence, error);
            }
        }
        for record in report.records() {
            match &record.outcome {
                ActivityOutcome::Executed => {
                    self.executed.insert(record.trigger.clone());
                }
                ActivityOutcome::Failed(error) => {
                    self.failed.entry(record.trigger.clone()).or_default().push(ActivityFailure {
                        strategy: record.strategy.clone(),
                        activity: record.activity.clone(),
                        error: error.clone(),
                    });
                }
                ActivityOutcome::Skipped(_) => {}
            }
        }
    }

    fn record_unadmitted(&mut self, sequence: &SequenceReport, error: &StrategyError) {
        let reason = &sequence.key.trigger;
        match error {
            StrategyError::AlreadyApplied(_) => {
                self.retract(reason, sequence.envelope_id);
                self.refused.entry(reason.clone()).or_default().push(RefusedStrategy {
                    strategy: sequence.key.strategy.clone(),
                    evaluator: sequence.key.evaluator.clone(),
                    error: error.clone(),
                });
            }
            _ => {
                self.failed.entry(reason.clone()).or_default().push(ActivityFailure {
                    strategy: sequence.key.strategy.clone(),
                    activity: sequence.key.strategy.clone(),
                    error: error.clone(),
                });
            }
        }
    }

    fn retract(&mut self, reason: &str, envelope_id: Uuid) {
        let Some(entries) = self.applied.get_mut(reason) else {
            return;
        };
        if let Some(position) = entries.iter().rposition(|(id, _)| *id == envelope_id) {
            entries.remove(position);
        }
        if entries.is_empty() {
            self.applied.remove(reason);
        }
    }

    /// 合成对外状态
    pub fn project(
        &self,
        pending: BTreeMap<String, Vec<Strategy>>,
        evaluator: Option<String>,
    ) -> StrategyStateUpdate {
        let partially_failed = self
            .failed
            .keys()
            .filter(|reason| self.executed.contains(*reason))
            .cloned()
            .collect();
        let applied_strategies = self
            .applied
            .iter()
            .map(|(reason, entries)| {
                (reason.clone(), entries.iter().map(|(_, strategy)| strategy.clone()).collect())
            })
            .collect();
        StrategyStateUpdate {
            applied_strategies,
            pending_strategies: pending,
            failed_strategies: self.failed.clone(),
            partially_failed,
            refused_strategies: self.refused.clone(),
            evaluator,
        }
    }
}

//! 执行结果：单个活动、单个序列（一个 StrategyToApply）、整个批次

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::StrategyError;
use crate::request::ApplicationKey;

/// 单个活动的结果；Skipped 只用于显式的 DoNothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ActivityOutcome {
    Executed,
    Failed(StrategyError),
    Skipped(String),
}

impl ActivityOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ActivityOutcome::Executed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ActivityOutcome::Failed(_))
    }
}

/// 一次活动执行的记录
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub trigger: String,
    pub strategy: String,
    pub activity: String,
    pub kind: &'static str,
    pub handler: String,
    /// 活动在序列中的位置
    pub position: usize,
    pub outcome: ActivityOutcome,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// 单调时钟（可被测试暂停），只在进程内比较先后
    #[serde(skip)]
    pub started: Instant,
    #[serde(skip)]
    pub finished: Instant,
}

impl ActivityRecord {
    pub fn elapsed(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }
}

/// 一个 StrategyToApply 的执行报告
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub envelope_id: Uuid,
    pub key: ApplicationKey,
    pub stress: Option<f64>,
    /// Err(AlreadyApplied) 表示同身份已在途，本次未执行
    pub admission: Result<(), StrategyError>,
    pub activities: Vec<ActivityRecord>,
}

impl SequenceReport {
    pub fn rejected(envelope_id: Uuid, key: ApplicationKey, stress: Option<f64>, error: StrategyError) -> Self {
        Self {
            envelope_id,
            key,
            stress,
            admission: Err(error),
            activities: Vec::new(),
        }
    }

    pub fn was_admitted(&self) -> bool {
        self.admission.is_ok()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.activities.iter().filter(|r| r.outcome.is_failed())
    }

    pub fn executed_count(&self) -> usize {
        self.activities.iter().filter(|r| r.outcome.is_executed()).count()
    }
}

/// 批次报告
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub evaluator: Option<String>,
    pub scenario_support: bool,
    pub sequences: Vec<SequenceReport>,
}

impl BatchReport {
    pub fn records(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.sequences.iter().flat_map(|s| s.activities.iter())
    }

    pub fn executed_count(&self) -> usize {
        self.sequences.iter().map(SequenceReport::executed_count).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.sequences.iter().map(|s| s.failures().count()).sum()
    }

    pub fn already_applied_count(&self) -> usize {
        self.sequences
            .iter()
            .filter(|s| matches!(s.admission, Err(StrategyError::AlreadyApplied(_))))
            .count()
    }

    /// 批次摘要（广播用）
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            evaluator: self.evaluator.clone(),
            scenario_support: self.scenario_support,
            sequences: self.sequences.len(),
            executed: self.executed_count(),
            failed: self.failed_count(),
            skipped: self
                .records()
                .filter(|r| matches!(r.outcome, ActivityOutcome::Skipped(_)))
                .count(),
            already_applied: self.already_applied_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub evaluator: Option<String>,
    pub scenario_support: bool,
    pub sequences: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub already_applied: usize,
}

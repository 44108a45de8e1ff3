//! 调度仲裁：把已授权批次里的每个活动恰好执行一次
//!
//! - 同一应用身份（触发原因 + 评估员 + 策略名）同时只允许一个在途执行，重复提交报告 AlreadyApplied
//! - 同一策略内活动按作者顺序执行，延迟在活动完成之后、下一个活动开始之前生效
//! - 不同 StrategyToApply 各自在独立任务上并发执行；目标节点相交时串行（可配置）
//! - 某个活动失败不会中断其它序列，也不会中断本序列的后续活动

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::executor::ActivityExecutor;
use super::node_locks::NodeLocks;
use super::outcome::{ActivityOutcome, ActivityRecord, BatchReport, SequenceReport};
use crate::broadcast::{ArbiterEvent, StateBroadcaster};
use crate::config::ArbiterSection;
use crate::core::StrategyError;
use crate::request::{ApplicationKey, ApplyStrategies, StrategyToApply};

/// 调度参数
#[derive(Debug, Clone)]
pub struct ArbiterSettings {
    pub node_scoped_serialization: bool,
    pub max_concurrent_activities: usize,
    pub honor_trailing_delay: bool,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self::from(&ArbiterSection::default())
    }
}

impl From<&ArbiterSection> for ArbiterSettings {
    fn from(section: &ArbiterSection) -> Self {
        Self {
            node_scoped_serialization: section.node_scoped_serialization,
            max_concurrent_activities: section.max_concurrent_activities,
            honor_trailing_delay: section.honor_trailing_delay,
        }
    }
}

/// 可克隆的句柄，内部共享状态
#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<ArbiterInner>,
}

struct ArbiterInner {
    executor: ActivityExecutor,
    settings: ArbiterSettings,
    in_flight: Mutex<HashSet<ApplicationKey>>,
    node_locks: NodeLocks,
    permits: Semaphore,
    events: Option<StateBroadcaster>,
}

/// 在途身份的占用；Drop 时释放（包括任务 panic）
struct InFlightClaim {
    inner: Arc<ArbiterInner>,
    key: ApplicationKey,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

enum Admission {
    Running {
        envelope_id: Uuid,
        key: ApplicationKey,
        stress: Option<f64>,
        handle: JoinHandle<SequenceReport>,
    },
    Refused(SequenceReport),
}

impl Arbiter {
    pub fn new(executor: ActivityExecutor, settings: ArbiterSettings) -> Self {
        Self::build(executor, settings, None)
    }

    /// 每个活动完成时额外发布 ActivityCompleted 事件
    pub fn with_broadcaster(executor: ActivityExecutor, settings: ArbiterSettings, events: StateBroadcaster) -> Self {
        Self::build(executor, settings, Some(events))
    }

    fn build(executor: ActivityExecutor, settings: ArbiterSettings, events: Option<StateBroadcaster>) -> Self {
        let permits = Semaphore::new(settings.max_concurrent_activities.max(1));
        Self {
            inner: Arc::new(ArbiterInner {
                executor,
                settings,
                in_flight: Mutex::new(HashSet::new()),
                node_locks: NodeLocks::new(),
                permits,
                events,
            }),
        }
    }

    /// 执行一个批次，全部序列结束后返回报告（顺序与输入一致）
    pub async fn apply(&self, batch: ApplyStrategies) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let evaluator = batch.evaluator().map(str::to_string);
        let scenario_support = batch.is_scenario_support();
        tracing::info!(
            batch = %batch_id,
            sequences = batch.strategies().len(),
            scenario_support,
            "applying strategies"
        );

        let admissions: Vec<Admission> = batch
            .into_strategies()
            .into_iter()
            .map(|envelope| self.admit(envelope))
            .collect();

        let sequences = join_all(admissions.into_iter().map(|admission| async move {
            match admission {
                Admission::Refused(report) => report,
                Admission::Running {
                    envelope_id,
                    key,
                    stress,
                    handle,
                } => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "strategy sequence task aborted");
                        let cause = StrategyError::ActivityExecutionFailed {
                            activity: key.strategy.clone(),
                            cause: e.to_string(),
                        };
                        SequenceReport::rejected(envelope_id, key, stress, cause)
                    }
                },
            }
        }))
        .await;

        let report = BatchReport {
            batch_id,
            evaluator,
            scenario_support,
            sequences,
        };
        tracing::info!(
            batch = %batch_id,
            executed = report.executed_count(),
            failed = report.failed_count(),
            already_applied = report.already_applied_count(),
            "batch finished"
        );
        report
    }

    /// 当前在途的应用身份数
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn admit(&self, envelope: StrategyToApply) -> Admission {
        let key = envelope.key();
        let claimed = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !claimed {
            tracing::warn!(key = %key, "strategy already in flight, not applying again");
            return Admission::Refused(SequenceReport::rejected(
                envelope.id(),
                key.clone(),
                envelope.strategy().stress(),
                StrategyError::AlreadyApplied(key.to_string()),
            ));
        }

        let claim = InFlightClaim {
            inner: self.inner.clone(),
            key: key.clone(),
        };
        let envelope_id = envelope.id();
        let stress = envelope.strategy().stress();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let _claim = claim;
            run_sequence(&inner, envelope).await
        });
        Admission::Running {
            envelope_id,
            key,
            stress,
            handle,
        }
    }
}

async fn run_sequence(inner: &ArbiterInner, envelope: StrategyToApply) -> SequenceReport {
    let key = envelope.key();
    let node_guard = if inner.settings.node_scoped_serialization && !envelope.node_ids().is_empty() {
        Some(inner.node_locks.acquire(envelope.node_ids()).await)
    } else {
        None
    };

    let activities = envelope.strategy().activities();
    let mut records = Vec::with_capacity(activities.len());
    for (position, activity) in activities.iter().enumerate() {
        let started = Instant::now();
        let outcome = if activity.kind().is_do_nothing() {
            tracing::debug!(key = %key, activity = %activity.name(), "do nothing activity skipped");
            ActivityOutcome::Skipped("do nothing".to_string())
        } else {
            match inner.permits.acquire().await {
                Ok(_permit) => match inner.executor.execute(activity).await {
                    Ok(()) => ActivityOutcome::Executed,
                    Err(e) => {
                        tracing::warn!(key = %key, activity = %activity.name(), error = %e, "activity failed");
                        ActivityOutcome::Failed(e)
                    }
                },
                Err(_) => ActivityOutcome::Failed(StrategyError::CoordinatorStopped),
            }
        };
        let finished = Instant::now();

        let record = ActivityRecord {
            trigger: key.trigger.clone(),
            strategy: key.strategy.clone(),
            activity: activity.name().to_string(),
            kind: activity.kind().label(),
            handler: activity.handler().to_string(),
            position,
            outcome,
            finished_at: Utc::now(),
            duration_ms: finished.saturating_duration_since(started).as_millis() as u64,
            started,
            finished,
        };
        if let Some(events) = &inner.events {
            events.publish(ArbiterEvent::ActivityCompleted { record: record.clone() });
        }
        records.push(record);

        // 最后一个活动的延迟只在持有节点锁时生效，用来拉开同节点后继序列
        let delay = activity.delay();
        let is_last = position + 1 == activities.len();
        let hold_trailing = node_guard.is_some() && inner.settings.honor_trailing_delay;
        if !delay.is_zero() && (!is_last || hold_trailing) {
            tokio::time::sleep(delay).await;
        }
    }
    drop(node_guard);

    SequenceReport {
        envelope_id: envelope.id(),
        key,
        stress: envelope.strategy().stress(),
        admission: Ok(()),
        activities: records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::{ActivityHandler, HandlerRegistry};
    use crate::strategy::{Strategy, StrategyActivity, DEFAULT_HANDLER};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录调用次数；名称以 "fail" 开头的活动返回失败
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        work: Duration,
    }

    #[async_trait]
    impl ActivityHandler for Counting {
        fn name(&self) -> &str {
            DEFAULT_HANDLER
        }

        async fn execute(&self, activity: &StrategyActivity) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if activity.name().starts_with("fail") {
                Err("handler refused".into())
            } else {
                Ok(())
            }
        }
    }

    struct SharedHandler(Arc<Counting>);

    #[async_trait]
    impl ActivityHandler for SharedHandler {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn execute(&self, activity: &StrategyActivity) -> Result<(), String> {
            self.0.execute(activity).await
        }
    }

    fn arbiter(handler: Arc<Counting>, settings: ArbiterSettings) -> Arbiter {
        let mut registry = HandlerRegistry::new();
        registry.register(SharedHandler(handler));
        Arbiter::new(ActivityExecutor::new(registry, 0), settings)
    }

    fn counting(work_ms: u64) -> Arc<Counting> {
        Arc::new(Counting {
            work: Duration::from_millis(work_ms),
            ..Default::default()
        })
    }

    fn feedback(name: &str) -> StrategyActivity {
        StrategyActivity::feedback(name, "msg").unwrap()
    }

    fn envelope(strategy: &str, activities: Vec<StrategyActivity>) -> StrategyToApply {
        let strategy = Strategy::new(strategy, activities, None).unwrap();
        StrategyToApply::new(strategy, "low-score", None).unwrap()
    }

    fn batch(envelopes: Vec<StrategyToApply>) -> ApplyStrategies {
        ApplyStrategies::new(envelopes, None, false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_identity_applied_at_most_once_concurrently() {
        let handler = counting(100);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());

        let first = arbiter.apply(batch(vec![envelope("s1", vec![feedback("a")])]));
        let second = arbiter.apply(batch(vec![envelope("s1", vec![feedback("a")])]));
        let (first, second) = tokio::join!(first, second);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let reports = [&first.sequences[0], &second.sequences[0]];
        assert_eq!(reports.iter().filter(|r| r.was_admitted()).count(), 1);
        assert!(reports.iter().any(|r| matches!(r.admission, Err(StrategyError::AlreadyApplied(_)))));
        assert_eq!(arbiter.in_flight(), 0);

        // 完成后同一身份可以再次应用
        let again = arbiter.apply(batch(vec![envelope("s1", vec![feedback("a")])])).await;
        assert!(again.sequences[0].was_admitted());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_inside_one_batch() {
        let handler = counting(10);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());
        let report = arbiter
            .apply(batch(vec![
                envelope("s1", vec![feedback("a")]),
                envelope("s1", vec![feedback("a")]),
            ]))
            .await;
        assert_eq!(report.already_applied_count(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applies_after_completion() {
        let handler = counting(500);
        let arbiter = arbiter(handler, ArbiterSettings::default());
        let a = feedback("a").with_delay_after_strategy(2.0);
        let report = arbiter.apply(batch(vec![envelope("s1", vec![a, feedback("b")])])).await;

        let records = &report.sequences[0].activities;
        assert_eq!(records.len(), 2);
        assert!(records[1].started >= records[0].finished + Duration::from_secs(2));
        assert!(records[0].elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_is_capped_and_sequence_completes() {
        let handler = counting(0);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());
        let a = feedback("a").with_delay_after_strategy(1e30);
        let report = arbiter.apply(batch(vec![envelope("s", vec![a, feedback("b")])])).await;

        let sequence = &report.sequences[0];
        assert!(sequence.was_admitted());
        let records = &sequence.activities;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.outcome.is_executed()));
        let gap = records[1].started - records[0].finished;
        assert!(gap >= Duration::from_secs(3600) && gap < Duration::from_secs(3601));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_does_not_block_other_sequences() {
        let handler = counting(0);
        let arbiter = arbiter(handler, ArbiterSettings::default());
        let start = Instant::now();
        let slow = envelope("slow", vec![feedback("a").with_delay_after_strategy(10.0), feedback("b")]);
        let fast = envelope("fast", vec![feedback("c")]);
        let report = arbiter.apply(batch(vec![slow, fast])).await;

        let fast_record = &report.sequences[1].activities[0];
        assert!(fast_record.finished < start + Duration::from_secs(1));
        assert!(report.sequences[0].activities[1].started >= start + Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_isolated_per_sequence() {
        let handler = counting(0);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());
        let report = arbiter
            .apply(batch(vec![
                envelope("broken", vec![feedback("fail-1")]),
                envelope("healthy", vec![feedback("a"), feedback("b")]),
            ]))
            .await;

        let broken = &report.sequences[0];
        assert!(matches!(
            broken.activities[0].outcome,
            ActivityOutcome::Failed(StrategyError::ActivityExecutionFailed { .. })
        ));
        let healthy = &report.sequences[1];
        assert!(healthy.activities.iter().all(|r| r.outcome.is_executed()));
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.executed_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_activity_does_not_stop_its_sequence() {
        let handler = counting(0);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());
        let report = arbiter
            .apply(batch(vec![envelope("s", vec![feedback("fail-1"), feedback("after")])]))
            .await;
        let records = &report.sequences[0].activities;
        assert!(records[0].outcome.is_failed());
        assert!(records[1].outcome.is_executed());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_nothing_is_skipped_not_executed() {
        let handler = counting(0);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());
        let report = arbiter
            .apply(batch(vec![envelope("idle", vec![StrategyActivity::do_nothing(None)])]))
            .await;
        assert!(matches!(
            report.sequences[0].activities[0].outcome,
            ActivityOutcome::Skipped(_)
        ));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.summary().skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_handler_reported_per_activity() {
        let arbiter = Arbiter::new(ActivityExecutor::new(HandlerRegistry::new(), 5), ArbiterSettings::default());
        let report = arbiter.apply(batch(vec![envelope("s", vec![feedback("a"), feedback("b")])])).await;
        let records = &report.sequences[0].activities;
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| matches!(r.outcome, ActivityOutcome::Failed(StrategyError::HandlerUnavailable { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_scope_assumption_serializes_overlapping_nodes() {
        let handler = counting(100);
        let arbiter = arbiter(handler.clone(), ArbiterSettings::default());
        let a = envelope("a", vec![feedback("a1")]).with_node_ids([4, 5]);
        let b = envelope("b", vec![feedback("b1")]).with_node_ids([5]);
        let c = envelope("c", vec![feedback("c1")]).with_node_ids([9]);
        let report = arbiter.apply(batch(vec![a, b, c])).await;

        let a1 = &report.sequences[0].activities[0];
        let b1 = &report.sequences[1].activities[0];
        let c1 = &report.sequences[2].activities[0];
        let (first, second) = if a1.started <= b1.started { (a1, b1) } else { (b1, a1) };
        assert!(second.started >= first.finished);
        // 不相交节点与其中一个并行
        assert!(c1.started < first.finished);
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_scope_assumption_holds_trailing_delay() {
        let handler = counting(0);
        let arbiter = arbiter(handler, ArbiterSettings::default());
        let a = envelope("a", vec![feedback("a1").with_delay_after_strategy(3.0)]).with_node_ids([1]);
        let b = envelope("b", vec![feedback("b1")]).with_node_ids([1]);
        let report = arbiter.apply(batch(vec![a, b])).await;

        let a1 = &report.sequences[0].activities[0];
        let b1 = &report.sequences[1].activities[0];
        let (first, second) = if a1.started <= b1.started { (a1, b1) } else { (b1, a1) };
        if first.activity == "a1" {
            assert!(second.started >= first.finished + Duration::from_secs(3));
        } else {
            assert!(second.started >= first.finished);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_serialization_can_be_disabled() {
        let handler = counting(100);
        let settings = ArbiterSettings {
            node_scoped_serialization: false,
            ..Default::default()
        };
        let arbiter = arbiter(handler.clone(), settings);
        let a = envelope("a", vec![feedback("a1")]).with_node_ids([1]);
        let b = envelope("b", vec![feedback("b1")]).with_node_ids([1]);
        arbiter.apply(batch(vec![a, b])).await;
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let handler = counting(100);
        let settings = ArbiterSettings {
            max_concurrent_activities: 1,
            ..Default::default()
        };
        let arbiter = arbiter(handler.clone(), settings);
        let envelopes = (0..4).map(|i| envelope(&format!("s{i}"), vec![feedback("x")])).collect();
        let report = arbiter.apply(batch(envelopes)).await;
        assert_eq!(report.executed_count(), 4);
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
    }
}

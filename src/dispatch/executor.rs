//! 活动执行器
//!
//! 持有 HandlerRegistry 与单次调用超时，execute(activity) 查找处理器并在超时内调用，
//! 结果映射为 StrategyError（HandlerUnavailable / HandlerTimeout / ActivityExecutionFailed）；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::Duration;

use tokio::time::{timeout, Instant};

use super::handler::HandlerRegistry;
use crate::core::StrategyError;
use crate::strategy::StrategyActivity;

pub struct ActivityExecutor {
    registry: HandlerRegistry,
    /// None 表示不限时
    timeout: Option<Duration>,
}

impl ActivityExecutor {
    /// timeout_secs 为 0 时不限时
    pub fn new(registry: HandlerRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    pub async fn execute(&self, activity: &StrategyActivity) -> Result<(), StrategyError> {
        let descriptor = activity.handler();
        let Some(handler) = self.registry.get(descriptor) else {
            audit(activity, "unavailable", 0);
            return Err(StrategyError::HandlerUnavailable {
                activity: activity.name().to_string(),
                handler: descriptor.to_string(),
            });
        };

        let start = Instant::now();
        let result = match self.timeout {
            Some(limit) => timeout(limit, handler.execute(activity)).await.ok(),
            None => Some(handler.execute(activity).await),
        };

        let outcome = match &result {
            Some(Ok(())) => "ok",
            Some(Err(_)) => "error",
            None => "timeout",
        };
        audit(activity, outcome, start.elapsed().as_millis() as u64);

        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(cause)) => Err(StrategyError::ActivityExecutionFailed {
                activity: activity.name().to_string(),
                cause,
            }),
            None => Err(StrategyError::HandlerTimeout {
                activity: activity.name().to_string(),
                timeout_secs: self.timeout.map(|d| d.as_secs()).unwrap_or_default(),
            }),
        }
    }
}

fn audit(activity: &StrategyActivity, outcome: &str, duration_ms: u64) {
    let audit = serde_json::json!({
        "event": "activity_audit",
        "activity": activity.name(),
        "kind": activity.kind().label(),
        "handler": activity.handler().as_str(),
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
    });
    tracing::info!(audit = %audit, "activity");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::ActivityHandler;
    use async_trait::async_trait;

    struct Scripted {
        fail: bool,
        sleep: Duration,
    }

    #[async_trait]
    impl ActivityHandler for Scripted {
        fn name(&self) -> &str {
            crate::strategy::DEFAULT_HANDLER
        }

        async fn execute(&self, _activity: &StrategyActivity) -> Result<(), String> {
            tokio::time::sleep(self.sleep).await;
            if self.fail {
                Err("simulator offline".into())
            } else {
                Ok(())
            }
        }
    }

    fn executor(fail: bool, sleep_secs: u64, timeout_secs: u64) -> ActivityExecutor {
        let mut registry = HandlerRegistry::new();
        registry.register(Scripted {
            fail,
            sleep: Duration::from_secs(sleep_secs),
        });
        ActivityExecutor::new(registry, timeout_secs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_and_failure_mapping() {
        let activity = StrategyActivity::feedback("fb", "hi").unwrap();
        assert_eq!(executor(false, 0, 5).execute(&activity).await, Ok(()));
        assert_eq!(
            executor(true, 0, 5).execute(&activity).await,
            Err(StrategyError::ActivityExecutionFailed {
                activity: "fb".into(),
                cause: "simulator offline".into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mapping() {
        let activity = StrategyActivity::feedback("fb", "hi").unwrap();
        assert_eq!(
            executor(false, 60, 5).execute(&activity).await,
            Err(StrategyError::HandlerTimeout {
                activity: "fb".into(),
                timeout_secs: 5,
            })
        );
        // 0 = 不限时
        assert_eq!(executor(false, 60, 0).execute(&activity).await, Ok(()));
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let executor = ActivityExecutor::new(HandlerRegistry::new(), 5);
        let activity = StrategyActivity::feedback("fb", "hi").unwrap();
        assert!(matches!(
            executor.execute(&activity).await,
            Err(StrategyError::HandlerUnavailable { handler, .. }) if handler == "DefaultStrategyHandler"
        ));
    }
}

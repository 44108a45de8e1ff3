//! 策略仲裁错误类型
//!
//! 构造期校验失败统一为 InvalidArgument；运行期执行失败记录为活动的 Outcome，不跨序列抛出；
//! AlreadyApplied / UnknownBatch 用于审批竞争与幂等，属于「报告」而非致命错误。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 仲裁核心可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StrategyError {
    /// 构造参数非法（空名称、空列表、未知活动类型等）
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 处理器执行失败或返回失败
    #[error("Activity '{activity}' failed: {cause}")]
    ActivityExecutionFailed { activity: String, cause: String },

    /// 处理器超时
    #[error("Activity '{activity}' timed out after {timeout_secs}s")]
    HandlerTimeout { activity: String, timeout_secs: u64 },

    /// 同一策略实例已在执行 / 批次已应用
    #[error("Already applied: {0}")]
    AlreadyApplied(String),

    /// 审批 / 拒绝时找不到待处理批次
    #[error("Unknown batch: {0}")]
    UnknownBatch(String),

    /// 活动引用的处理器未注册
    #[error("No handler '{handler}' available for activity '{activity}'")]
    HandlerUnavailable { activity: String, handler: String },

    /// 协调器邮箱已关闭（会话结束或关闭中）
    #[error("Coordinator stopped")]
    CoordinatorStopped,
}

impl StrategyError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// 是否为审批竞争类的非致命结果
    pub fn is_idempotent_race(&self) -> bool {
        matches!(self, Self::AlreadyApplied(_) | Self::UnknownBatch(_))
    }

    /// 是否属于活动执行层面的失败（会被记录到 Outcome）
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::ActivityExecutionFailed { .. }
                | Self::HandlerTimeout { .. }
                | Self::HandlerUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StrategyError::AlreadyApplied("x".into()).is_idempotent_race());
        assert!(StrategyError::UnknownBatch("x".into()).is_idempotent_race());
        assert!(!StrategyError::invalid("bad").is_idempotent_race());

        let failed = StrategyError::ActivityExecutionFailed {
            activity: "a".into(),
            cause: "boom".into(),
        };
        assert!(failed.is_execution_failure());
        assert!(!StrategyError::CoordinatorStopped.is_execution_failure());
    }

    #[test]
    fn test_error_serializes_with_kind_tag() {
        let err = StrategyError::HandlerUnavailable {
            activity: "fb".into(),
            handler: "Missing".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "handler_unavailable");
        assert_eq!(json["detail"]["handler"], "Missing");
        assert!(err.to_string().contains("Missing"));
    }
}

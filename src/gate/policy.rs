//! 授权策略：决定某个原因的批次是直接应用还是等待评估员批准
//!
//! 策略由外部注入（`Arc<dyn AuthorizationPolicy>`）；内置 automatic / manual / per_reason 三种，
//! 由 `[authorization]` 配置段选择。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AuthorizationMode, AuthorizationSection, PendingTimeoutAction};

/// 授权策略能力
pub trait AuthorizationPolicy: Send + Sync {
    /// 策略名（日志用）
    fn name(&self) -> &str;

    /// 该原因的批次是否需要人工批准；evaluator 为提交者
    fn requires_approval(&self, reason: &str, evaluator: Option<&str>) -> bool;
}

/// 全部自动应用
#[derive(Debug, Default)]
pub struct AutomaticPolicy;

impl AuthorizationPolicy for AutomaticPolicy {
    fn name(&self) -> &str {
        "automatic"
    }

    fn requires_approval(&self, _reason: &str, _evaluator: Option<&str>) -> bool {
        false
    }
}

/// 系统提交的批次全部等待批准；评估员本人提交的视为已授权
#[derive(Debug, Default)]
pub struct ManualPolicy;

impl AuthorizationPolicy for ManualPolicy {
    fn name(&self) -> &str {
        "manual"
    }

    fn requires_approval(&self, _reason: &str, evaluator: Option<&str>) -> bool {
        evaluator.is_none()
    }
}

/// 仅列出的原因需要批准
#[derive(Debug, Default)]
pub struct PerReasonPolicy {
    gated: HashSet<String>,
}

impl PerReasonPolicy {
    pub fn new(reasons: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            gated: reasons.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuthorizationPolicy for PerReasonPolicy {
    fn name(&self) -> &str {
        "per_reason"
    }

    fn requires_approval(&self, reason: &str, evaluator: Option<&str>) -> bool {
        evaluator.is_none() && self.gated.contains(reason)
    }
}

/// 按配置构造策略
pub fn policy_from_config(section: &AuthorizationSection) -> Arc<dyn AuthorizationPolicy> {
    match section.mode {
        AuthorizationMode::Automatic => Arc::new(AutomaticPolicy),
        AuthorizationMode::Manual => Arc::new(ManualPolicy),
        AuthorizationMode::PerReason => {
            if section.gated_reasons.is_empty() {
                tracing::warn!("per_reason authorization configured without gated reasons; every batch auto-applies");
            }
            Arc::new(PerReasonPolicy::new(section.gated_reasons.iter().cloned()))
        }
    }
}

/// 待批批次的超时处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingTimeout {
    /// 无限期等待
    #[default]
    Never,
    Reject(Duration),
    Apply(Duration),
}

impl PendingTimeout {
    pub fn from_config(section: &AuthorizationSection) -> Self {
        match (section.pending_timeout_secs, section.on_pending_timeout) {
            (None, _) => PendingTimeout::Never,
            (Some(secs), PendingTimeoutAction::Reject) => PendingTimeout::Reject(Duration::from_secs(secs)),
            (Some(secs), PendingTimeoutAction::Apply) => PendingTimeout::Apply(Duration::from_secs(secs)),
        }
    }

    pub fn after(&self) -> Option<Duration> {
        match self {
            PendingTimeout::Never => None,
            PendingTimeout::Reject(d) | PendingTimeout::Apply(d) => Some(*d),
        }
    }
}

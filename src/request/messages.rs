//! 网关与调度器之间、以及对外广播使用的消息类型

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::envelope::StrategyToApply;
use crate::core::StrategyError;
use crate::strategy::Strategy;

/// 提交授权的批次：触发原因 → 有序的待应用策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AuthorizeRepr")]
pub struct AuthorizeStrategiesRequest {
    reason_to_strategies: BTreeMap<String, Vec<StrategyToApply>>,
    evaluator: Option<String>,
}

#[derive(Deserialize)]
struct AuthorizeRepr {
    #[serde(default)]
    reason_to_strategies: Option<BTreeMap<String, Vec<StrategyToApply>>>,
    #[serde(default)]
    evaluator: Option<String>,
}

impl TryFrom<AuthorizeRepr> for AuthorizeStrategiesRequest {
    type Error = StrategyError;

    fn try_from(repr: AuthorizeRepr) -> Result<Self, Self::Error> {
        let map = repr
            .reason_to_strategies
            .ok_or_else(|| StrategyError::invalid("The strategies map can't be null."))?;
        Self::new(map, repr.evaluator)
    }
}

impl AuthorizeStrategiesRequest {
    /// map 可以为空，但原因键不能为空白，且每个信封的 trigger 必须与所在的原因键一致
    pub fn new(
        reason_to_strategies: BTreeMap<String, Vec<StrategyToApply>>,
        evaluator: Option<String>,
    ) -> Result<Self, StrategyError> {
        for (reason, strategies) in &reason_to_strategies {
            if reason.trim().is_empty() {
                return Err(StrategyError::invalid(format!(
                    "The trigger reason '{reason}' can't be blank."
                )));
            }
            if let Some(stray) = strategies.iter().find(|s| s.trigger() != reason.as_str()) {
                return Err(StrategyError::invalid(format!(
                    "Strategy '{}' has trigger '{}' but was submitted under reason '{reason}'.",
                    stray.strategy().name(),
                    stray.trigger()
                )));
            }
        }
        Ok(Self {
            reason_to_strategies,
            evaluator: evaluator.filter(|e| !e.trim().is_empty()),
        })
    }

    /// 单个原因的便捷构造
    pub fn single(
        reason: impl Into<String>,
        strategies: Vec<StrategyToApply>,
        evaluator: Option<String>,
    ) -> Result<Self, StrategyError> {
        Self::new(BTreeMap::from([(reason.into(), strategies)]), evaluator)
    }

    pub fn reason_to_strategies(&self) -> &BTreeMap<String, Vec<StrategyToApply>> {
        &self.reason_to_strategies
    }

    pub fn evaluator(&self) -> Option<&str> {
        self.evaluator.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.reason_to_strategies.values().all(Vec::is_empty)
    }

    pub fn into_parts(self) -> (BTreeMap<String, Vec<StrategyToApply>>, Option<String>) {
        (self.reason_to_strategies, self.evaluator)
    }
}

/// 已授权、交给调度器执行的批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ApplyRepr")]
pub struct ApplyStrategies {
    strategies: Vec<StrategyToApply>,
    evaluator: Option<String>,
    /// true：来自场景作者定义的触发（如任务条件），而非教学模型请求路径
    scenario_support: bool,
}

#[derive(Deserialize)]
struct ApplyRepr {
    #[serde(default)]
    strategies: Option<Vec<StrategyToApply>>,
    #[serde(default)]
    evaluator: Option<String>,
    #[serde(default)]
    scenario_support: bool,
}

impl TryFrom<ApplyRepr> for ApplyStrategies {
    type Error = StrategyError;

    fn try_from(repr: ApplyRepr) -> Result<Self, Self::Error> {
        let strategies = repr
            .strategies
            .ok_or_else(|| StrategyError::invalid("The strategies list can't be null."))?;
        Ok(Self::new(strategies, repr.evaluator, repr.scenario_support))
    }
}

impl ApplyStrategies {
    pub fn new(strategies: Vec<StrategyToApply>, evaluator: Option<String>, scenario_support: bool) -> Self {
        Self {
            strategies,
            evaluator: evaluator.filter(|e| !e.trim().is_empty()),
            scenario_support,
        }
    }

    pub fn strategies(&self) -> &[StrategyToApply] {
        &self.strategies
    }

    pub fn evaluator(&self) -> Option<&str> {
        self.evaluator.as_deref()
    }

    pub fn is_scenario_support(&self) -> bool {
        self.scenario_support
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn into_strategies(self) -> Vec<StrategyToApply> {
        self.strategies
    }
}

/// 失败的单个活动，按原因归档到状态更新中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFailure {
    pub strategy: String,
    pub activity: String,
    pub error: StrategyError,
}

/// 因同一身份已在途而未执行的策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefusedStrategy {
    pub strategy: String,
    pub evaluator: Option<String>,
    pub error: StrategyError,
}

/// 广播给观察者的时点状态（按原因分组）；所有 map 缺省为空
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategyStateUpdate {
    #[serde(default)]
    pub applied_strategies: BTreeMap<String, Vec<Strategy>>,
    #[serde(default)]
    pub pending_strategies: BTreeMap<String, Vec<Strategy>>,
    #[serde(default)]
    pub failed_strategies: BTreeMap<String, Vec<ActivityFailure>>,
    /// 既有执行成功也有执行失败的原因
    #[serde(default)]
    pub partially_failed: BTreeSet<String>,
    /// 重复提交被拒绝（AlreadyApplied）的策略，不计入 applied
    #[serde(default)]
    pub refused_strategies: BTreeMap<String, Vec<RefusedStrategy>>,
    #[serde(default)]
    pub evaluator: Option<String>,
}

impl StrategyStateUpdate {
    pub fn is_empty(&self) -> bool {
        self.applied_strategies.is_empty()
            && self.pending_strategies.is_empty()
            && self.failed_strategies.is_empty()
            && self.refused_strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyActivity;

    fn envelope(trigger: &str) -> StrategyToApply {
        let strategy = Strategy::single(StrategyActivity::feedback("s1", "msg").unwrap());
        StrategyToApply::new(strategy, trigger, None).unwrap()
    }

    #[test]
    fn test_null_strategies_map_rejected() {
        let err = serde_json::from_str::<AuthorizeStrategiesRequest>(r#"{"evaluator": null}"#);
        assert!(err.is_err());

        let empty: AuthorizeStrategiesRequest =
            serde_json::from_str(r#"{"reason_to_strategies": {}}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_blank_reason_rejected() {
        let map = BTreeMap::from([(" ".to_string(), vec![envelope("t")])]);
        assert!(AuthorizeStrategiesRequest::new(map, None).is_err());
    }

    #[test]
    fn test_trigger_must_match_reason() {
        let map = BTreeMap::from([("collision".to_string(), vec![envelope("collision"), envelope("other-trigger")])]);
        assert!(matches!(
            AuthorizeStrategiesRequest::new(map, None),
            Err(StrategyError::InvalidArgument(_))
        ));

        let json = serde_json::json!({
            "reason_to_strategies": {"collision": [envelope("other-trigger")]}
        });
        assert!(serde_json::from_value::<AuthorizeStrategiesRequest>(json).is_err());

        let ok = AuthorizeStrategiesRequest::single("collision", vec![envelope("collision")], None).unwrap();
        assert_eq!(ok.reason_to_strategies()["collision"].len(), 1);
    }

    #[test]
    fn test_apply_requires_list() {
        assert!(serde_json::from_str::<ApplyStrategies>(r#"{"scenario_support": true}"#).is_err());
        let apply: ApplyStrategies =
            serde_json::from_str(r#"{"strategies": [], "scenario_support": true}"#).unwrap();
        assert!(apply.is_empty());
        assert!(apply.is_scenario_support());
    }

    #[test]
    fn test_state_update_defaults_to_empty_maps() {
        let update: StrategyStateUpdate = serde_json::from_str("{}").unwrap();
        assert!(update.is_empty());

        let json = r#"{"failed_strategies": {"low-score": [
            {"strategy": "s1", "activity": "s1", "error": {"kind": "invalid_argument", "detail": "boom"}}
        ]}}"#;
        let update: StrategyStateUpdate = serde_json::from_str(json).unwrap();
        assert!(!update.is_empty());
        assert!(update.applied_strategies.is_empty());
        assert_eq!(update.failed_strategies["low-score"][0].error, StrategyError::invalid("boom"));
    }
}

//! 策略集合构建器
//!
//! 一个决策周期产生的零到多个活动组成 StrategySet，并附带选出这些活动时的压力 / 难度上下文。

use serde::{Deserialize, Serialize};

use super::activity::StrategyActivity;
use super::stress::clamp_stress;
use super::types::Strategy;
use crate::core::StrategyError;

/// 一个决策周期的活动集合（可以为空）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "StrategySetRepr")]
pub struct StrategySet {
    activities: Vec<StrategyActivity>,
    stress: Option<f64>,
    difficulty: Option<f64>,
}

#[derive(Deserialize)]
struct StrategySetRepr {
    #[serde(default)]
    activities: Option<Vec<StrategyActivity>>,
    #[serde(default)]
    stress: Option<f64>,
    #[serde(default)]
    difficulty: Option<f64>,
}

/// 反序列化同样经过构建器：列表不能为 null，压力钳制，非有限难度丢弃
impl TryFrom<StrategySetRepr> for StrategySet {
    type Error = StrategyError;

    fn try_from(repr: StrategySetRepr) -> Result<Self, Self::Error> {
        let activities = repr
            .activities
            .ok_or_else(|| StrategyError::invalid("The strategy set activity list can't be null."))?;
        let mut builder = StrategySet::builder().activities(activities);
        if let Some(stress) = repr.stress {
            builder = builder.stress(stress);
        }
        if let Some(difficulty) = repr.difficulty {
            builder = builder.difficulty(difficulty);
        }
        Ok(builder.build())
    }
}

impl StrategySet {
    pub fn builder() -> StrategySetBuilder {
        StrategySetBuilder::default()
    }

    pub fn activities(&self) -> &[StrategyActivity] {
        &self.activities
    }

    pub fn stress(&self) -> Option<f64> {
        self.stress
    }

    pub fn difficulty(&self) -> Option<f64> {
        self.difficulty
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// 转为具名策略；空集合显式变成一个 DoNothing 活动，而不是被丢弃
    pub fn into_strategy(self, name: &str) -> Result<Strategy, StrategyError> {
        let activities = if self.activities.is_empty() {
            vec![StrategyActivity::do_nothing(Some(name))]
        } else {
            self.activities
        };
        Strategy::new(name, activities, self.stress)
    }
}

/// StrategySet 构建器
#[derive(Debug, Default)]
pub struct StrategySetBuilder {
    activities: Vec<StrategyActivity>,
    stress: Option<f64>,
    difficulty: Option<f64>,
}

impl StrategySetBuilder {
    /// 追加单个活动
    pub fn activity(mut self, activity: StrategyActivity) -> Self {
        self.activities.push(activity);
        self
    }

    /// 追加一个策略的全部活动（保持顺序）
    pub fn strategy(mut self, strategy: &Strategy) -> Self {
        self.activities.extend(strategy.activities().iter().cloned());
        self
    }

    pub fn activities(mut self, activities: impl IntoIterator<Item = StrategyActivity>) -> Self {
        self.activities.extend(activities);
        self
    }

    /// 聚合压力（钳制到平台区间）
    pub fn stress(mut self, stress: f64) -> Self {
        self.stress = Some(stress);
        self
    }

    pub fn difficulty(mut self, difficulty: f64) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn build(self) -> StrategySet {
        StrategySet {
            activities: self.activities,
            stress: clamp_stress(self.stress),
            difficulty: self.difficulty.filter(|d| d.is_finite()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_is_allowed() {
        let set = StrategySet::builder().build();
        assert!(set.is_empty());
        assert_eq!(set.stress(), None);
        assert_eq!(set.difficulty(), None);
    }

    #[test]
    fn test_builder_collects_context() {
        let fb = StrategyActivity::feedback("fb", "hi").unwrap();
        let set = StrategySet::builder()
            .activity(fb.clone())
            .activities(vec![StrategyActivity::do_nothing(None)])
            .stress(5.0)
            .difficulty(0.7)
            .build();
        assert_eq!(set.len(), 2);
        assert_eq!(set.activities()[0], fb);
        assert_eq!(set.stress(), Some(1.0));
        assert_eq!(set.difficulty(), Some(0.7));
    }

    #[test]
    fn test_empty_set_becomes_do_nothing_strategy() {
        let strategy = StrategySet::builder().build().into_strategy("idle").unwrap();
        assert_eq!(strategy.activities().len(), 1);
        assert!(strategy.activities()[0].kind().is_do_nothing());
        assert_eq!(strategy.activities()[0].name(), "idle");
    }

    #[test]
    fn test_deserialize_goes_through_builder() {
        let set: StrategySet = serde_json::from_str(r#"{"activities": [], "stress": 7.5}"#).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.stress(), Some(1.0));

        assert!(serde_json::from_str::<StrategySet>(r#"{"activities": null}"#).is_err());
        assert!(serde_json::from_str::<StrategySet>(r#"{"stress": 0.2}"#).is_err());
    }

    #[test]
    fn test_set_from_strategy_keeps_order() {
        let s = Strategy::new(
            "s",
            vec![
                StrategyActivity::feedback("first", "1").unwrap(),
                StrategyActivity::feedback("second", "2").unwrap(),
            ],
            None,
        )
        .unwrap();
        let set = StrategySet::builder().strategy(&s).build();
        let names: Vec<_> = set.activities().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}

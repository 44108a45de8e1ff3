//! 策略：具名、有序、至少一个活动；可带策略级压力覆盖

use serde::{Deserialize, Serialize};

use super::activity::StrategyActivity;
use super::definition::StrategyDefinition;
use super::stress::clamp_stress;
use crate::core::StrategyError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StrategyRepr")]
pub struct Strategy {
    name: String,
    activities: Vec<StrategyActivity>,
    stress: Option<f64>,
}

#[derive(Deserialize)]
struct StrategyRepr {
    name: String,
    activities: Vec<StrategyActivity>,
    #[serde(default)]
    stress: Option<f64>,
}

impl TryFrom<StrategyRepr> for Strategy {
    type Error = StrategyError;

    fn try_from(repr: StrategyRepr) -> Result<Self, Self::Error> {
        Strategy::new(repr.name, repr.activities, repr.stress)
    }
}

impl Strategy {
    /// 策略级压力（钳制后）覆盖到每个活动
    pub fn new(
        name: impl Into<String>,
        activities: Vec<StrategyActivity>,
        stress: Option<f64>,
    ) -> Result<Self, StrategyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StrategyError::invalid("The strategy name can't be empty."));
        }
        if activities.is_empty() {
            return Err(StrategyError::invalid(format!(
                "Strategy '{name}' must contain at least one activity."
            )));
        }
        let stress = clamp_stress(stress);
        let activities = match stress {
            Some(_) => activities.into_iter().map(|a| a.with_stress(stress)).collect(),
            None => activities,
        };
        Ok(Self {
            name,
            activities,
            stress,
        })
    }

    /// 单活动策略的简写
    pub fn single(activity: StrategyActivity) -> Self {
        Self {
            name: activity.name().to_string(),
            stress: activity.stress(),
            activities: vec![activity],
        }
    }

    /// 由作者定义 + 触发原因构建
    pub fn from_definition(definition: &StrategyDefinition, trigger: &str) -> Result<Self, StrategyError> {
        let activities = definition.to_activities(trigger)?;
        Self::new(definition.name.clone(), activities, definition.stress)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn activities(&self) -> &[StrategyActivity] {
        &self.activities
    }

    pub fn stress(&self) -> Option<f64> {
        self.stress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_requires_activities_and_name() {
        assert!(Strategy::new("s", vec![], None).is_err());
        let fb = StrategyActivity::feedback("fb", "hi").unwrap();
        assert!(Strategy::new("", vec![fb], None).is_err());
    }

    #[test]
    fn test_strategy_stress_overrides_activities() {
        let a = StrategyActivity::feedback("a", "one").unwrap().with_stress(Some(0.1));
        let b = StrategyActivity::feedback("b", "two").unwrap();
        let s = Strategy::new("s", vec![a, b], Some(-3.0)).unwrap();
        assert_eq!(s.stress(), Some(-1.0));
        assert!(s.activities().iter().all(|a| a.stress() == Some(-1.0)));
    }

    #[test]
    fn test_strategy_without_override_keeps_activity_stress() {
        let a = StrategyActivity::feedback("a", "one").unwrap().with_stress(Some(0.4));
        let s = Strategy::new("s", vec![a], None).unwrap();
        assert_eq!(s.activities()[0].stress(), Some(0.4));
    }

    #[test]
    fn test_from_definition() {
        let def: StrategyDefinition = serde_json::from_str(
            r#"{"name": "Hint", "activities": [{"type": "instructional_intervention", "feedback": {"message": "Look left"}}]}"#,
        )
        .unwrap();
        let s = Strategy::from_definition(&def, "missed-contact").unwrap();
        assert_eq!(s.name(), "Hint");
        assert_eq!(s.activities().len(), 1);

        let empty: StrategyDefinition = serde_json::from_str(r#"{"name": "Empty"}"#).unwrap();
        assert!(Strategy::from_definition(&empty, "t").is_err());
    }
}

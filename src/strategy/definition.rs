//! 场景作者定义的原始策略（已解析的 JSON / TOML 结构）到类型化活动的转换
//!
//! 未知的活动种类是作者错误：直接返回 InvalidArgument，绝不静默跳过。

use serde::{Deserialize, Serialize};

use super::activity::{
    ActivityKind, AdaptationPayload, AssessmentPayload, FeedbackPayload, HandlerDescriptor,
    MediaItem, StrategyActivity,
};
use super::stress::StressCategory;
use crate::core::StrategyError;

/// 作者定义的策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    /// 策略级压力值，覆盖到每个活动
    #[serde(default)]
    pub stress: Option<f64>,
    /// 允许出现 null 以便如实报告作者错误
    #[serde(default)]
    pub activities: Vec<Option<ActivityDefinition>>,
}

/// 作者定义的单个活动
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDefinition {
    #[serde(flatten)]
    pub content: ActivityContent,
    #[serde(default)]
    pub delay_after_strategy: Option<DelayDefinition>,
    /// 处理器实现名，缺省使用 DefaultStrategyHandler
    #[serde(default)]
    pub handler: Option<String>,
}

/// 策略后延迟描述；duration 缺失视为 0
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelayDefinition {
    #[serde(default)]
    pub duration: Option<f64>,
}

/// 作者可定义的四类活动；其余一律落入 Unknown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityContent {
    InstructionalIntervention {
        feedback: Option<FeedbackPayload>,
    },
    MidLessonMedia {
        #[serde(default)]
        media: Option<Vec<MediaItem>>,
    },
    ScenarioAdaptation {
        adaptation: String,
        #[serde(default)]
        parameters: serde_json::Value,
        #[serde(default)]
        stress_category: Option<StressCategory>,
    },
    PerformanceAssessment {
        #[serde(default)]
        node_id: Option<u32>,
        #[serde(default)]
        conversation: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl StrategyDefinition {
    /// 为触发原因 trigger 生成类型化活动列表（保持作者顺序）
    pub fn to_activities(&self, trigger: &str) -> Result<Vec<StrategyActivity>, StrategyError> {
        if self.name.trim().is_empty() {
            return Err(StrategyError::invalid(format!(
                "The strategy name can't be empty (trigger '{trigger}')."
            )));
        }

        self.activities
            .iter()
            .enumerate()
            .map(|(index, activity)| {
                let activity = activity.as_ref().ok_or_else(|| {
                    StrategyError::invalid(format!(
                        "Strategy '{}' has a null activity at position {index} (trigger '{trigger}').",
                        self.name
                    ))
                })?;
                self.build_activity(activity, trigger)
            })
            .collect()
    }

    fn build_activity(
        &self,
        definition: &ActivityDefinition,
        trigger: &str,
    ) -> Result<StrategyActivity, StrategyError> {
        let kind = match &definition.content {
            ActivityContent::InstructionalIntervention { feedback } => {
                let feedback = feedback.clone().ok_or_else(|| {
                    StrategyError::invalid(format!(
                        "Instructional intervention in strategy '{}' has no feedback.",
                        self.name
                    ))
                })?;
                ActivityKind::Feedback(feedback)
            }
            ActivityContent::MidLessonMedia { media } => {
                let media = media.clone().ok_or_else(|| {
                    StrategyError::invalid(format!(
                        "Mid lesson media in strategy '{}' has no media list.",
                        self.name
                    ))
                })?;
                ActivityKind::MidLessonMedia(media)
            }
            ActivityContent::ScenarioAdaptation {
                adaptation,
                parameters,
                stress_category,
            } => ActivityKind::ScenarioAdaptation(AdaptationPayload {
                adaptation: adaptation.clone(),
                parameters: parameters.clone(),
                stress_category: *stress_category,
            }),
            ActivityContent::PerformanceAssessment { node_id, conversation } => {
                ActivityKind::PerformanceAssessment(AssessmentPayload {
                    node_id: *node_id,
                    conversation: conversation.clone(),
                })
            }
            ActivityContent::Unknown => {
                return Err(StrategyError::invalid(format!(
                    "Found unhandled strategy activity type in strategy '{}' for trigger '{trigger}'.",
                    self.name
                )));
            }
        };

        let handler = match &definition.handler {
            Some(implementation) => HandlerDescriptor::new(implementation.clone())?,
            None => HandlerDescriptor::default(),
        };

        let delay = definition
            .delay_after_strategy
            .as_ref()
            .and_then(|d| d.duration)
            .unwrap_or(0.0);

        Ok(StrategyActivity::new(self.name.clone(), kind, handler)?
            .with_stress(self.stress)
            .with_delay_after_strategy(delay))
    }
}

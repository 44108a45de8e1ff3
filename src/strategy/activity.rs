//! 策略活动：封闭的活动种类枚举 + 通用属性（名称、压力、策略后延迟、处理器描述）
//!
//! 所有构造路径（包括反序列化）都经过 `StrategyActivity::new` 校验，因此拿到的活动必定满足：
//! 名称非空、处理器非空、媒体列表非空、压力在平台区间内、延迟非负。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::branch::BranchAdaptation;
use super::stress::{clamp_stress, StressCategory};
use crate::core::StrategyError;

/// 未指定处理器时使用的默认实现
pub const DEFAULT_HANDLER: &str = "DefaultStrategyHandler";

/// 分支适配策略的固定名称
pub const BRANCH_ADAPTATION_NAME: &str = "BranchAdaptationStrategy";

/// 「什么都不做」活动的默认名称
pub const DO_NOTHING_NAME: &str = "DoNothing";

/// 策略后延迟上限（秒），超出部分截断
pub const MAX_DELAY_AFTER_STRATEGY: f64 = 3600.0;

/// 处理器描述：指向外部执行实现的名字，不能为空
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HandlerDescriptor(String);

impl HandlerDescriptor {
    pub fn new(implementation: impl Into<String>) -> Result<Self, StrategyError> {
        let implementation = implementation.into();
        if implementation.trim().is_empty() {
            return Err(StrategyError::invalid("The strategy handler can't be empty."));
        }
        Ok(Self(implementation))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for HandlerDescriptor {
    fn default() -> Self {
        Self(DEFAULT_HANDLER.to_string())
    }
}

impl TryFrom<String> for HandlerDescriptor {
    type Error = StrategyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HandlerDescriptor> for String {
    fn from(value: HandlerDescriptor) -> Self {
        value.0
    }
}

impl fmt::Display for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 教学干预（反馈）内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub message: String,
    /// 展示方式（如 banner / avatar / audio），None 表示由处理器决定
    #[serde(default)]
    pub display_mode: Option<String>,
}

/// 情景适配（环境变化）内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationPayload {
    /// 适配类型，如 fog / rain / teleport / create_actors
    pub adaptation: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub stress_category: Option<StressCategory>,
}

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Webpage,
    LocalWebpage,
    Slideshow,
    Video,
    Youtube,
    Pdf,
    Image,
}

/// 课中媒体条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub name: String,
    pub uri: String,
    pub kind: MediaKind,
}

/// 请求一次表现评估
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssessmentPayload {
    /// 目标任务 / 概念节点
    #[serde(default)]
    pub node_id: Option<u32>,
    /// 以对话（conversation）形式评估时的引用
    #[serde(default)]
    pub conversation: Option<String>,
}

/// 活动种类（封闭集合，编译期穷尽匹配）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ActivityKind {
    Feedback(FeedbackPayload),
    ScenarioAdaptation(AdaptationPayload),
    MidLessonMedia(Vec<MediaItem>),
    PerformanceAssessment(AssessmentPayload),
    DoNothing,
    BranchAdaptation(BranchAdaptation),
}

impl ActivityKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::Feedback(_) => "feedback",
            ActivityKind::ScenarioAdaptation(_) => "scenario_adaptation",
            ActivityKind::MidLessonMedia(_) => "mid_lesson_media",
            ActivityKind::PerformanceAssessment(_) => "performance_assessment",
            ActivityKind::DoNothing => "do_nothing",
            ActivityKind::BranchAdaptation(_) => "branch_adaptation",
        }
    }

    pub fn is_do_nothing(&self) -> bool {
        matches!(self, ActivityKind::DoNothing)
    }

    fn validate(&self) -> Result<(), StrategyError> {
        match self {
            ActivityKind::MidLessonMedia(media) if media.is_empty() => Err(StrategyError::invalid(
                "The mid lesson media list must contain at least one media item.",
            )),
            ActivityKind::Feedback(payload) if payload.message.trim().is_empty() => {
                Err(StrategyError::invalid("The feedback message can't be empty."))
            }
            ActivityKind::ScenarioAdaptation(payload) if payload.adaptation.trim().is_empty() => {
                Err(StrategyError::invalid("The scenario adaptation type can't be empty."))
            }
            _ => Ok(()),
        }
    }
}

/// 单个可执行的策略活动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActivityRepr")]
pub struct StrategyActivity {
    name: String,
    #[serde(flatten)]
    kind: ActivityKind,
    stress: Option<f64>,
    delay_after_strategy: f64,
    handler: HandlerDescriptor,
}

#[derive(Deserialize)]
struct ActivityRepr {
    name: String,
    #[serde(flatten)]
    kind: ActivityKind,
    #[serde(default)]
    stress: Option<f64>,
    #[serde(default)]
    delay_after_strategy: f64,
    #[serde(default)]
    handler: HandlerDescriptor,
}

impl TryFrom<ActivityRepr> for StrategyActivity {
    type Error = StrategyError;

    fn try_from(repr: ActivityRepr) -> Result<Self, Self::Error> {
        Ok(StrategyActivity::new(repr.name, repr.kind, repr.handler)?
            .with_stress(repr.stress)
            .with_delay_after_strategy(repr.delay_after_strategy))
    }
}

impl StrategyActivity {
    /// 名称不能为空；种类自身的约束（如媒体非空）同时校验
    pub fn new(
        name: impl Into<String>,
        kind: ActivityKind,
        handler: HandlerDescriptor,
    ) -> Result<Self, StrategyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StrategyError::invalid("The strategy name can't be empty."));
        }
        kind.validate()?;
        Ok(Self {
            name,
            kind,
            stress: None,
            delay_after_strategy: 0.0,
            handler,
        })
    }

    pub fn feedback(name: impl Into<String>, message: impl Into<String>) -> Result<Self, StrategyError> {
        Self::new(
            name,
            ActivityKind::Feedback(FeedbackPayload {
                message: message.into(),
                display_mode: None,
            }),
            HandlerDescriptor::default(),
        )
    }

    /// media 为 None 或空列表都视为非法：什么都不展示的媒体策略没有意义
    pub fn mid_lesson_media(
        name: impl Into<String>,
        media: Option<Vec<MediaItem>>,
    ) -> Result<Self, StrategyError> {
        let media = media.ok_or_else(|| StrategyError::invalid("The media list can't be null."))?;
        Self::new(name, ActivityKind::MidLessonMedia(media), HandlerDescriptor::default())
    }

    pub fn do_nothing(name: Option<&str>) -> Self {
        Self {
            name: name.unwrap_or(DO_NOTHING_NAME).to_string(),
            kind: ActivityKind::DoNothing,
            stress: None,
            delay_after_strategy: 0.0,
            handler: HandlerDescriptor::default(),
        }
    }

    pub fn branch_adaptation(adaptation: BranchAdaptation) -> Self {
        Self {
            name: BRANCH_ADAPTATION_NAME.to_string(),
            kind: ActivityKind::BranchAdaptation(adaptation),
            stress: None,
            delay_after_strategy: 0.0,
            handler: HandlerDescriptor::default(),
        }
    }

    /// 压力值钳制到平台区间；None 保持未设置
    pub fn with_stress(mut self, stress: Option<f64>) -> Self {
        self.stress = clamp_stress(stress);
        self
    }

    /// 负值与 NaN 被忽略（保持原值），不是错误；超过上限的值截断到 MAX_DELAY_AFTER_STRATEGY
    pub fn with_delay_after_strategy(mut self, seconds: f64) -> Self {
        if seconds.is_nan() || seconds < 0.0 {
            return self;
        }
        if seconds > MAX_DELAY_AFTER_STRATEGY {
            tracing::warn!(
                activity = %self.name,
                requested = seconds,
                "delay after strategy capped at {} seconds",
                MAX_DELAY_AFTER_STRATEGY
            );
        }
        self.delay_after_strategy = seconds.min(MAX_DELAY_AFTER_STRATEGY);
        self
    }

    pub fn with_handler(mut self, handler: HandlerDescriptor) -> Self {
        self.handler = handler;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ActivityKind {
        &self.kind
    }

    pub fn stress(&self) -> Option<f64> {
        self.stress
    }

    pub fn delay_after_strategy(&self) -> f64 {
        self.delay_after_strategy
    }

    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_after_strategy).unwrap_or_default()
    }

    pub fn handler(&self) -> &HandlerDescriptor {
        &self.handler
    }
}

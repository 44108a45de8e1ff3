//! 策略模型：活动种类、压力、作者定义转换、分支适配子模型、策略集合

pub mod activity;
pub mod branch;
pub mod definition;
pub mod set;
pub mod stress;
pub mod types;

pub use activity::{
    ActivityKind, AdaptationPayload, AssessmentPayload, FeedbackPayload, HandlerDescriptor,
    MediaItem, MediaKind, StrategyActivity, DEFAULT_HANDLER, MAX_DELAY_AFTER_STRATEGY,
};
pub use branch::{
    AdvancementConcept, AdvancementInfo, BranchAdaptation, MerrillQuadrant, MetadataAttributeItem,
    ProgressionInfo, RemediationConcept, RemediationInfo,
};
pub use definition::{ActivityContent, ActivityDefinition, DelayDefinition, StrategyDefinition};
pub use set::{StrategySet, StrategySetBuilder};
pub use stress::{clamp_stress, StressCategory, MAX_STRESS, MIN_STRESS};
pub use types::Strategy;

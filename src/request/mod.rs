//! 请求信封层

pub mod envelope;
pub mod messages;

pub use envelope::{ApplicationKey, StrategyToApply};
pub use messages::{
    ActivityFailure, ApplyStrategies, AuthorizeStrategiesRequest, RefusedStrategy, StrategyStateUpdate,
};

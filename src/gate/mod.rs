//! 授权闸门：策略能力 + 待批 / 已应用状态机

pub mod authorizer;
pub mod policy;

pub use authorizer::{AuthorizationGate, BatchResolution, GateDecision, PendingExpiry};
pub use policy::{
    policy_from_config, AuthorizationPolicy, AutomaticPolicy, ManualPolicy, PendingTimeout,
    PerReasonPolicy,
};

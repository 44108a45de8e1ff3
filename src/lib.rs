//! Strategy Arbiter - 训练会话中的自适应教学策略仲裁与调度核心
//!
//! 模块划分：
//! - **strategy**: 策略模型（活动种类、压力、作者定义转换、分支适配、策略集合）
//! - **request**: 请求信封（StrategyToApply、授权请求、执行批次、状态更新）
//! - **gate**: 授权闸门（授权策略、待批 / 已应用状态机、超时策略）
//! - **dispatch**: 调度仲裁（处理器注册、执行器、节点互斥、批次执行）
//! - **broadcast**: 状态广播（state_update / activity_completed / batch_completed）
//! - **core**: 错误、单写者协调器、状态账本、关闭管理
//! - **config**: 配置加载（TOML + 环境变量）
//! - **observability**: 日志初始化

pub mod broadcast;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod gate;
pub mod observability;
pub mod request;
pub mod strategy;

pub use crate::core::{create_coordinator, CoordinatorHandle, StrategyError};
pub use broadcast::{ArbiterEvent, StateBroadcaster};
pub use dispatch::{ActivityHandler, ActivityOutcome, Arbiter, HandlerRegistry};
pub use request::{ApplyStrategies, AuthorizeStrategiesRequest, StrategyStateUpdate, StrategyToApply};
pub use strategy::{Strategy, StrategyActivity, StrategySet};

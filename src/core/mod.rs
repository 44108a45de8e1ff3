//! 核心层：错误类型、单写者协调器、状态账本、关闭管理

pub mod coordinator;
pub mod error;
pub mod shutdown;
pub mod state;

pub use coordinator::{
    create_coordinator, Coordinator, CoordinatorHandle, CoordinatorSettings, SubmitReceipt,
};
pub use error::StrategyError;
pub use shutdown::{run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
pub use state::StrategyLedger;

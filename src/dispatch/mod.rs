//! 调度仲裁：处理器注册、调用执行、节点互斥、批次执行与结果

pub mod arbiter;
pub mod executor;
pub mod handler;
pub mod node_locks;
pub mod outcome;

pub use arbiter::{Arbiter, ArbiterSettings};
pub use executor::ActivityExecutor;
pub use handler::{ActivityHandler, HandlerRegistry, LoggingHandler};
pub use node_locks::{NodeGuard, NodeLocks};
pub use outcome::{ActivityOutcome, ActivityRecord, BatchReport, BatchSummary, SequenceReport};

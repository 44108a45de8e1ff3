//! 状态广播：把状态更新与执行结果推给观察者（监控界面、SSE 等）
//!
//! 基于 tokio broadcast 通道，发送即返回：没有订阅者或订阅者落后都不会阻塞调度。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::dispatch::{ActivityRecord, BatchSummary};
use crate::request::StrategyStateUpdate;

/// 对外事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArbiterEvent {
    /// 某次迁移后的完整 applied / pending / failed 视图
    StateUpdate { update: StrategyStateUpdate },
    /// 单个活动执行完毕
    ActivityCompleted { record: ActivityRecord },
    /// 批次执行完毕
    BatchCompleted { summary: BatchSummary },
}

#[derive(Clone)]
pub struct StateBroadcaster {
    tx: broadcast::Sender<ArbiterEvent>,
}

impl StateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.tx.subscribe()
    }

    /// 返回收到事件的订阅者数
    pub fn publish(&self, event: ArbiterEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!("no subscribers for arbiter event");
                0
            }
        }
    }
}

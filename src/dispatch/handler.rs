//! 活动处理器注册表
//!
//! 外部执行层实现 ActivityHandler（模拟器、反馈界面、媒体播放器等），按处理器描述名注册；
//! 调度器只负责调用并记录结果，不关心实现。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::strategy::{HandlerDescriptor, StrategyActivity, DEFAULT_HANDLER};

/// 单个活动的执行能力
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// 处理器名，与活动上的 HandlerDescriptor 对应
    fn name(&self) -> &str;

    /// 执行活动；Err 为失败原因
    async fn execute(&self, activity: &StrategyActivity) -> Result<(), String>;
}

/// 按名称存储 Arc<dyn ActivityHandler>
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名处理器会被替换
    pub fn register(&mut self, handler: impl ActivityHandler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ActivityHandler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(handler = %name, "activity handler replaced");
        }
    }

    pub fn get(&self, descriptor: &HandlerDescriptor) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(descriptor.as_str()).cloned()
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 只写日志的处理器；命令行与 Web 入口默认注册它作为 DefaultStrategyHandler
pub struct LoggingHandler {
    name: String,
}

impl LoggingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER)
    }
}

#[async_trait]
impl ActivityHandler for LoggingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, activity: &StrategyActivity) -> Result<(), String> {
        let payload = serde_json::to_string(activity.kind()).map_err(|e| e.to_string())?;
        tracing::info!(
            handler = %self.name,
            activity = %activity.name(),
            kind = activity.kind().label(),
            stress = ?activity.stress(),
            payload = %payload,
            "activity delivered"
        );
        Ok(())
    }
}

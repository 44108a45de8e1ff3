//! 申请信封：一个待应用的策略 + 来源（触发原因、评估员、场景节点）
//!
//! 应用身份（ApplicationKey）= 触发原因 + 评估员 + 策略名；调度器用它做在途去重。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::StrategyError;
use crate::strategy::Strategy;

/// 去重用的应用身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationKey {
    pub trigger: String,
    pub evaluator: Option<String>,
    pub strategy: String,
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.trigger,
            self.evaluator.as_deref().unwrap_or("system"),
            self.strategy
        )
    }
}

/// 待应用的策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StrategyToApplyRepr")]
pub struct StrategyToApply {
    id: Uuid,
    strategy: Strategy,
    trigger: String,
    /// None 表示由系统自动应用
    evaluator: Option<String>,
    node_ids: BTreeSet<u32>,
}

#[derive(Deserialize)]
struct StrategyToApplyRepr {
    #[serde(default)]
    id: Option<Uuid>,
    strategy: Strategy,
    trigger: String,
    #[serde(default)]
    evaluator: Option<String>,
    #[serde(default)]
    node_ids: BTreeSet<u32>,
}

impl TryFrom<StrategyToApplyRepr> for StrategyToApply {
    type Error = StrategyError;

    fn try_from(repr: StrategyToApplyRepr) -> Result<Self, Self::Error> {
        let mut envelope = StrategyToApply::new(repr.strategy, repr.trigger, repr.evaluator)?;
        if let Some(id) = repr.id {
            envelope.id = id;
        }
        envelope.node_ids = repr.node_ids;
        Ok(envelope)
    }
}

impl StrategyToApply {
    pub fn new(
        strategy: Strategy,
        trigger: impl Into<String>,
        evaluator: Option<String>,
    ) -> Result<Self, StrategyError> {
        let trigger = trigger.into();
        if trigger.trim().is_empty() {
            return Err(StrategyError::invalid("The trigger can't be blank."));
        }
        // 空白评估员等同于系统
        let evaluator = evaluator.filter(|e| !e.trim().is_empty());
        Ok(Self {
            id: Uuid::new_v4(),
            strategy,
            trigger,
            evaluator,
            node_ids: BTreeSet::new(),
        })
    }

    /// 构造后附加的场景节点元数据
    pub fn set_node_ids(&mut self, node_ids: impl IntoIterator<Item = u32>) {
        self.node_ids = node_ids.into_iter().collect();
    }

    pub fn with_node_ids(mut self, node_ids: impl IntoIterator<Item = u32>) -> Self {
        self.set_node_ids(node_ids);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn evaluator(&self) -> Option<&str> {
        self.evaluator.as_deref()
    }

    pub fn node_ids(&self) -> &BTreeSet<u32> {
        &self.node_ids
    }

    pub fn key(&self) -> ApplicationKey {
        ApplicationKey {
            trigger: self.trigger.clone(),
            evaluator: self.evaluator.clone(),
            strategy: self.strategy.name().to_string(),
        }
    }
}

//! 场景节点级互斥：目标节点集合相交的序列串行执行
//!
//! 每个节点一把 tokio Mutex；多节点时按节点号升序加锁，避免锁序反转。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct NodeLocks {
    locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

/// 持有期间独占相关节点；Drop 时释放
pub struct NodeGuard {
    nodes: Vec<u32>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl NodeGuard {
    pub fn nodes(&self) -> &[u32] {
        &self.nodes
    }
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// nodes 为空时立即返回空守卫
    pub async fn acquire(&self, nodes: &BTreeSet<u32>) -> NodeGuard {
        let handles: Vec<Arc<Mutex<()>>> = {
            let mut locks = self.locks.lock().await;
            // 无人持有的锁直接回收
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            nodes
                .iter()
                .map(|node| locks.entry(*node).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        NodeGuard {
            nodes: nodes.iter().copied().collect(),
            _guards: guards,
        }
    }

    /// 当前登记的节点数
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_sets_wait() {
        let locks = Arc::new(NodeLocks::new());
        let first = locks.acquire(&BTreeSet::from([1, 2])).await;
        assert_eq!(first.nodes(), &[1, 2]);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&BTreeSet::from([2, 3])).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        // 不相交的集合不受影响
        let other = locks.acquire(&BTreeSet::from([7])).await;
        drop(other);

        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_unused_locks_are_pruned() {
        let locks = NodeLocks::new();
        drop(locks.acquire(&BTreeSet::from([1, 2, 3])).await);
        assert_eq!(locks.tracked().await, 3);
        drop(locks.acquire(&BTreeSet::new()).await);
        assert_eq!(locks.tracked().await, 0);
    }
}

//! Priority-ordered work queue for deferred follow-up work.
//!
//! Lower priority values are served first; items with equal priority are
//! served in insertion order. Ordering is enforced by pairing each item with
//! a monotonically increasing sequence number.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::{Arc, Mutex, MutexGuard};

use keel_core::{Clock, KeelError, KeelResult, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// A queued payload with its ordering metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem<T> {
    pub priority: i64,
    /// Insertion order; breaks ties within a priority band.
    pub sequence: u64,
    pub payload: T,
    pub enqueued_at: Timestamp,
}

/// Heap wrapper that turns `BinaryHeap`'s max-heap into
/// "smallest priority, then earliest sequence" first.
#[derive(Debug)]
struct Ranked<T>(QueueItem<T>);

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.sequence == other.0.sequence
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// Pending-work statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub pending_by_priority: BTreeMap<i64, usize>,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
}

#[derive(Debug)]
struct QueueInner<T> {
    heap: BinaryHeap<Ranked<T>>,
    next_sequence: u64,
    total_enqueued: u64,
    total_dequeued: u64,
}

impl<T> Default for QueueInner<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            total_enqueued: 0,
            total_dequeued: 0,
        }
    }
}

/// Priority queue shared between request handlers and background workers.
#[derive(Debug)]
pub struct PriorityTaskQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl<T: Send> PriorityTaskQueue<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            clock,
        }
    }

    fn lock(&self) -> KeelResult<MutexGuard<'_, QueueInner<T>>> {
        self.inner.lock().map_err(|_| KeelError::poisoned("queue"))
    }

    /// Add an item. Returns its sequence number.
    pub async fn enqueue(&self, payload: T, priority: i64) -> KeelResult<u64> {
        let enqueued_at = self.clock.now();
        let sequence = {
            let mut inner = self.lock()?;
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.total_enqueued += 1;
            inner.heap.push(Ranked(QueueItem {
                priority,
                sequence,
                payload,
                enqueued_at,
            }));
            sequence
        };
        self.notify.notify_one();
        tracing::trace!(priority, sequence, "task enqueued");
        Ok(sequence)
    }

    /// Remove the next item if one is pending.
    pub async fn try_dequeue(&self) -> KeelResult<Option<QueueItem<T>>> {
        let mut inner = self.lock()?;
        let item = inner.heap.pop().map(|Ranked(item)| item);
        if item.is_some() {
            inner.total_dequeued += 1;
        }
        Ok(item)
    }

    /// Wait for and remove the next item.
    pub async fn dequeue(&self) -> KeelResult<QueueItem<T>> {
        loop {
            if let Some(item) = self.try_dequeue().await? {
                return Ok(item);
            }
            self.notify.notified().await;
        }
    }

    /// Priority of the item that would be dequeued next.
    pub async fn peek_priority(&self) -> KeelResult<Option<i64>> {
        Ok(self.lock()?.heap.peek().map(|Ranked(item)| item.priority))
    }

    pub async fn len(&self) -> KeelResult<usize> {
        Ok(self.lock()?.heap.len())
    }

    pub async fn is_empty(&self) -> KeelResult<bool> {
        Ok(self.lock()?.heap.is_empty())
    }

    pub async fn get_stats(&self) -> KeelResult<QueueStats> {
        let inner = self.lock()?;
        let mut pending_by_priority = BTreeMap::new();
        for Ranked(item) in inner.heap.iter() {
            *pending_by_priority.entry(item.priority).or_insert(0) += 1;
        }
        Ok(QueueStats {
            pending: inner.heap.len(),
            pending_by_priority,
            total_enqueued: inner.total_enqueued,
            total_dequeued: inner.total_dequeued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ManualClock;
    use proptest::prelude::*;
    use std::time::Duration;

    fn queue<T: Send>() -> PriorityTaskQueue<T> {
        PriorityTaskQueue::new(Arc::new(ManualClock::starting_now()))
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let q = queue();
        for (name, priority) in [("c", 3), ("a1", 1), ("b", 2), ("a2", 1)] {
            q.enqueue(name, priority).await.unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(q.dequeue().await.unwrap().payload);
        }
        assert_eq!(order, vec!["a1", "a2", "b", "c"]);
        assert!(q.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_track_pending_counts() {
        let q = queue();
        q.enqueue("x", 1).await.unwrap();
        q.enqueue("y", 1).await.unwrap();
        q.enqueue("z", 5).await.unwrap();
        q.try_dequeue().await.unwrap();

        let stats = q.get_stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.pending_by_priority.get(&1), Some(&1));
        assert_eq!(stats.pending_by_priority.get(&5), Some(&1));
        assert_eq!(stats.total_enqueued, 3);
        assert_eq!(stats.total_dequeued, 1);
        assert_eq!(q.peek_priority().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_producer() {
        let q = Arc::new(queue::<String>());
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.enqueue("post-process".to_string(), 0).await.unwrap();

        let item = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .expect("task should not panic")
            .unwrap();
        assert_eq!(item.payload, "post-process");
        assert!(q.is_empty().await.unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Property: dequeue order is sorted by (priority, insertion order).
        #[test]
        fn prop_dequeue_order_is_stable_sort(priorities in prop::collection::vec(-5i64..5, 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let drained = rt.block_on(async {
                let q = queue();
                for (idx, p) in priorities.iter().enumerate() {
                    q.enqueue(idx, *p).await.unwrap();
                }
                let mut out = Vec::new();
                while let Some(item) = q.try_dequeue().await.unwrap() {
                    out.push(item.payload);
                }
                out
            });

            let mut expected: Vec<usize> = (0..priorities.len()).collect();
            expected.sort_by_key(|&idx| priorities[idx]);
            prop_assert_eq!(drained, expected);
        }
    }
}

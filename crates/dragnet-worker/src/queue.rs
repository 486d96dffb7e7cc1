//! Bounded in-memory priority queue.
//!
//! Four strict bands (urgent > high > normal > low), FIFO within a band.
//! Capacity pressure drops the most recently added item from the lowest
//! non-empty band strictly below the incoming priority, so older work and
//! higher bands survive backpressure. A background sweeper expires items
//! that waited longer than `max_wait_time`, bounding worker memory when the
//! orchestrator outpaces execution.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{info, warn};

use dragnet_core::{SubTaskSpec, TaskPriority};

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// Default maximum time an item may wait before expiring.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);
/// Sweeper period.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct QueueItem {
    spec: SubTaskSpec,
    add_time: Instant,
}

#[derive(Debug, Default)]
struct Bands {
    urgent: VecDeque<QueueItem>,
    high: VecDeque<QueueItem>,
    normal: VecDeque<QueueItem>,
    low: VecDeque<QueueItem>,
}

impl Bands {
    fn band_mut(&mut self, priority: TaskPriority) -> &mut VecDeque<QueueItem> {
        match priority {
            TaskPriority::Urgent => &mut self.urgent,
            TaskPriority::High => &mut self.high,
            TaskPriority::Normal => &mut self.normal,
            TaskPriority::Low => &mut self.low,
        }
    }

    fn band(&self, priority: TaskPriority) -> &VecDeque<QueueItem> {
        match priority {
            TaskPriority::Urgent => &self.urgent,
            TaskPriority::High => &self.high,
            TaskPriority::Normal => &self.normal,
            TaskPriority::Low => &self.low,
        }
    }

    fn len(&self) -> usize {
        self.urgent.len() + self.high.len() + self.normal.len() + self.low.len()
    }
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub max_queue_size: usize,
    pub current_size: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    /// Items evicted to make room for higher-priority work.
    pub total_dropped: u64,
    /// Items that waited past `max_wait_time`.
    pub total_expired: u64,
    /// Enqueue attempts refused because nothing was droppable.
    pub total_rejected: u64,
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

/// Priority queue protecting one worker from memory exhaustion.
///
/// The bands live behind a single mutex; the statistics counters are
/// atomics, so stats reads never block dispatch.
pub struct TaskQueueManager {
    max_queue_size: usize,
    max_wait_time: Duration,
    bands: Mutex<Bands>,
    notify: Notify,

    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
    total_dropped: AtomicU64,
    total_expired: AtomicU64,
    total_rejected: AtomicU64,
}

impl TaskQueueManager {
    pub fn new(max_queue_size: usize, max_wait_time: Duration) -> Self {
        let max_queue_size = if max_queue_size == 0 {
            DEFAULT_MAX_QUEUE_SIZE
        } else {
            max_queue_size
        };
        let max_wait_time = if max_wait_time.is_zero() {
            DEFAULT_MAX_WAIT
        } else {
            max_wait_time
        };

        TaskQueueManager {
            max_queue_size,
            max_wait_time,
            bands: Mutex::new(Bands::default()),
            notify: Notify::new(),
            total_enqueued: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_expired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Enqueue a sub-task at the given band. Returns `false` when the queue
    /// is full and nothing below the incoming band can be dropped.
    pub fn enqueue(&self, spec: SubTaskSpec, priority: TaskPriority) -> bool {
        let mut bands = self.bands.lock().unwrap();

        if bands.len() >= self.max_queue_size && !self.drop_one_below_locked(&mut bands, priority)
        {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(task_id = %spec.task_id, "queue full, rejecting task");
            return false;
        }

        bands.band_mut(priority).push_back(QueueItem {
            spec,
            add_time: Instant::now(),
        });
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        drop(bands);

        self.notify.notify_one();
        true
    }

    /// Pop the oldest item from the highest non-empty band.
    pub fn try_dequeue(&self) -> Option<SubTaskSpec> {
        let mut bands = self.bands.lock().unwrap();
        for priority in TaskPriority::DESCENDING {
            if let Some(item) = bands.band_mut(priority).pop_front() {
                self.total_dequeued.fetch_add(1, Ordering::Relaxed);
                return Some(item.spec);
            }
        }
        None
    }

    /// Wait until an item is available and dequeue it. Wakes via the notify
    /// handle instead of polling.
    pub async fn dequeue(&self) -> SubTaskSpec {
        loop {
            if let Some(spec) = self.try_dequeue() {
                return spec;
            }
            self.notify.notified().await;
        }
    }

    /// Drop the most recently added item from the lowest non-empty band
    /// strictly below `incoming`. LIFO within the victim band keeps older
    /// work ahead.
    fn drop_one_below_locked(&self, bands: &mut Bands, incoming: TaskPriority) -> bool {
        for candidate in [TaskPriority::Low, TaskPriority::Normal, TaskPriority::High] {
            if candidate >= incoming {
                break;
            }
            let band = bands.band_mut(candidate);
            if let Some(victim) = band.pop_back() {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task_id = %victim.spec.task_id,
                    band = candidate.as_str(),
                    "dropped queued task to make room"
                );
                return true;
            }
        }
        false
    }

    /// Remove every item older than `max_wait_time`. Returns how many
    /// expired.
    pub fn sweep_expired(&self) -> usize {
        let mut bands = self.bands.lock().unwrap();
        let now = Instant::now();
        let mut expired = 0;

        for priority in TaskPriority::DESCENDING {
            let band = bands.band_mut(priority);
            let before = band.len();
            band.retain(|item| now.duration_since(item.add_time) <= self.max_wait_time);
            expired += before - band.len();
        }

        if expired > 0 {
            self.total_expired.fetch_add(expired as u64, Ordering::Relaxed);
            info!(expired, "cleaned up expired queued tasks");
        }
        expired
    }

    /// Run the expiry sweeper until `shutdown` flips.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        queue.sweep_expired();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.bands.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_queue_size
    }

    pub fn stats(&self) -> QueueStats {
        let bands = self.bands.lock().unwrap();
        QueueStats {
            max_queue_size: self.max_queue_size,
            current_size: bands.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            urgent: bands.band(TaskPriority::Urgent).len(),
            high: bands.band(TaskPriority::High).len(),
            normal: bands.band(TaskPriority::Normal).len(),
            low: bands.band(TaskPriority::Low).len(),
        }
    }
}

impl Default for TaskQueueManager {
    fn default() -> Self {
        TaskQueueManager::new(DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(task_id: &str) -> SubTaskSpec {
        SubTaskSpec {
            task_id: task_id.to_string(),
            main_task_id: task_id.to_string(),
            workspace_id: "w1".to_string(),
            task_name: "scan".to_string(),
            config: "{}".to_string(),
            priority: 1,
            workers: vec![],
        }
    }

    #[test]
    fn dequeues_by_band_then_fifo() {
        let queue = TaskQueueManager::default();
        queue.enqueue(spec("n1"), TaskPriority::Normal);
        queue.enqueue(spec("n2"), TaskPriority::Normal);
        queue.enqueue(spec("u1"), TaskPriority::Urgent);
        queue.enqueue(spec("l1"), TaskPriority::Low);
        queue.enqueue(spec("h1"), TaskPriority::High);

        let order: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|s| s.task_id)
            .collect();
        assert_eq!(order, vec!["u1", "h1", "n1", "n2", "l1"]);
    }

    #[test]
    fn full_queue_rejects_when_nothing_is_droppable() {
        let queue = TaskQueueManager::new(3, DEFAULT_MAX_WAIT);
        assert!(queue.enqueue(spec("u1"), TaskPriority::Urgent));
        assert!(queue.enqueue(spec("n1"), TaskPriority::Normal));
        assert!(queue.enqueue(spec("n2"), TaskPriority::Normal));

        // No band strictly below normal holds anything.
        assert!(!queue.enqueue(spec("n3"), TaskPriority::Normal));

        let stats = queue.stats();
        assert_eq!(stats.current_size, 3);
        assert_eq!(stats.total_rejected, 1);
        assert_eq!(stats.total_dropped, 0);
    }

    #[test]
    fn full_queue_drops_most_recent_lower_item_for_higher_work() {
        let queue = TaskQueueManager::new(3, DEFAULT_MAX_WAIT);
        queue.enqueue(spec("u1"), TaskPriority::Urgent);
        queue.enqueue(spec("n1"), TaskPriority::Normal);
        queue.enqueue(spec("n2"), TaskPriority::Normal);

        assert!(queue.enqueue(spec("u2"), TaskPriority::Urgent));

        let stats = queue.stats();
        assert_eq!(stats.total_dropped, 1);
        assert_eq!(stats.current_size, 3);

        // The victim was the most recently added normal item.
        let order: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|s| s.task_id)
            .collect();
        assert_eq!(order, vec!["u1", "u2", "n1"]);
    }

    #[test]
    fn drop_prefers_the_lowest_band() {
        let queue = TaskQueueManager::new(3, DEFAULT_MAX_WAIT);
        queue.enqueue(spec("h1"), TaskPriority::High);
        queue.enqueue(spec("n1"), TaskPriority::Normal);
        queue.enqueue(spec("l1"), TaskPriority::Low);

        assert!(queue.enqueue(spec("u1"), TaskPriority::Urgent));

        let order: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|s| s.task_id)
            .collect();
        // The low item went first, not the normal one.
        assert_eq!(order, vec!["u1", "h1", "n1"]);
    }

    #[test]
    fn sweeper_expires_old_items() {
        let queue = TaskQueueManager::new(10, Duration::from_millis(1));
        queue.enqueue(spec("t1"), TaskPriority::Normal);
        queue.enqueue(spec("t2"), TaskPriority::High);

        std::thread::sleep(Duration::from_millis(10));
        let expired = queue.sweep_expired();
        assert_eq!(expired, 2);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().total_expired, 2);
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueueManager::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await.task_id })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(spec("t1"), TaskPriority::Normal);

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "t1");
    }

    #[test]
    fn stats_track_band_sizes() {
        let queue = TaskQueueManager::default();
        queue.enqueue(spec("u1"), TaskPriority::Urgent);
        queue.enqueue(spec("n1"), TaskPriority::Normal);
        queue.enqueue(spec("n2"), TaskPriority::Normal);

        let stats = queue.stats();
        assert_eq!(stats.urgent, 1);
        assert_eq!(stats.normal, 2);
        assert_eq!(stats.total_enqueued, 3);
        assert_eq!(stats.total_dequeued, 0);
    }
}

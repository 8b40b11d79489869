//! Priority request queue
//!
//! Admission controller that bounds concurrent in-flight requests.
//! Work below the concurrency cap starts immediately; everything else
//! waits in a backlog ordered by descending priority, FIFO within a
//! priority level. Completion of a running task is the only admission
//! trigger, so there is no poller and no idle wakeup.

use futures::future::BoxFuture;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::Ewma;
use crate::types::{ArchwayError, Result};

/// A deferred unit of work producing a response or failure
pub type QueueTask<T> = BoxFuture<'static, Result<T>>;

/// Configuration for the request queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum tasks executing at once (default: 6)
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent: 6 }
    }
}

impl QueueConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("MAX_CONCURRENT") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.max_concurrent = n;
                }
            }
        }
        config
    }
}

/// Backlog entry; `enqueued_at` feeds wait-time statistics only
struct QueueItem<T> {
    priority: u8,
    seq: u64,
    enqueued_at: Instant,
    task: QueueTask<T>,
    done_tx: oneshot::Sender<Result<T>>,
}

// Heap order: highest priority first, then lowest sequence number so
// equal priorities stay FIFO.
impl<T> PartialEq for QueueItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for QueueItem<T> {}

impl<T> PartialOrd for QueueItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueItem<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<T> {
    backlog: BinaryHeap<QueueItem<T>>,
    running: usize,
}

struct QueueInner<T> {
    max_concurrent: usize,
    state: Mutex<QueueState<T>>,
    seq: AtomicU64,
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    avg_time_ms: Mutex<Ewma>,
}

/// Awaitable handle for a submitted task
pub struct QueueHandle<T> {
    done_rx: oneshot::Receiver<Result<T>>,
}

impl<T> QueueHandle<T> {
    /// Wait for the task's terminal outcome
    pub async fn wait(self) -> Result<T> {
        match self.done_rx.await {
            Ok(result) => result,
            Err(_) => Err(ArchwayError::Queue(
                "task dropped before completion".to_string(),
            )),
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub running: usize,
    pub backlog: usize,
    pub average_time_ms: f64,
}

/// Priority-ordered admission controller
pub struct RequestQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> RequestQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_concurrent: config.max_concurrent.max(1),
                state: Mutex::new(QueueState {
                    backlog: BinaryHeap::new(),
                    running: 0,
                }),
                seq: AtomicU64::new(0),
                total: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                avg_time_ms: Mutex::new(Ewma::default()),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    /// Submit a task; starts immediately when a slot is free, otherwise
    /// joins the backlog at its priority
    pub fn add(&self, priority: u8, task: QueueTask<T>) -> QueueHandle<T> {
        let (done_tx, done_rx) = oneshot::channel();
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.total.fetch_add(1, Ordering::Relaxed);

        let item = QueueItem {
            priority,
            seq,
            enqueued_at: Instant::now(),
            task,
            done_tx,
        };

        let admitted = {
            let mut state = self.inner.state.lock().unwrap();
            if state.running < self.inner.max_concurrent {
                state.running += 1;
                Some(item)
            } else {
                state.backlog.push(item);
                debug!(priority, backlog = state.backlog.len(), "Request queued");
                None
            }
        };

        if let Some(item) = admitted {
            spawn_runner(Arc::clone(&self.inner), item);
        }

        QueueHandle { done_rx }
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().unwrap().running
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.state.lock().unwrap().backlog.len()
    }

    pub fn stats(&self) -> QueueStats {
        let (running, backlog) = {
            let state = self.inner.state.lock().unwrap();
            (state.running, state.backlog.len())
        };
        QueueStats {
            total_requests: self.inner.total.load(Ordering::Relaxed),
            completed_requests: self.inner.completed.load(Ordering::Relaxed),
            failed_requests: self.inner.failed.load(Ordering::Relaxed),
            running,
            backlog,
            average_time_ms: self.inner.avg_time_ms.lock().unwrap().value(),
        }
    }
}

/// Worker loop for one concurrency slot
///
/// Runs the admitted item, then drains the backlog until it is empty;
/// only then is the slot released. Task failure releases the slot the
/// same way and never stalls the queue.
fn spawn_runner<T: Send + 'static>(inner: Arc<QueueInner<T>>, first: QueueItem<T>) {
    tokio::spawn(async move {
        let mut item = first;
        loop {
            let waited_ms = item.enqueued_at.elapsed().as_millis();
            let started = Instant::now();
            let result = item.task.await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            inner.avg_time_ms.lock().unwrap().observe(elapsed_ms);
            match &result {
                Ok(_) => {
                    inner.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "Queued task failed");
                }
            }
            debug!(
                priority = item.priority,
                waited_ms = waited_ms as u64,
                elapsed_ms = elapsed_ms as u64,
                "Task finished"
            );

            // Caller may have gone away; the outcome is already counted
            let _ = item.done_tx.send(result);

            let next = {
                let mut state = inner.state.lock().unwrap();
                match state.backlog.pop() {
                    Some(next) => Some(next),
                    None => {
                        state.running -= 1;
                        None
                    }
                }
            };
            match next {
                Some(next) => item = next,
                None => break,
            }
        }
    });
}

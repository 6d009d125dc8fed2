//! Priority scheduling of completion calls with adaptive pacing,
//! bounded retries, and best-effort queue durability

use anyhow::Result;
use log::{debug, info, warn};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

use crate::core::config::Config;
use crate::core::error::SuggestionError;
use crate::providers::CompletionClient;

pub mod cache;
pub mod limiter;
pub mod queue;
pub mod snapshot;

pub use cache::ResultCache;
pub use limiter::AdaptiveRateLimiter;
pub use queue::{Completion, CompletionCallback, Priority, SuggestionRequest};
pub use snapshot::{SnapshotRecord, SnapshotStore};

use queue::PendingRequest;
use snapshot::SNAPSHOT_CAP;

/// Retries allowed for a throttled request before its failure is surfaced
const MAX_THROTTLE_RETRIES: u32 = 3;

/// Minimum spacing between snapshot writes
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Read-only monitoring view of the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub queue_depth: usize,
    pub current_rate: f64,
    pub workers: String,
    pub in_flight: Vec<String>,
}

struct SchedulerInner {
    queue: Mutex<BinaryHeap<PendingRequest>>,
    queue_capacity: usize,
    notify: Notify,
    seq: AtomicU64,
    limiter: AdaptiveRateLimiter,
    cache: ResultCache,
    client: Arc<dyn CompletionClient>,
    workers: Arc<Semaphore>,
    worker_total: usize,
    in_flight: Mutex<HashMap<u64, String>>,
    snapshot: SnapshotStore,
    snapshot_dirty: AtomicBool,
}

impl SchedulerInner {
    fn new(config: &Config, client: Arc<dyn CompletionClient>) -> Result<Self> {
        Ok(Self {
            queue: Mutex::new(BinaryHeap::new()),
            queue_capacity: config.scheduler.queue_capacity,
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            limiter: AdaptiveRateLimiter::new(config.rate.target, config.rate.floor),
            cache: ResultCache::new(config.cache.capacity),
            client,
            workers: Arc::new(Semaphore::new(config.scheduler.workers)),
            worker_total: config.scheduler.workers,
            in_flight: Mutex::new(HashMap::new()),
            snapshot: SnapshotStore::new(&config.snapshot.data_dir)?,
            snapshot_dirty: AtomicBool::new(false),
        })
    }

    /// Enqueue a request, or reject it synchronously when the queue is full.
    /// A request whose identifier already has a cached answer completes
    /// immediately without consuming a queue slot.
    async fn submit(&self, request: SuggestionRequest) -> bool {
        if let Some(id) = &request.identifier {
            if let Some(options) = self.cache.get(id).await {
                debug!("Serving '{}' from result cache", id);
                finish(request.completion, Ok(options));
                return true;
            }
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= self.queue_capacity {
            drop(queue);
            warn!(
                "Suggestion queue full ({} pending), rejecting request",
                self.queue_capacity
            );
            finish(request.completion, Err(SuggestionError::QueueFull));
            return false;
        }

        let pending = PendingRequest {
            request,
            submitted_at: Instant::now(),
            submitted_at_ms: chrono::Utc::now().timestamp_millis(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        if pending.is_persistable() {
            self.snapshot_dirty.store(true, Ordering::Relaxed);
        }
        queue.push(pending);
        drop(queue);

        self.notify.notify_one();
        true
    }

    /// Snapshot view of the recoverable pending requests: HIGH priority and
    /// identified only, oldest first, capped
    async fn pending_snapshot_records(&self) -> Vec<SnapshotRecord> {
        let queue = self.queue.lock().await;
        let mut records: Vec<SnapshotRecord> = queue
            .iter()
            .filter(|p| p.request.priority == Priority::High)
            .filter_map(|p| {
                p.request.identifier.as_ref().map(|id| SnapshotRecord {
                    content: p.request.content.clone(),
                    identifier: id.clone(),
                    priority: p.request.priority,
                    submitted_at: p.submitted_at_ms,
                })
            })
            .collect();
        records.sort_by_key(|r| r.submitted_at);
        records.truncate(SNAPSHOT_CAP);
        records
    }
}

/// Deliver a terminal outcome. Recovered requests have no living submitter;
/// their result already went to the cache.
fn finish(completion: Completion, outcome: Result<Vec<String>, SuggestionError>) {
    match completion {
        Completion::Live(callback) => callback(outcome),
        Completion::Recovered => {}
    }
}

/// Pacing loop: one request per rate-limiter permit, dispatched to the
/// worker pool so a slow call never stalls the next permit.
///
/// Shutdown is cooperative. A request the loop has already popped but not
/// yet dispatched goes back into the queue, so `shutdown` can drain it and
/// deliver its outcome; aborting mid-hold would lose the callback.
async fn run_loop(inner: Arc<SchedulerInner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let pending = tokio::select! {
            p = next_pending(&inner) => p,
            _ = shutdown_rx.changed() => return,
        };

        if pending.is_persistable() {
            inner.snapshot_dirty.store(true, Ordering::Relaxed);
        }

        tokio::select! {
            _ = inner.limiter.acquire() => {}
            _ = shutdown_rx.changed() => {
                inner.queue.lock().await.push(pending);
                return;
            }
        }

        let permit = tokio::select! {
            acquired = inner.workers.clone().acquire_owned() => match acquired {
                Ok(p) => p,
                // Semaphore closed: the scheduler is shutting down
                Err(_) => {
                    inner.queue.lock().await.push(pending);
                    return;
                }
            },
            _ = shutdown_rx.changed() => {
                inner.queue.lock().await.push(pending);
                return;
            }
        };
        tokio::spawn(run_worker(inner.clone(), pending, permit));
    }
}

/// Take the head of the queue, waiting when it is empty
async fn next_pending(inner: &SchedulerInner) -> PendingRequest {
    loop {
        if let Some(pending) = inner.queue.lock().await.pop() {
            return pending;
        }
        inner.notify.notified().await;
    }
}

/// Worker: owns the request until terminal, including the throttling retry
/// loop with 1 s / 2 s / 4 s backoff
async fn run_worker(
    inner: Arc<SchedulerInner>,
    pending: PendingRequest,
    permit: OwnedSemaphorePermit,
) {
    inner
        .in_flight
        .lock()
        .await
        .insert(pending.seq, pending.describe());

    let mut attempt: u32 = 0;
    let outcome = loop {
        match inner
            .client
            .call(&pending.request.content, &pending.request.context)
            .await
        {
            Ok(options) => {
                inner.limiter.on_success().await;
                break Ok(options);
            }
            Err(err) if err.is_throttled() => {
                inner.limiter.on_throttled().await;
                if attempt < MAX_THROTTLE_RETRIES {
                    let backoff = Duration::from_secs(1u64 << attempt);
                    warn!(
                        "Throttled on attempt {}, retrying in {:?}",
                        attempt + 1,
                        backoff
                    );
                    attempt += 1;
                    sleep(backoff).await;
                } else {
                    break Err(SuggestionError::Throttled(err.to_string()));
                }
            }
            Err(err) => break Err(SuggestionError::Call(err.to_string())),
        }
    };

    inner.in_flight.lock().await.remove(&pending.seq);
    drop(permit);

    if let Ok(options) = &outcome {
        if let Some(id) = &pending.request.identifier {
            inner.cache.put(id, options.clone()).await;
        }
    }
    finish(pending.request.completion, outcome);
}

/// Throttled background persistence of the recoverable queue subset.
/// Failures are logged and swallowed; durability is best-effort.
async fn run_snapshot_writer(inner: Arc<SchedulerInner>) {
    let mut ticker = interval(SNAPSHOT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !inner.snapshot_dirty.swap(false, Ordering::Relaxed) {
            continue;
        }
        let records = inner.pending_snapshot_records().await;
        if let Err(e) = inner.snapshot.write(&records) {
            warn!("Failed to persist queue snapshot: {:#}", e);
        }
    }
}

/// The orchestrating component: a bounded priority queue of pending
/// suggestion requests, one scheduling task pacing dispatch through the
/// adaptive rate limiter, and a bounded worker pool executing the calls.
///
/// Must be created inside a tokio runtime; construction spawns the
/// scheduling and snapshot tasks.
pub struct SuggestionScheduler {
    inner: Arc<SchedulerInner>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<()>,
    snapshot_handle: JoinHandle<()>,
}

impl SuggestionScheduler {
    pub fn new(config: &Config, client: Arc<dyn CompletionClient>) -> Result<Self> {
        let inner = Arc::new(SchedulerInner::new(config, client)?);
        info!(
            "Scheduler started: queue capacity {}, {} workers, target {:.2} req/s",
            config.scheduler.queue_capacity, config.scheduler.workers, config.rate.target
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_handle = tokio::spawn(run_loop(inner.clone(), shutdown_rx));
        let snapshot_handle = tokio::spawn(run_snapshot_writer(inner.clone()));

        Ok(Self {
            inner,
            shutdown_tx,
            loop_handle,
            snapshot_handle,
        })
    }

    /// Primary ingress. Returns false when the queue is at capacity, in
    /// which case the completion has already been informed.
    pub async fn submit(&self, request: SuggestionRequest) -> bool {
        self.inner.submit(request).await
    }

    /// Re-submit requests persisted by a previous process. Recovered
    /// requests run context-free and only populate the result cache; the
    /// original submitters are gone. Returns the number of recovered
    /// requests. Durability is best-effort, so an unreadable snapshot is
    /// logged and skipped rather than surfaced.
    pub async fn restore(&self) -> usize {
        let records = match self.inner.snapshot.take() {
            Ok(records) => records,
            Err(e) => {
                warn!("Skipping unreadable queue snapshot: {:#}", e);
                return 0;
            }
        };
        let count = records.len();
        for record in records {
            let accepted = self
                .inner
                .submit(SuggestionRequest {
                    content: record.content,
                    identifier: Some(record.identifier),
                    priority: record.priority,
                    // The original context snapshot did not survive the
                    // restart; recovered requests regenerate without one
                    context: Vec::new(),
                    completion: Completion::Recovered,
                })
                .await;
            if !accepted {
                warn!("Dropped recovered request: queue full");
            }
        }
        count
    }

    /// Cached options for an identifier, refreshing its recency. Lets the
    /// host skip submission entirely when a recycled view re-asks for a
    /// message that was already answered.
    pub async fn cached(&self, identifier: &str) -> Option<Vec<String>> {
        self.inner.cache.get(identifier).await
    }

    /// Adjust the rate limiter's configured ceiling
    pub async fn set_target_rate(&self, target_rate: f64) {
        self.inner.limiter.set_target_rate(target_rate).await;
    }

    /// Read-only monitoring counters
    pub async fn stats(&self) -> SchedulerStats {
        let queue_depth = self.inner.queue.lock().await.len();
        let current_rate = self.inner.limiter.current_rate().await;
        let active = self.inner.worker_total - self.inner.workers.available_permits();
        let workers = format!("{}/{} workers busy", active, self.inner.worker_total);
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .await
            .values()
            .cloned()
            .collect();
        SchedulerStats {
            queue_depth,
            current_rate,
            workers,
            in_flight,
        }
    }

    /// Stop scheduling, persist a final snapshot of recoverable work, and
    /// fail every request still waiting for dispatch. In-flight workers are
    /// left to finish on their own, so each live submission still receives
    /// exactly one outcome.
    pub async fn shutdown(self) {
        // The loop re-queues anything it holds before returning
        let _ = self.shutdown_tx.send(true);
        let _ = self.loop_handle.await;
        self.snapshot_handle.abort();
        self.inner.workers.close();

        let records = self.inner.pending_snapshot_records().await;
        if let Err(e) = self.inner.snapshot.write(&records) {
            warn!("Failed to write final queue snapshot: {:#}", e);
        }

        let drained = std::mem::take(&mut *self.inner.queue.lock().await);
        if !drained.is_empty() {
            info!("Failing {} undispatched requests on shutdown", drained.len());
        }
        for pending in drained {
            finish(pending.request.completion, Err(SuggestionError::Shutdown));
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ClientError;
    use async_trait::async_trait;
    use std::sync::mpsc;
    use tempfile::tempdir;

    struct NeverClient;

    #[async_trait]
    impl CompletionClient for NeverClient {
        async fn call(
            &self,
            _content: &str,
            _context: &[crate::context::ContextMessage],
        ) -> Result<Vec<String>, ClientError> {
            std::future::pending().await
        }
    }

    fn test_config(data_dir: &std::path::Path, queue_capacity: usize) -> Config {
        let mut config = Config::for_testing();
        config.snapshot.data_dir = data_dir.to_string_lossy().to_string();
        config.scheduler.queue_capacity = queue_capacity;
        config
    }

    fn request(
        content: &str,
        identifier: Option<&str>,
        priority: Priority,
        completion: Completion,
    ) -> SuggestionRequest {
        SuggestionRequest {
            content: content.to_string(),
            identifier: identifier.map(str::to_string),
            priority,
            context: Vec::new(),
            completion,
        }
    }

    #[tokio::test]
    async fn test_snapshot_scope_high_and_identified_only() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 100);
        // Inner only: no scheduling loop, so nothing is dequeued underneath us
        let inner = SchedulerInner::new(&config, Arc::new(NeverClient)).unwrap();

        assert!(
            inner
                .submit(request("keep", Some("id-keep"), Priority::High, Completion::Recovered))
                .await
        );
        assert!(
            inner
                .submit(request("no id", None, Priority::High, Completion::Recovered))
                .await
        );
        assert!(
            inner
                .submit(request("low", Some("id-low"), Priority::Normal, Completion::Recovered))
                .await
        );

        let records = inner.pending_snapshot_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, "id-keep");
        assert_eq!(records[0].content, "keep");
    }

    #[tokio::test]
    async fn test_queue_full_rejects_synchronously() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 1);
        let inner = SchedulerInner::new(&config, Arc::new(NeverClient)).unwrap();

        assert!(
            inner
                .submit(request("first", None, Priority::Normal, Completion::Recovered))
                .await
        );

        let (tx, rx) = mpsc::channel();
        let completion = Completion::Live(Box::new(move |outcome| {
            tx.send(outcome).unwrap();
        }));
        let accepted = inner
            .submit(request("second", None, Priority::Normal, completion))
            .await;

        assert!(!accepted);
        let outcome = rx.try_recv().expect("rejection must be synchronous");
        assert!(matches!(outcome, Err(SuggestionError::QueueFull)));
    }

    #[tokio::test]
    async fn test_cached_identifier_short_circuits_submit() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 100);
        let inner = SchedulerInner::new(&config, Arc::new(NeverClient)).unwrap();

        let options = vec!["sure!".to_string(), "sounds good".to_string()];
        inner.cache.put("msg-1", options.clone()).await;

        let (tx, rx) = mpsc::channel();
        let completion = Completion::Live(Box::new(move |outcome| {
            tx.send(outcome).unwrap();
        }));
        assert!(
            inner
                .submit(request("hello?", Some("msg-1"), Priority::High, completion))
                .await
        );

        assert_eq!(rx.try_recv().unwrap().unwrap(), options);
        assert_eq!(inner.queue.lock().await.len(), 0);
    }
}

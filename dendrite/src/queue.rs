//! Bounded-parallelism work queue with priority ordering, retry with
//! exponential backoff and jitter, per-attempt timeouts, and graceful
//! lifecycle control.
//!
//! The engine's own protocol is sequential; this queue is the primitive for
//! fanning independent units of work out in parallel, whether that is a
//! strategy running sibling subtasks concurrently or a caller executing
//! several roots at once. Lifecycle events are broadcast for observability;
//! the returned handles are the only other externally visible channel.
//!
//! Cancellation is cooperative: queued entries are removed outright,
//! running entries are flagged and must check the flag themselves (via
//! [`ConcurrencyQueue::is_cancelled`]); there is no preemption.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;

/// Terminal outcome of a queue entry
pub type TaskResult = std::result::Result<Value, QueueError>;

/// One attempt's future
pub type WorkFuture = BoxFuture<'static, std::result::Result<Value, String>>;

/// Factory producing a fresh future per attempt, so retries re-run the work
pub type WorkFactory = Box<dyn FnMut() -> WorkFuture + Send>;

// ============================================================================
// Events, options, stats
// ============================================================================

/// Lifecycle events broadcast by the queue
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An entry was accepted and queued
    Queued {
        /// Entry id
        id: String,
        /// Entry priority
        priority: i32,
    },
    /// An attempt started running
    Started {
        /// Entry id
        id: String,
        /// Attempt number, 1-based
        attempt: u32,
    },
    /// An entry completed successfully
    Completed {
        /// Entry id
        id: String,
    },
    /// An entry failed terminally
    Failed {
        /// Entry id
        id: String,
        /// Attempts consumed
        attempts: u32,
        /// Final failure message
        message: String,
    },
    /// A failed attempt will be retried after a delay
    Retrying {
        /// Entry id
        id: String,
        /// The attempt that just failed
        attempt: u32,
        /// Backoff delay before the next attempt
        delay: Duration,
    },
    /// Dequeuing paused
    Paused,
    /// Dequeuing resumed
    Resumed,
    /// The queue stopped accepting new work
    Draining,
    /// Queue and running set are both empty after a drain
    Drained,
    /// An entry was cancelled
    Cancelled {
        /// Entry id
        id: String,
    },
    /// The concurrency cap changed
    ConcurrencyChanged {
        /// New cap
        concurrency: usize,
    },
    /// Queue and running set are both empty
    Idle,
}

/// Per-entry options for [`ConcurrencyQueue::add`]
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Priority; higher runs first, FIFO among equals
    pub priority: i32,

    /// Override the queue's `retry_limit + 1` attempt budget
    pub max_attempts: Option<u32>,

    /// Override the queue's default per-attempt timeout
    pub timeout: Option<Duration>,

    /// Explicit entry id; generated when absent
    pub id: Option<String>,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries waiting to run
    pub queued: usize,
    /// Entries currently running
    pub running: usize,
    /// Entries waiting out a retry delay
    pub pending_retries: usize,
    /// Terminally completed entries
    pub completed: u64,
    /// Terminally failed entries
    pub failed: u64,
    /// Retry attempts scheduled so far
    pub retried: u64,
    /// Cancelled entries
    pub cancelled: u64,
    /// Highest observed running-set size
    pub peak_concurrency: usize,
    /// Current concurrency cap
    pub concurrency: usize,
    /// Whether dequeuing is paused
    pub paused: bool,
    /// Whether the queue is draining
    pub draining: bool,
}

/// Observable state of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Waiting in the queue at this position
    Queued {
        /// Zero-based queue position
        position: usize,
    },
    /// Currently running
    Running,
    /// Waiting out a retry delay
    Retrying,
    /// Completed successfully
    Completed,
    /// Failed terminally
    Failed,
    /// Cancelled
    Cancelled,
}

/// Handle resolving with an entry's terminal outcome
pub struct TaskHandle {
    id: String,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    /// The entry's id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the entry to settle
    pub async fn wait(self) -> TaskResult {
        let id = self.id;
        self.rx
            .await
            .unwrap_or_else(|_| Err(QueueError::Closed { id }))
    }
}

// ============================================================================
// Internals
// ============================================================================

struct Entry {
    id: String,
    priority: i32,
    attempts: u32,
    max_attempts: u32,
    timeout: Option<Duration>,
    work: WorkFactory,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    failed: u64,
    retried: u64,
    cancelled: u64,
    peak_running: usize,
}

/// Why one attempt failed
enum AttemptFailure {
    TimedOut(Duration),
    Message(String),
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            AttemptFailure::TimedOut(limit) => format!("attempt timed out after {limit:?}"),
            AttemptFailure::Message(message) => message.clone(),
        }
    }
}

struct State {
    queued: VecDeque<Entry>,
    running: HashMap<String, Entry>,
    retrying: HashSet<String>,
    results: HashMap<String, TaskResult>,
    watchers: HashMap<String, Vec<oneshot::Sender<TaskResult>>>,
    concurrency: usize,
    paused: bool,
    draining: bool,
    counters: Counters,
}

struct Inner {
    state: Mutex<State>,
    events: broadcast::Sender<QueueEvent>,
    config: QueueConfig,
    idle: Notify,
}

/// Bounded-parallelism executor for independent async units of work
pub struct ConcurrencyQueue {
    inner: Arc<Inner>,
}

impl ConcurrencyQueue {
    /// Create a queue from configuration
    pub fn new(config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queued: VecDeque::new(),
                    running: HashMap::new(),
                    retrying: HashSet::new(),
                    results: HashMap::new(),
                    watchers: HashMap::new(),
                    concurrency: config.concurrency.max(1),
                    paused: false,
                    draining: false,
                    counters: Counters::default(),
                }),
                events,
                config,
                idle: Notify::new(),
            }),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Add a unit of work
    ///
    /// The factory is invoked once per attempt. The handle settles on
    /// eventual success or final failure; while draining, new work is
    /// rejected immediately.
    pub fn add<F, Fut>(
        &self,
        mut work: F,
        options: AddOptions,
    ) -> std::result::Result<TaskHandle, QueueError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Value, String>> + Send + 'static,
    {
        self.add_boxed(Box::new(move || Box::pin(work()) as WorkFuture), options)
    }

    /// Add a pre-boxed unit of work
    pub fn add_boxed(
        &self,
        work: WorkFactory,
        options: AddOptions,
    ) -> std::result::Result<TaskHandle, QueueError> {
        let (id, rx) = {
            let mut state = self.inner.state.lock();
            if state.draining {
                return Err(QueueError::Draining);
            }

            let id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let entry = Entry {
                id: id.clone(),
                priority: options.priority,
                attempts: 0,
                max_attempts: options
                    .max_attempts
                    .unwrap_or(self.inner.config.retry_limit + 1)
                    .max(1),
                timeout: options.timeout.or(self.inner.config.default_timeout),
                work,
                cancelled: Arc::new(AtomicBool::new(false)),
            };
            let priority = entry.priority;
            insert_by_priority(&mut state.queued, entry);

            let (tx, rx) = oneshot::channel();
            state.watchers.entry(id.clone()).or_default().push(tx);
            let _ = self.inner.events.send(QueueEvent::Queued {
                id: id.clone(),
                priority,
            });
            (id, rx)
        };

        Self::pump(&self.inner);
        Ok(TaskHandle { id, rx })
    }

    /// Stop dequeuing without disturbing in-flight work
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        let _ = self.inner.events.send(QueueEvent::Paused);
    }

    /// Restart dequeuing
    pub fn resume(&self) {
        self.inner.state.lock().paused = false;
        let _ = self.inner.events.send(QueueEvent::Resumed);
        Self::pump(&self.inner);
    }

    /// Stop accepting new work and wait until queue and running set are empty
    pub async fn drain(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.draining {
                state.draining = true;
                let _ = self.inner.events.send(QueueEvent::Draining);
            }
        }
        self.wait_until_empty().await;
        let _ = self.inner.events.send(QueueEvent::Drained);
    }

    /// Wait until queue, running set, and pending retries are all empty
    pub async fn wait_for_all(&self) {
        self.wait_until_empty().await;
    }

    async fn wait_until_empty(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn is_empty(&self) -> bool {
        let state = self.inner.state.lock();
        state.queued.is_empty() && state.running.is_empty() && state.retrying.is_empty()
    }

    /// Remove every queued entry, rejecting their handles
    pub fn clear(&self) {
        let drained: Vec<Entry> = {
            let mut state = self.inner.state.lock();
            state.queued.drain(..).collect()
        };
        for entry in drained {
            let mut state = self.inner.state.lock();
            state.counters.cancelled += 1;
            settle_watchers(
                &mut state,
                &entry.id,
                Err(QueueError::Cancelled {
                    id: entry.id.clone(),
                }),
            );
            let _ = self.inner.events.send(QueueEvent::Cancelled {
                id: entry.id.clone(),
            });
        }
        self.notify_if_empty();
    }

    /// Cancel an entry
    ///
    /// A queued entry is removed and rejected immediately; a running entry
    /// is flagged cooperatively. Returns whether the id was known.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state
                .queued
                .iter()
                .position(|e| e.id == id)
                .and_then(|pos| state.queued.remove(pos))
            {
                state.counters.cancelled += 1;
                settle_watchers(
                    &mut state,
                    &entry.id,
                    Err(QueueError::Cancelled {
                        id: entry.id.clone(),
                    }),
                );
                let _ = self.inner.events.send(QueueEvent::Cancelled {
                    id: entry.id.clone(),
                });
                true
            } else if let Some(entry) = state.running.get(id) {
                entry.cancelled.store(true, Ordering::SeqCst);
                debug!(id, "flagged running entry for cooperative cancellation");
                return true;
            } else {
                return false;
            }
        };
        self.notify_if_empty();
        removed
    }

    /// Whether a running entry has been flagged for cancellation
    pub fn is_cancelled(&self, id: &str) -> bool {
        let state = self.inner.state.lock();
        state
            .running
            .get(id)
            .map(|e| e.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Adjust the concurrency cap, immediately filling freed slots
    pub fn set_concurrency(&self, concurrency: usize) {
        let concurrency = concurrency.max(1);
        self.inner.state.lock().concurrency = concurrency;
        let _ = self
            .inner
            .events
            .send(QueueEvent::ConcurrencyChanged { concurrency });
        Self::pump(&self.inner);
    }

    /// Point-in-time statistics
    pub fn get_stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            queued: state.queued.len(),
            running: state.running.len(),
            pending_retries: state.retrying.len(),
            completed: state.counters.completed,
            failed: state.counters.failed,
            retried: state.counters.retried,
            cancelled: state.counters.cancelled,
            peak_concurrency: state.counters.peak_running,
            concurrency: state.concurrency,
            paused: state.paused,
            draining: state.draining,
        }
    }

    /// Observable state of one entry
    pub fn get_status(&self, id: &str) -> Option<EntryState> {
        let state = self.inner.state.lock();
        if state.retrying.contains(id) {
            return Some(EntryState::Retrying);
        }
        if let Some(position) = state.queued.iter().position(|e| e.id == id) {
            // a queued entry that already consumed attempts is awaiting retry
            let entry = &state.queued[position];
            if entry.attempts > 0 {
                return Some(EntryState::Retrying);
            }
            return Some(EntryState::Queued { position });
        }
        if state.running.contains_key(id) {
            return Some(EntryState::Running);
        }
        match state.results.get(id) {
            Some(Ok(_)) => Some(EntryState::Completed),
            Some(Err(QueueError::Cancelled { .. })) => Some(EntryState::Cancelled),
            Some(Err(_)) => Some(EntryState::Failed),
            None => None,
        }
    }

    /// Wait for one entry's terminal outcome
    pub async fn wait_for_task(&self, id: &str) -> TaskResult {
        let rx = {
            let mut state = self.inner.state.lock();
            if let Some(result) = state.results.get(id) {
                return result.clone();
            }
            let known = state.queued.iter().any(|e| e.id == id)
                || state.running.contains_key(id)
                || state.retrying.contains(id)
                || state.watchers.contains_key(id);
            if !known {
                return Err(QueueError::TaskNotFound { id: id.to_string() });
            }
            let (tx, rx) = oneshot::channel();
            state.watchers.entry(id.to_string()).or_default().push(tx);
            rx
        };
        rx.await
            .unwrap_or_else(|_| Err(QueueError::Closed { id: id.to_string() }))
    }

    fn notify_if_empty(&self) {
        if self.is_empty() {
            let _ = self.inner.events.send(QueueEvent::Idle);
            self.inner.idle.notify_waiters();
        }
    }

    /// Fill every free slot with queued work
    fn pump(inner: &Arc<Inner>) {
        loop {
            let started = {
                let mut state = inner.state.lock();
                if state.paused || state.running.len() >= state.concurrency {
                    None
                } else if let Some(mut entry) = state.queued.pop_front() {
                    entry.attempts += 1;
                    let id = entry.id.clone();
                    let attempt = entry.attempts;
                    let timeout = entry.timeout;
                    let fut = (entry.work)();
                    state.running.insert(id.clone(), entry);
                    state.counters.peak_running =
                        state.counters.peak_running.max(state.running.len());
                    let _ = inner.events.send(QueueEvent::Started {
                        id: id.clone(),
                        attempt,
                    });
                    Some((id, attempt, timeout, fut))
                } else {
                    None
                }
            };

            let Some((id, _attempt, attempt_timeout, fut)) = started else {
                return;
            };

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let result = match attempt_timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(result) => result.map_err(AttemptFailure::Message),
                        Err(_) => Err(AttemptFailure::TimedOut(limit)),
                    },
                    None => fut.await.map_err(AttemptFailure::Message),
                };
                Self::settle(&inner, &id, result);
            });
        }
    }

    /// Handle one attempt's settlement
    fn settle(inner: &Arc<Inner>, id: &str, result: std::result::Result<Value, AttemptFailure>) {
        let retry: Option<(Entry, Duration)> = {
            let mut state = inner.state.lock();
            let Some(entry) = state.running.remove(id) else {
                return;
            };

            if entry.cancelled.load(Ordering::SeqCst) {
                state.counters.cancelled += 1;
                settle_watchers(
                    &mut state,
                    id,
                    Err(QueueError::Cancelled { id: id.to_string() }),
                );
                let _ = inner.events.send(QueueEvent::Cancelled { id: id.to_string() });
                None
            } else {
                match result {
                    Ok(value) => {
                        state.counters.completed += 1;
                        settle_watchers(&mut state, id, Ok(value));
                        let _ = inner.events.send(QueueEvent::Completed { id: id.to_string() });
                        None
                    }
                    Err(failure) if entry.attempts < entry.max_attempts => {
                        state.counters.retried += 1;
                        state.retrying.insert(id.to_string());
                        let delay = calculate_retry_delay(entry.attempts, &inner.config);
                        let message = failure.describe();
                        warn!(id, attempt = entry.attempts, ?delay, %message, "attempt failed; retrying");
                        let _ = inner.events.send(QueueEvent::Retrying {
                            id: id.to_string(),
                            attempt: entry.attempts,
                            delay,
                        });
                        Some((entry, delay))
                    }
                    Err(failure) => {
                        state.counters.failed += 1;
                        let attempts = entry.attempts;
                        let message = failure.describe();
                        let outcome = match failure {
                            AttemptFailure::TimedOut(_) => {
                                QueueError::Timeout { id: id.to_string() }
                            }
                            AttemptFailure::Message(text) => QueueError::AttemptsExhausted {
                                id: id.to_string(),
                                attempts,
                                message: text,
                            },
                        };
                        settle_watchers(&mut state, id, Err(outcome));
                        let _ = inner.events.send(QueueEvent::Failed {
                            id: id.to_string(),
                            attempts,
                            message,
                        });
                        None
                    }
                }
            }
        };

        match retry {
            Some((entry, delay)) => {
                let inner = Arc::clone(inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    {
                        let mut state = inner.state.lock();
                        state.retrying.remove(&entry.id);
                        insert_by_priority(&mut state.queued, entry);
                    }
                    Self::pump(&inner);
                });
            }
            None => {
                Self::pump(inner);
                let queue = ConcurrencyQueue {
                    inner: Arc::clone(inner),
                };
                queue.notify_if_empty();
            }
        }
    }
}

/// Place an entry before the first queued entry of strictly lower priority,
/// keeping FIFO order among equal priorities
fn insert_by_priority(queued: &mut VecDeque<Entry>, entry: Entry) {
    let position = queued
        .iter()
        .position(|e| e.priority < entry.priority)
        .unwrap_or(queued.len());
    queued.insert(position, entry);
}

fn settle_watchers(state: &mut State, id: &str, result: TaskResult) {
    state.results.insert(id.to_string(), result.clone());
    if let Some(watchers) = state.watchers.remove(id) {
        for watcher in watchers {
            let _ = watcher.send(result.clone());
        }
    }
}

/// Backoff delay for the attempt that just failed
///
/// `min(base * 2^(attempt-1), max_retry_delay)` plus up to 30 % jitter.
pub fn calculate_retry_delay(attempt: u32, config: &QueueConfig) -> Duration {
    let exponent = attempt.max(1).saturating_sub(1).min(32);
    let backoff = config
        .base_retry_delay
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = backoff.min(config.max_retry_delay);
    let jitter = capped.mul_f64(rand::rng().random::<f64>() * 0.3);
    capped + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn fast_config(concurrency: usize) -> QueueConfig {
        QueueConfig {
            concurrency,
            retry_limit: 2,
            base_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(10),
            default_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let queue = ConcurrencyQueue::new(fast_config(2));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let current = current.clone();
            let peak = peak.clone();
            let handle = queue
                .add(
                    move || {
                        let current = current.clone();
                        let peak = peak.clone();
                        async move {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Ok(json!(1))
                        }
                    },
                    AddOptions::default(),
                )
                .unwrap();
            handles.push(handle);
        }

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.get_stats().completed, 5);
    }

    #[tokio::test]
    async fn test_priority_ordering_with_fifo_ties() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        queue.pause();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (name, priority) in [("low", 0), ("high", 5), ("mid-a", 3), ("mid-b", 3)] {
            let order = order.clone();
            let handle = queue
                .add(
                    move || {
                        let order = order.clone();
                        async move {
                            order.lock().push(name);
                            Ok(Value::Null)
                        }
                    },
                    AddOptions {
                        priority,
                        ..AddOptions::default()
                    },
                )
                .unwrap();
            handles.push(handle);
        }

        queue.resume();
        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["high", "mid-a", "mid-b", "low"]);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let handle = queue
            .add(
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("flaky".to_string())
                        } else {
                            Ok(json!("ok"))
                        }
                    }
                },
                AddOptions::default(),
            )
            .unwrap();

        let result = handle.wait().await.unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(queue.get_stats().retried, 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_reject_with_failure() {
        let queue = ConcurrencyQueue::new(fast_config(1));

        let handle = queue
            .add(
                || async { Err::<Value, _>("always broken".to_string()) },
                AddOptions {
                    max_attempts: Some(2),
                    ..AddOptions::default()
                },
            )
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        match err {
            QueueError::AttemptsExhausted { attempts, message, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(message, "always broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(queue.get_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_final_attempt_timeout_rejects_with_timeout_error() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        let mut events = queue.subscribe();

        let handle = queue
            .add(
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                },
                AddOptions {
                    max_attempts: Some(1),
                    timeout: Some(Duration::from_millis(5)),
                    id: Some("slow".to_string()),
                    ..AddOptions::default()
                },
            )
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err, QueueError::Timeout { id: "slow".to_string() });
        assert_eq!(queue.get_status("slow"), Some(EntryState::Failed));

        let mut failed_message = None;
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::Failed { id, message, .. } = event {
                if id == "slow" {
                    failed_message = Some(message);
                }
            }
        }
        assert!(failed_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_retry_wait_is_observable_as_retrying() {
        let config = QueueConfig {
            concurrency: 1,
            retry_limit: 1,
            base_retry_delay: Duration::from_millis(50),
            max_retry_delay: Duration::from_millis(50),
            default_timeout: None,
        };
        let queue = ConcurrencyQueue::new(config);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let handle = queue
            .add(
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err("first attempt fails".to_string())
                        } else {
                            Ok(json!("second attempt"))
                        }
                    }
                },
                AddOptions {
                    id: Some("flaky".to_string()),
                    ..AddOptions::default()
                },
            )
            .unwrap();

        // sample mid-backoff: the first attempt fails immediately and the
        // retry sleeps for at least 50ms
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(queue.get_status("flaky"), Some(EntryState::Retrying));
        assert_eq!(queue.get_stats().pending_retries, 1);

        handle.wait().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(queue.get_status("flaky"), Some(EntryState::Completed));
        assert_eq!(queue.get_stats().pending_retries, 0);
    }

    #[tokio::test]
    async fn test_drain_rejects_new_work_and_resolves_when_empty() {
        let queue = ConcurrencyQueue::new(fast_config(2));

        for _ in 0..3 {
            queue
                .add(
                    || async {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        Ok(Value::Null)
                    },
                    AddOptions::default(),
                )
                .unwrap();
        }

        queue.drain().await;
        let stats = queue.get_stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.completed, 3);

        let rejected = queue.add(|| async { Ok(Value::Null) }, AddOptions::default());
        assert!(matches!(rejected, Err(QueueError::Draining)));
    }

    #[tokio::test]
    async fn test_cancel_queued_entry_rejects_immediately() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        queue.pause();

        let handle = queue
            .add(
                || async { Ok(Value::Null) },
                AddOptions {
                    id: Some("victim".to_string()),
                    ..AddOptions::default()
                },
            )
            .unwrap();

        assert!(queue.cancel("victim"));
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, QueueError::Cancelled { .. }));
        assert_eq!(queue.get_status("victim"), Some(EntryState::Cancelled));
        assert!(!queue.cancel("unknown"));
    }

    #[tokio::test]
    async fn test_wait_for_task_returns_stored_result() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        let handle = queue
            .add(
                || async { Ok(json!("stored")) },
                AddOptions {
                    id: Some("t1".to_string()),
                    ..AddOptions::default()
                },
            )
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(queue.wait_for_task("t1").await.unwrap(), json!("stored"));
        assert!(matches!(
            queue.wait_for_task("nope").await.unwrap_err(),
            QueueError::TaskNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        let mut events = queue.subscribe();

        let handle = queue
            .add(
                || async { Ok(Value::Null) },
                AddOptions {
                    id: Some("observed".to_string()),
                    ..AddOptions::default()
                },
            )
            .unwrap();
        handle.wait().await.unwrap();

        let mut saw_queued = false;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                QueueEvent::Queued { id, .. } if id == "observed" => saw_queued = true,
                QueueEvent::Completed { id } if id == "observed" => saw_completed = true,
                _ => {}
            }
        }
        assert!(saw_queued);
        assert!(saw_completed);
    }

    #[test]
    fn test_retry_delay_bounds_and_cap() {
        let config = QueueConfig {
            concurrency: 1,
            retry_limit: 5,
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(1),
            default_timeout: None,
        };

        let mut previous_floor = Duration::ZERO;
        for attempt in 1..=8 {
            let raw = config
                .base_retry_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1));
            let floor = raw.min(config.max_retry_delay);
            let delay = calculate_retry_delay(attempt, &config);

            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(
                delay <= floor.mul_f64(1.3) + Duration::from_nanos(1),
                "attempt {attempt}: {delay:?} above jitter ceiling"
            );
            assert!(floor >= previous_floor, "backoff floor must be non-decreasing");
            previous_floor = floor;
        }

        // deep attempts are capped before jitter
        let capped = calculate_retry_delay(30, &config);
        assert!(capped <= config.max_retry_delay.mul_f64(1.3) + Duration::from_nanos(1));
    }

    #[tokio::test]
    async fn test_set_concurrency_fills_freed_slots() {
        let queue = ConcurrencyQueue::new(fast_config(1));
        queue.pause();

        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(
                queue
                    .add(
                        || async {
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            Ok(Value::Null)
                        },
                        AddOptions::default(),
                    )
                    .unwrap(),
            );
        }

        queue.set_concurrency(4);
        queue.resume();
        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(queue.get_stats().concurrency, 4);
        assert_eq!(queue.get_stats().completed, 4);
    }
}

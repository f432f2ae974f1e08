//! Central API queue.
//!
//! All API calls are funnelled through a single background worker task that
//! processes them one at a time, respecting the service's rate limits.
//! `submit` returns immediately; results come back on the queue's event
//! channel, whose single consumer receives them exactly once and in
//! completion order.
//!
//! The worker suspends in exactly three places: waiting for work, the
//! transport's inter-request wait, and the retry sleep after a short
//! rate-limit response.

mod history;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use desec_desk_client::{ApiOutcome, ApiRequest, HttpMethod, Transport};

use crate::error::{CoreError, CoreResult};

/// Retries attempted for a short rate-limit response before giving up.
pub const MAX_RETRIES: u32 = 3;

/// Rate-limit waits above this many seconds skip retrying and trigger
/// cooldown instead.
pub const COOLDOWN_THRESHOLD_SECS: f64 = 60.0;

/// Default history retention.
pub const DEFAULT_HISTORY_LIMIT: usize = 5000;

/// Dispatch priority; lower dispatches first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Zone list loads, connectivity checks.
    High = 0,
    /// Interactive CRUD (records, tokens).
    Normal = 1,
    /// Background sync and refresh.
    Low = 2,
}

/// Life-cycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Cancelled,
    /// Terminal: the service asked for a wait too long to retry through.
    RateLimited,
}

impl ItemStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// One unit of work for the API queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Monotonic id assigned at enqueue.
    pub id: u64,
    pub priority: Priority,
    /// Tag grouping related work: `records`, `zones`, `tokens`, `account`,
    /// `connectivity`.
    pub category: String,
    /// Human-readable description shown in the queue UI.
    pub action: String,
    pub request: ApiRequest,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Parsed response body on success; structured error details otherwise.
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Bulk-operation group this item belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u64>,
    /// FIFO tie-breaker within a priority tier; never persisted.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl QueueItem {
    /// Wall-clock time from dispatch to completion.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// Structural copy of the queue for display purposes.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Pending items in dispatch order.
    pub pending: Vec<QueueItem>,
    pub running: Option<QueueItem>,
    /// Terminal items, most recent first.
    pub history: Vec<QueueItem>,
}

/// Events emitted by the queue, in completion order, to a single consumer.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Started(u64),
    /// Terminal state of an item; carries the full item.
    Finished(QueueItem),
    /// A rate-limit response was observed.
    RateLimited { retry_after: f64 },
    Paused,
    Resumed,
    /// Pending/history counts changed.
    Changed,
}

/// Construction options for [`ApiQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub history_limit: usize,
    pub persist: bool,
    pub history_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            persist: false,
            history_path: None,
        }
    }
}

/// Heap key: strict priority, then FIFO within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Priority,
    seq: u64,
    id: u64,
}

struct QueueState {
    pending: BinaryHeap<Reverse<PendingKey>>,
    /// Pending and running items by id.
    items: HashMap<u64, QueueItem>,
    /// Terminal items, front = newest.
    history: VecDeque<QueueItem>,
    cancel_requested: HashSet<u64>,
    running: Option<u64>,
    next_id: u64,
    next_seq: u64,
    history_limit: usize,
    persist: bool,
    history_path: Option<PathBuf>,
}

impl QueueState {
    fn trim_history(&mut self) {
        while self.history.len() > self.history_limit {
            self.history.pop_back();
        }
    }

    /// Returns what to persist, if persistence is on (caller writes outside
    /// the lock).
    fn persist_job(&self) -> Option<(PathBuf, Vec<QueueItem>)> {
        if !self.persist {
            return None;
        }
        let path = self.history_path.clone()?;
        Some((path, self.history.iter().cloned().collect()))
    }
}

struct QueueInner {
    transport: Arc<dyn Transport>,
    state: Mutex<QueueState>,
    notify: Notify,
    events: mpsc::UnboundedSender<QueueEvent>,
    paused: AtomicBool,
    stopping: AtomicBool,
    /// Bumped on every pause/resume so a stale cooldown timer never resumes
    /// a queue the user has since paused for other reasons.
    pause_epoch: AtomicU64,
}

impl QueueInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    fn write_history(&self, job: Option<(PathBuf, Vec<QueueItem>)>) {
        if let Some((path, items)) = job {
            if let Err(e) = history::save(&path, &items) {
                log::warn!("Failed to save queue history: {e}");
            }
        }
    }
}

/// Background worker that processes [`QueueItem`]s sequentially.
pub struct ApiQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ApiQueue {
    /// Creates the queue and spawns its worker task.
    ///
    /// When persistence is configured, previously saved history is loaded
    /// before the worker starts.
    #[must_use]
    pub fn spawn(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<QueueEvent>,
        config: QueueConfig,
    ) -> Self {
        let mut loaded: VecDeque<QueueItem> = VecDeque::new();
        if config.persist {
            if let Some(path) = &config.history_path {
                for item in history::load(path) {
                    loaded.push_back(item);
                }
            }
        }
        let next_id = loaded.iter().map(|i| i.id + 1).max().unwrap_or(1);
        while loaded.len() > config.history_limit {
            loaded.pop_back();
        }

        let inner = Arc::new(QueueInner {
            transport,
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                items: HashMap::new(),
                history: loaded,
                cancel_requested: HashSet::new(),
                running: None,
                next_id,
                next_seq: 0,
                history_limit: config.history_limit,
                persist: config.persist,
                history_path: config.history_path,
            }),
            notify: Notify::new(),
            events,
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            pause_epoch: AtomicU64::new(0),
        });

        let worker = tokio::spawn(worker_loop(Arc::clone(&inner)));
        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    // ===== Submission =====

    /// Enqueues a request. Returns the item id.
    ///
    /// A paused queue still accepts work; it is dispatched on resume.
    pub fn submit(
        &self,
        priority: Priority,
        category: &str,
        action: &str,
        request: ApiRequest,
    ) -> CoreResult<u64> {
        self.submit_in_group(priority, category, action, request, None)
    }

    /// [`Self::submit`] with a bulk-group tag.
    pub fn submit_in_group(
        &self,
        priority: Priority,
        category: &str,
        action: &str,
        request: ApiRequest,
        group: Option<u64>,
    ) -> CoreResult<u64> {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(CoreError::QueueClosed);
        }

        let id = {
            let mut state = self.inner.lock();
            let id = state.next_id;
            state.next_id += 1;
            let seq = state.next_seq;
            state.next_seq += 1;

            let item = QueueItem {
                id,
                priority,
                category: category.to_string(),
                action: action.to_string(),
                request,
                status: ItemStatus::Pending,
                retry_count: 0,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                response: None,
                error: None,
                group,
                seq,
            };
            state.pending.push(Reverse(PendingKey { priority, seq, id }));
            state.items.insert(id, item);
            id
        };

        log::debug!("Enqueued [{id}] {action} (priority {priority:?})");
        self.inner.emit(QueueEvent::Changed);
        self.inner.notify.notify_one();
        Ok(id)
    }

    // ===== Flow control =====

    /// Pauses dispatch after the current item completes. Pending items stay
    /// queued.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.pause_epoch.fetch_add(1, Ordering::SeqCst);
        log::info!("Queue paused");
        self.inner.emit(QueueEvent::Paused);
    }

    /// Resumes dispatch.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.pause_epoch.fetch_add(1, Ordering::SeqCst);
        log::info!("Queue resumed");
        self.inner.emit(QueueEvent::Resumed);
        self.inner.notify.notify_one();
    }

    /// Whether the queue is currently paused (explicitly or by cooldown).
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    // ===== Cancellation =====

    /// Cancels an item.
    ///
    /// Pending items are cancelled synchronously and guaranteed. For a
    /// running item this is best-effort: the flag is checked when the
    /// response is classified and before any retry sleep; if the response
    /// already classified, the classification wins.
    pub fn cancel(&self, id: u64) -> bool {
        let (cancelled_item, job) = {
            let mut state = self.inner.lock();
            match state.items.get(&id).map(|i| i.status) {
                Some(ItemStatus::Pending) => {
                    // Heap entry becomes stale and is skipped by the worker.
                    let mut item = match state.items.remove(&id) {
                        Some(item) => item,
                        None => return false,
                    };
                    item.status = ItemStatus::Cancelled;
                    item.completed_at = Some(Utc::now());
                    state.history.push_front(item.clone());
                    state.trim_history();
                    let job = state.persist_job();
                    (Some(item), job)
                }
                Some(ItemStatus::Running) => {
                    state.cancel_requested.insert(id);
                    (None, None)
                }
                _ => return false,
            }
        };

        if let Some(item) = cancelled_item {
            log::debug!("Cancelled [{id}] {}", item.action);
            self.inner.write_history(job);
            self.inner.emit(QueueEvent::Finished(item));
            self.inner.emit(QueueEvent::Changed);
        }
        true
    }

    // ===== History maintenance =====

    /// Re-enqueues a failed, cancelled, or rate-limited history item.
    pub fn retry(&self, id: u64) {
        let requeued = {
            let mut state = self.inner.lock();
            let position = state.history.iter().position(|i| {
                i.id == id
                    && matches!(
                        i.status,
                        ItemStatus::Failed | ItemStatus::Cancelled | ItemStatus::RateLimited
                    )
            });
            let Some(position) = position else {
                return;
            };
            let mut item = match state.history.remove(position) {
                Some(item) => item,
                None => return,
            };
            item.status = ItemStatus::Pending;
            item.retry_count = 0;
            item.error = None;
            item.response = None;
            item.started_at = None;
            item.completed_at = None;
            item.created_at = Utc::now();
            item.seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Reverse(PendingKey {
                priority: item.priority,
                seq: item.seq,
                id: item.id,
            }));
            state.items.insert(item.id, item);
            true
        };
        if requeued {
            self.inner.emit(QueueEvent::Changed);
            self.inner.notify.notify_one();
        }
    }

    /// Re-enqueues every failed history item.
    pub fn retry_failed(&self) {
        let ids: Vec<u64> = {
            let state = self.inner.lock();
            state
                .history
                .iter()
                .filter(|i| i.status == ItemStatus::Failed)
                .map(|i| i.id)
                .collect()
        };
        for id in ids {
            self.retry(id);
        }
    }

    /// Drops successfully completed and cancelled items from history,
    /// keeping failures for inspection.
    pub fn clear_completed(&self) {
        let job = {
            let mut state = self.inner.lock();
            state
                .history
                .retain(|i| matches!(i.status, ItemStatus::Failed | ItemStatus::RateLimited));
            state.persist_job()
        };
        self.inner.write_history(job);
        self.inner.emit(QueueEvent::Changed);
    }

    /// Drops all history.
    pub fn clear_history(&self) {
        let job = {
            let mut state = self.inner.lock();
            state.history.clear();
            state.persist_job()
        };
        self.inner.write_history(job);
        self.inner.emit(QueueEvent::Changed);
    }

    /// Updates the history retention cap at runtime.
    pub fn set_history_limit(&self, limit: usize) {
        let job = {
            let mut state = self.inner.lock();
            state.history_limit = limit;
            state.trim_history();
            state.persist_job()
        };
        self.inner.write_history(job);
    }

    /// Enables or disables history persistence at runtime.
    pub fn set_persist(&self, enabled: bool, path: Option<PathBuf>) {
        let job = {
            let mut state = self.inner.lock();
            state.persist = enabled;
            if path.is_some() {
                state.history_path = path;
            }
            if enabled {
                state.persist_job()
            } else {
                None
            }
        };
        self.inner.write_history(job);
    }

    // ===== Introspection =====

    #[must_use]
    pub fn pending_count(&self) -> usize {
        let state = self.inner.lock();
        state
            .items
            .values()
            .filter(|i| i.status == ItemStatus::Pending)
            .count()
    }

    /// Structural copy of pending work and history.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.lock();
        let mut pending: Vec<QueueItem> = state
            .items
            .values()
            .filter(|i| i.status == ItemStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|i| (i.priority, i.seq));
        QueueSnapshot {
            pending,
            running: state.running.and_then(|id| state.items.get(&id).cloned()),
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Stops the worker after the current item and persists history.
    pub async fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();

        let handle = {
            let mut guard = self
                .worker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let job = {
            let state = self.inner.lock();
            state.persist_job()
        };
        self.inner.write_history(job);
        log::info!("API queue worker stopped");
    }
}

/// Removes the one-time token secret from a stored history entry.
///
/// The live completion event still carries it; disk and history copies
/// never do.
fn redact_token_secret(item: &mut QueueItem) {
    if item.request.method == HttpMethod::Post && item.request.path.starts_with("/auth/tokens") {
        if let Some(serde_json::Value::Object(body)) = item.response.as_mut() {
            if body.remove("token").is_some() {
                body.insert(
                    "token".to_string(),
                    serde_json::Value::String("<redacted>".to_string()),
                );
            }
        }
    }
}

/// Pops the next runnable item, marking it running. Stale heap entries
/// (cancelled or re-enqueued items) are discarded on the way.
fn take_next(inner: &QueueInner) -> Option<QueueItem> {
    let mut state = inner.lock();
    while let Some(Reverse(key)) = state.pending.pop() {
        let runnable = match state.items.get(&key.id) {
            Some(item) => item.status == ItemStatus::Pending && item.seq == key.seq,
            None => false,
        };
        if !runnable {
            continue;
        }
        if let Some(item) = state.items.get_mut(&key.id) {
            item.status = ItemStatus::Running;
            item.started_at = Some(Utc::now());
            let snapshot = item.clone();
            state.running = Some(key.id);
            return Some(snapshot);
        }
    }
    None
}

/// Moves a terminal item to history and announces it.
fn finish_item(inner: &QueueInner, mut item: QueueItem) {
    item.completed_at = Some(Utc::now());

    let job = {
        let mut state = inner.lock();
        state.running = None;
        state.items.remove(&item.id);
        state.cancel_requested.remove(&item.id);

        let mut stored = item.clone();
        redact_token_secret(&mut stored);
        state.history.push_front(stored);
        state.trim_history();
        state.persist_job()
    };
    inner.write_history(job);

    inner.emit(QueueEvent::Finished(item));
    inner.emit(QueueEvent::Changed);
}

/// Re-enqueues a rate-limited item at the back of its priority tier.
fn requeue_for_retry(inner: &QueueInner, mut item: QueueItem) {
    let mut state = inner.lock();
    state.running = None;
    item.status = ItemStatus::Pending;
    item.started_at = None;
    item.seq = state.next_seq;
    state.next_seq += 1;
    state.pending.push(Reverse(PendingKey {
        priority: item.priority,
        seq: item.seq,
        id: item.id,
    }));
    state.items.insert(item.id, item);
}

fn cancel_requested(inner: &QueueInner, id: u64) -> bool {
    let mut state = inner.lock();
    state.cancel_requested.remove(&id)
}

/// Starts the auto-resume timer for a cooldown.
fn enter_cooldown(inner: &Arc<QueueInner>, retry_after: f64) {
    inner.paused.store(true, Ordering::SeqCst);
    let epoch = inner.pause_epoch.fetch_add(1, Ordering::SeqCst) + 1;
    log::warn!("Entering cooldown for {retry_after:.0}s");
    inner.emit(QueueEvent::Paused);

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
        // Only auto-resume if no explicit pause/resume happened since.
        if inner.pause_epoch.load(Ordering::SeqCst) == epoch
            && inner.paused.load(Ordering::SeqCst)
            && !inner.stopping.load(Ordering::SeqCst)
        {
            inner.paused.store(false, Ordering::SeqCst);
            inner.pause_epoch.fetch_add(1, Ordering::SeqCst);
            log::info!("Cooldown over; queue resumed");
            inner.emit(QueueEvent::Resumed);
            inner.notify.notify_one();
        }
    });
}

/// Main processing loop.
async fn worker_loop(inner: Arc<QueueInner>) {
    log::info!("API queue worker started");

    loop {
        if inner.stopping.load(Ordering::SeqCst) {
            break;
        }

        // Register for wakeups before checking for work, so a submit racing
        // with the check is never lost.
        let notified = inner.notify.notified();

        if inner.paused.load(Ordering::SeqCst) {
            notified.await;
            continue;
        }

        let Some(mut item) = take_next(&inner) else {
            notified.await;
            continue;
        };

        log::debug!("Dispatching [{}] {}", item.id, item.action);
        inner.emit(QueueEvent::Started(item.id));
        inner.emit(QueueEvent::Changed);

        let outcome = inner.transport.execute(&item.request).await;

        // A cancel that lands before classification discards the result.
        if cancel_requested(&inner, item.id) {
            item.status = ItemStatus::Cancelled;
            finish_item(&inner, item);
            continue;
        }

        match outcome {
            ApiOutcome::Success { body, .. } => {
                item.status = ItemStatus::Ok;
                item.response = body;
                finish_item(&inner, item);
            }
            ApiOutcome::Failed(error) => {
                if error.is_expected() {
                    log::warn!("[{}] {} failed: {error}", item.id, item.action);
                } else {
                    log::error!("[{}] {} failed: {error}", item.id, item.action);
                }
                item.status = ItemStatus::Failed;
                item.error = Some(error.to_string());
                item.response = serde_json::to_value(&error).ok();
                finish_item(&inner, item);
            }
            ApiOutcome::RateLimited(rl) => {
                inner.transport.adapt_rate_limit(rl.retry_after).await;

                if rl.retry_after <= COOLDOWN_THRESHOLD_SECS && item.retry_count < MAX_RETRIES {
                    item.retry_count += 1;
                    log::warn!(
                        "429 [{}] - retry {}/{MAX_RETRIES} after {:.1}s",
                        item.id,
                        item.retry_count,
                        rl.retry_after,
                    );
                    if item.retry_count == 1 {
                        inner.emit(QueueEvent::RateLimited {
                            retry_after: rl.retry_after,
                        });
                    }

                    tokio::time::sleep(Duration::from_secs_f64(rl.retry_after)).await;

                    if cancel_requested(&inner, item.id) {
                        item.status = ItemStatus::Cancelled;
                        finish_item(&inner, item);
                        continue;
                    }
                    requeue_for_retry(&inner, item);
                    inner.emit(QueueEvent::Changed);
                } else {
                    item.status = ItemStatus::RateLimited;
                    item.error = Some(format!(
                        "Rate limited - retry in {:.0}s: {}",
                        rl.retry_after, rl.message
                    ));
                    item.response = rl.raw.clone();
                    let retry_after = rl.retry_after;
                    // Pause before announcing the item, so any observer of
                    // the terminal event already sees the cooldown state.
                    enter_cooldown(&inner, retry_after);
                    inner.emit(QueueEvent::RateLimited { retry_after });
                    finish_item(&inner, item);
                }
            }
        }
    }
}

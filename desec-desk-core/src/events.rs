//! Events delivered to the UI layer.
//!
//! The core never calls back into UI code. Everything it has to say goes
//! through one unbounded channel whose receiver lives on the UI-owning
//! thread; delivery is exactly-once and preserves completion order.

use serde::Serialize;

use crate::queue::QueueItem;

/// Severity of a [`CoreEvent::Notify`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// Aggregate result of a bulk operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkSummary {
    pub group: u64,
    pub success_count: usize,
    pub failed_count: usize,
    pub failures: Vec<BulkFailure>,
}

/// One failed entry of a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub action: String,
    pub reason: String,
}

/// Everything the core reports to its single UI consumer.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Connectivity state flipped.
    OnlineChanged(bool),
    /// A rate-limit response was observed; the queue handles the waiting.
    RateLimited { retry_after: f64 },
    /// Pending/history counts changed; re-read the queue snapshot.
    QueueChanged,
    ItemStarted { id: u64 },
    /// Terminal state of a queue item, in completion order.
    ItemFinished(QueueItem),
    /// A cache key was evicted (`zones` or `records:<domain>`).
    CacheInvalidated { key: String },
    /// A bulk operation finished, possibly partially.
    BulkCompleted(BulkSummary),
    /// Human-facing notification.
    Notify {
        level: NotifyLevel,
        title: String,
        message: String,
    },
}

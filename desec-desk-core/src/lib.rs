//! # desec-desk-core
//!
//! Non-UI core of the desec-desk DNS manager. Provides:
//! - the single-writer API queue with priority scheduling, rate-limit
//!   retry, and cooldown (`queue`)
//! - the three-layer per-profile cache (`cache`)
//! - the content-addressed zone version store (`versions`)
//! - profile, settings, and sealed-credential storage (`profiles`,
//!   `config`, `credentials`)
//! - the [`DeskCore`] façade tying it all together behind one event channel
//!
//! The crate is shell-agnostic: a desktop frontend drives it through
//! [`DeskCore`] and consumes [`CoreEvent`]s on its UI thread.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod facade;
pub mod profiles;
pub mod queue;
pub mod util;
pub mod versions;

// Re-export common types.
pub use error::{CoreError, CoreResult};
pub use events::{BulkFailure, BulkSummary, CoreEvent, NotifyLevel};
pub use facade::{DeskCore, DeskCoreBuilder, QueueHandle, TransportFactory};
pub use queue::{ApiQueue, ItemStatus, Priority, QueueConfig, QueueItem, QueueSnapshot};

// Re-export the wire layer so frontends depend on one crate.
pub use desec_desk_client as client;

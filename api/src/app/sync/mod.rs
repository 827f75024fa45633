//! Reconciliation controller: loops, retry queue, persisted state

pub mod controller;
pub mod retry;
pub mod state;

pub use controller::{SyncOptions, SyncService};
pub use retry::{backoff_delay, RetryItem, RetryQueue, DEFAULT_CAPACITY, MAX_ATTEMPTS};
pub use state::{StateStore, SyncState};

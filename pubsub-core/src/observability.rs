//! Structured-event names shared by tracing call sites.
//!
//! The crate emits `tracing` events and never installs a global subscriber;
//! binaries and tests own one-time `tracing_subscriber` initialization.

/// Event name constants recorded as the `event` field on tracing calls.
pub mod events {
    pub const ROOT_COLLECTION_LOADED: &str = "root_collection_loaded";
    pub const ROOT_COLLECTION_LOAD_FAILED: &str = "root_collection_load_failed";
    pub const PERSISTENCE_TASK_FAILED: &str = "persistence_task_failed";
    pub const PERSISTENCE_TASK_REJECTED: &str = "persistence_task_rejected";
    pub const SCHEDULER_THROTTLED: &str = "scheduler_throttled";
    pub const SCHEDULER_STOPPED: &str = "scheduler_stopped";
}

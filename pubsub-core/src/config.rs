//! Construction-time configuration.
//!
//! The core reads no configuration files; embedders deserialize or build
//! these structs themselves and pass them to the constructors.

use serde::{Deserialize, Serialize};

/// Root-collection population policy, fixed once at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootLoadingMode {
    /// Reads fail with the retryable not-yet-loaded condition until the
    /// asynchronous first load completes.
    Lazy,
    /// The first read for a service performs the load and blocks; concurrent
    /// readers share that one fetch.
    Eager,
}

/// Settings for [`crate::CachingNodeRepository`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub root_loading: RootLoadingMode,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root_loading: RootLoadingMode::Lazy,
        }
    }
}

/// Settings for [`crate::PersistenceExecutor`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Store-mutation rate ceiling in tasks per second. Must be at least 1.
    pub tasks_per_second: u32,
    /// Utilization percentage at which the drain rate starts scaling down.
    pub high_memory_threshold: f64,
    /// Utilization percentage at which draining stops entirely.
    pub critical_memory_threshold: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tasks_per_second: 250,
            high_memory_threshold: 90.0,
            critical_memory_threshold: 99.0,
        }
    }
}

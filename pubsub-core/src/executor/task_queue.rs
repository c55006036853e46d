//! Bounded multi-level queue feeding the persistence worker.

use crate::observability::events;
use crate::store::provider::StoreError;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Queued unit of persistence work.
pub type PersistenceTask = BoxFuture<'static, Result<(), StoreError>>;

/// Scheduling class for queued persistence work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    High,
    Normal,
    Low,
}

impl TaskPriority {
    /// Parses a textual priority name case-insensitively, falling back to
    /// `Normal` for anything unrecognized.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Total queued-task count beyond which producers are told to back off.
pub(crate) const OVERLOAD_THRESHOLD: usize = 10_000;

/// Hard storage cap; submissions beyond this are rejected outright.
pub(crate) const HARD_CAPACITY: usize = 1_000_000;

const CLASS_COUNT: usize = 3;

/// Three-class strict-priority queue, FIFO within each class.
///
/// Dequeue always prefers the highest non-empty class. Sustained high-priority
/// load can therefore starve `Low` indefinitely; no aging is applied. Known
/// limitation, kept intentionally.
pub(crate) struct TaskQueue {
    classes: Mutex<[VecDeque<PersistenceTask>; CLASS_COUNT]>,
    depth: AtomicUsize,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            classes: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            depth: AtomicUsize::new(0),
        }
    }

    /// Enqueues at the tail of the class's sub-queue. Returns `false` when
    /// the queue is at hard capacity and the task was dropped.
    pub(crate) fn push(&self, priority: TaskPriority, task: PersistenceTask) -> bool {
        if self.depth.load(Ordering::Relaxed) >= HARD_CAPACITY {
            warn!(
                event = events::PERSISTENCE_TASK_REJECTED,
                ?priority,
                capacity = HARD_CAPACITY,
                "task queue at hard capacity, dropping submission"
            );
            return false;
        }
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        classes[priority.index()].push_back(task);
        self.depth.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Removes the oldest task of the highest non-empty class.
    pub(crate) fn pop(&self) -> Option<PersistenceTask> {
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        for class in classes.iter_mut() {
            if let Some(task) = class.pop_front() {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                return Some(task);
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub(crate) fn is_overloaded(&self) -> bool {
        self.len() > OVERLOAD_THRESHOLD
    }
}

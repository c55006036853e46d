//! Single-worker rate-limited drain loop over the task queue.

use crate::config::ExecutorConfig;
use crate::executor::memory_pressure::{MemoryPressure, MemoryTelemetry};
use crate::executor::task_queue::{PersistenceTask, TaskPriority, TaskQueue};
use crate::observability::events;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, trace, warn};

const COMPONENT: &str = "persistence_scheduler";

/// Tick interval for a configured per-second limit: finer ticks for higher
/// limits so permission counts stay small per tick, coarser for lower ones.
pub(crate) fn tick_interval(tasks_per_second: u32) -> Duration {
    if tasks_per_second > 10_000 {
        Duration::from_millis(1)
    } else if tasks_per_second > 1_000 {
        Duration::from_millis(10)
    } else if tasks_per_second > 100 {
        Duration::from_millis(100)
    } else {
        Duration::from_millis(1_000)
    }
}

/// Full (unthrottled) permission count for one tick.
pub(crate) fn permits_per_tick(tasks_per_second: u32, tick: Duration) -> u32 {
    let ticks_per_second = (1_000 / tick.as_millis()) as u32;
    tasks_per_second / ticks_per_second
}

/// Handle to the bounded priority queue and its single dedicated worker.
///
/// `submit` is fire-and-forget: it never blocks and the caller gets no
/// completion signal. Backpressure is observed through [`is_overloaded`],
/// never through errors.
///
/// [`is_overloaded`]: PersistenceExecutor::is_overloaded
pub struct PersistenceExecutor {
    queue: Arc<TaskQueue>,
    shutdown: watch::Sender<bool>,
}

impl PersistenceExecutor {
    /// Spawns the worker immediately on the current tokio runtime.
    pub fn new(config: ExecutorConfig, telemetry: Arc<dyn MemoryTelemetry>) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(drain_loop(queue.clone(), config, telemetry, shutdown_rx));
        Self { queue, shutdown }
    }

    /// Enqueues persistence work. Returns `false` when the queue is at hard
    /// capacity and the task was rejected.
    pub fn submit(&self, priority: TaskPriority, task: PersistenceTask) -> bool {
        self.queue.push(priority, task)
    }

    /// True once queued depth exceeds the overload ceiling; producers should
    /// stop submitting until the queue drains back below it.
    pub fn is_overloaded(&self) -> bool {
        self.queue.is_overloaded()
    }

    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Stops the worker and wakes it if it is sleeping out a tick. In-flight
    /// work finishes; queued-but-not-started tasks are abandoned.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for PersistenceExecutor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn drain_loop(
    queue: Arc<TaskQueue>,
    config: ExecutorConfig,
    telemetry: Arc<dyn MemoryTelemetry>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let tick = tick_interval(config.tasks_per_second);
    let full_permits = permits_per_tick(config.tasks_per_second, tick);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let tick_started = Instant::now();
        let pressure = MemoryPressure::classify(
            telemetry.utilization_percent(),
            config.high_memory_threshold,
            config.critical_memory_threshold,
        );
        let permits = pressure.scale_permits(full_permits);
        if permits < full_permits {
            debug!(
                event = events::SCHEDULER_THROTTLED,
                component = COMPONENT,
                ?pressure,
                permits,
                full_permits,
                "scaling drain rate for memory pressure"
            );
        }

        let mut executed = 0u32;
        while executed < permits {
            let Some(task) = queue.pop() else { break };
            if let Err(err) = task.await {
                warn!(
                    event = events::PERSISTENCE_TASK_FAILED,
                    component = COMPONENT,
                    err = %err,
                    "queued persistence task failed"
                );
            }
            executed += 1;
        }
        if executed > 0 {
            trace!(component = COMPONENT, executed, remaining = queue.len(), "tick drained");
        }

        // Sleep out the remainder of the tick so the target rate holds even
        // when task execution itself ate part of the interval.
        let idle = tick.saturating_sub(tick_started.elapsed());
        tokio::select! {
            _ = time::sleep(idle) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    debug!(
        event = events::SCHEDULER_STOPPED,
        component = COMPONENT,
        abandoned = queue.len(),
        "persistence worker stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::{permits_per_tick, tick_interval, PersistenceExecutor};
    use crate::config::ExecutorConfig;
    use crate::executor::memory_pressure::MemoryTelemetry;
    use crate::executor::task_queue::{PersistenceTask, TaskPriority};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    struct FixedTelemetry(f64);

    impl MemoryTelemetry for FixedTelemetry {
        fn utilization_percent(&self) -> f64 {
            self.0
        }
    }

    fn config(tasks_per_second: u32) -> ExecutorConfig {
        ExecutorConfig {
            tasks_per_second,
            ..ExecutorConfig::default()
        }
    }

    fn counting_task(counter: Arc<AtomicUsize>) -> PersistenceTask {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn tick_table_matches_the_limit_bands() {
        assert_eq!(tick_interval(20_000), Duration::from_millis(1));
        assert_eq!(tick_interval(5_000), Duration::from_millis(10));
        assert_eq!(tick_interval(500), Duration::from_millis(100));
        assert_eq!(tick_interval(100), Duration::from_millis(1_000));
        assert_eq!(tick_interval(5), Duration::from_millis(1_000));
    }

    #[test]
    fn per_tick_permits_divide_the_limit_across_ticks() {
        assert_eq!(permits_per_tick(500, tick_interval(500)), 50);
        assert_eq!(permits_per_tick(5, tick_interval(5)), 5);
        assert_eq!(permits_per_tick(20_000, tick_interval(20_000)), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_ceiling_holds_under_a_flooded_queue() {
        let executor =
            PersistenceExecutor::new(config(500), Arc::new(FixedTelemetry(10.0)));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5_000 {
            executor.submit(TaskPriority::Normal, counting_task(counter.clone()));
        }

        tokio::time::sleep(Duration::from_millis(950)).await;

        let executed = counter.load(Ordering::SeqCst);
        assert!(
            (450..=550).contains(&executed),
            "expected roughly 500 executions in one second, got {executed}"
        );
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn very_high_memory_pressure_cuts_permits_to_a_third() {
        // 30/s -> 1s ticks with 30 permits; very-high scales to ceil(10).
        let executor = PersistenceExecutor::new(config(30), Arc::new(FixedTelemetry(98.0)));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..30 {
            executor.submit(TaskPriority::Normal, counting_task(counter.clone()));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn critical_memory_pressure_stalls_the_queue_silently() {
        let executor = PersistenceExecutor::new(config(500), Arc::new(FixedTelemetry(99.5)));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            executor.submit(TaskPriority::Normal, counting_task(counter.clone()));
        }

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(executor.queued_tasks(), 100);
        assert!(!executor.is_overloaded());
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn higher_classes_drain_before_lower_ones() {
        // 1/s -> one permit per 1s tick, so execution order is observable.
        let executor = PersistenceExecutor::new(config(1), Arc::new(FixedTelemetry(10.0)));
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        for (priority, tag) in [
            (TaskPriority::Low, "low"),
            (TaskPriority::Normal, "normal"),
            (TaskPriority::High, "high"),
        ] {
            let log = log.clone();
            executor.submit(
                priority,
                Box::pin(async move {
                    log.lock().expect("lock execution log").push(tag);
                    Ok(())
                }),
            );
        }

        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let executed = log.lock().expect("lock execution log").clone();
        assert_eq!(executed, vec!["high", "normal", "low"]);
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tasks_do_not_stop_the_worker() {
        let executor = PersistenceExecutor::new(config(500), Arc::new(FixedTelemetry(10.0)));
        let counter = Arc::new(AtomicUsize::new(0));

        executor.submit(
            TaskPriority::Normal,
            Box::pin(async {
                Err(crate::store::provider::StoreError::Backend(
                    "injected failure".to_string(),
                ))
            }),
        );
        executor.submit(TaskPriority::Normal, counting_task(counter.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_queued_tasks() {
        let executor = PersistenceExecutor::new(config(1), Arc::new(FixedTelemetry(10.0)));
        let counter = Arc::new(AtomicUsize::new(0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.shutdown();

        for _ in 0..10 {
            executor.submit(TaskPriority::Normal, counting_task(counter.clone()));
        }

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(executor.queued_tasks(), 10);
    }
}

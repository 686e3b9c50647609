//! Periodic background tasks.
//!
//! Every timer of a service is a [`PeriodicTask`] inside that service's
//! [`TaskGroup`]. A tick runs to completion before the next tick of the
//! same timer can start; ticks of different timers interleave freely.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// A set of timers stopped together.
pub struct TaskGroup {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Spawns a timer calling `tick` every `period`, first after one period.
    ///
    /// # Arguments
    /// * `name` - Used in logs only
    /// * `period` - Time between the starts of two ticks
    /// * `tick` - Produces the future run on each tick
    pub fn spawn<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!("Timer {} stopped", name);
        });
        self.tasks.push(handle);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancels all timers.
    ///
    /// No tick starts after this is called. A tick already running is
    /// allowed to finish; this waits for it.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_after_each_period() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut group = TaskGroup::new();
        let c = counter.clone();
        group.spawn("count", Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        group.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut group = TaskGroup::new();
        let c = counter.clone();
        group.spawn("count", Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        group.stop().await;
        let seen = counter.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_running_tick_finish() {
        let finished = Arc::new(AtomicU32::new(0));
        let mut group = TaskGroup::new();
        let f = finished.clone();
        group.spawn("slow", Duration::from_secs(1), move || {
            let f = f.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        // first tick is in flight
        tokio::time::sleep(Duration::from_secs(2)).await;
        group.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_of_one_timer_never_overlap() {
        let running = Arc::new(AtomicU32::new(0));
        let overlapped = Arc::new(AtomicU32::new(0));
        let mut group = TaskGroup::new();
        let (r, o) = (running.clone(), overlapped.clone());
        group.spawn("long", Duration::from_secs(1), move || {
            let (r, o) = (r.clone(), o.clone());
            async move {
                if r.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_secs(3)).await;
                r.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(20)).await;
        group.stop().await;
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }
}

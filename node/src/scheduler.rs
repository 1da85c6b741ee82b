//! Named periodic jobs.
//!
//! Jobs run on fixed intervals until deregistered or the scheduler shuts
//! down. A job body that panics is logged and its job silently
//! unregistered; the rest of the node keeps running.

use super::*;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, CancellationToken>>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a job. A job already registered under `name` is replaced.
    pub fn register<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        interval: std::time::Duration,
        mut job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        if let Some(old) = self
            .jobs
            .lock()
            .unwrap()
            .insert(name.to_string(), cancel.clone())
        {
            old.cancel();
        }

        let name = name.to_string();
        let scheduler = self.clone();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick of a fresh interval
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
                            error!("periodic job {name} panicked, unregistering");
                            scheduler.jobs.lock().unwrap().remove(&name);
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Cancels a job. Safe to call for names that were never registered or
    /// have already been removed.
    pub fn deregister(&self, name: &str) {
        if let Some(cancel) = self.jobs.lock().unwrap().remove(name) {
            cancel.cancel();
            debug!("Deregistered periodic job {name}");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(name)
    }

    /// Cancels every job and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        for (_, cancel) in self.jobs.lock().unwrap().drain() {
            cancel.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn jobs_tick_and_deregister() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));

        let c = count.clone();
        scheduler.register("tick", std::time::Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(3500)).await;
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 3, "job ran {seen} times");

        scheduler.deregister("tick");
        assert!(!scheduler.is_registered("tick"));
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        // No further runs after deregistration (allow one in-flight tick)
        assert!(count.load(Ordering::SeqCst) <= seen + 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_is_unregistered() {
        let scheduler = Scheduler::new();
        scheduler.register("bad", std::time::Duration::from_secs(1), || async {
            panic!("job exploded");
        });

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!scheduler.is_registered("bad"));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_cancels_previous() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let c = first.clone();
        scheduler.register("job", std::time::Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        let c = second.clone();
        scheduler.register("job", std::time::Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(second.load(Ordering::SeqCst) >= 2);
        scheduler.shutdown().await;
    }
}

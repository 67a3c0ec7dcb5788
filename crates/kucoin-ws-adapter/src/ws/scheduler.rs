/*
[INPUT]:  A period and an async job
[OUTPUT]: A recurring background task with start / stop / reset
[POS]:    WebSocket layer - timer ownership for heartbeat and health sweep
[UPDATE]: When timer semantics (first tick, missed ticks) change
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, Instant};
use tracing::trace;

type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Running {
    period: Duration,
    job: Job,
    handle: JoinHandle<()>,
}

/// Owns at most one recurring task. Starting again replaces the previous
/// task, and dropping the scheduler stops it.
pub struct Scheduler {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    /// Run `job` every `period`, first run one period from now.
    pub fn start<F>(&self, period: Duration, job: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.start_job(period, Arc::new(job));
    }

    /// Returns whether a task was running.
    pub fn stop(&self) -> bool {
        let previous = self.lock().take();
        match previous {
            Some(running) => {
                running.handle.abort();
                trace!(scheduler = self.name, "scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Restart the period from now with the same job. No-op when stopped.
    pub fn reset(&self) -> bool {
        let current = self
            .lock()
            .as_ref()
            .map(|running| (running.period, running.job.clone()));
        match current {
            Some((period, job)) => {
                self.start_job(period, job);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    fn start_job(&self, period: Duration, job: Job) {
        let task_job = job.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(scheduler = name, "scheduler tick");
                task_job().await;
            }
        });

        let previous = self.lock().replace(Running {
            period,
            job,
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.lock().take() {
            running.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync {
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_every_period() {
        let scheduler = Scheduler::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        scheduler.start(Duration::from_secs(1), counting_job(hits.clone()));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_and_reports_once() {
        let scheduler = Scheduler::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        scheduler.start(Duration::from_secs(1), counting_job(hits.clone()));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(scheduler.stop());
        assert!(!scheduler.stop());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_the_period() {
        let scheduler = Scheduler::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        scheduler.start(Duration::from_secs(2), counting_job(hits.clone()));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(scheduler.reset());
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_without_start_is_noop() {
        let scheduler = Scheduler::new("idle");
        assert!(!scheduler.reset());
        assert!(!scheduler.is_running());
    }
}

//! Shared polling loop used by every background worker.
//!
//! A worker implements [`PollTask`]; [`spawn_poller`] drives it until the
//! shutdown flag is set. The store is the only coordination medium, so a
//! task re-reads everything it needs on each cycle.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Error, WorkflowError};

/// Sleep intervals between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Pause after a cycle that did work.
    pub busy_interval: Duration,
    /// Pause after a cycle that found nothing.
    pub idle_backoff: Duration,
    /// Cooldown after a failed cycle.
    pub error_backoff: Duration,
}

impl PollSettings {
    pub const fn secs(busy: u64, idle: u64, error: u64) -> Self {
        Self {
            busy_interval: Duration::from_secs(busy),
            idle_backoff: Duration::from_secs(idle),
            error_backoff: Duration::from_secs(error),
        }
    }

    pub const CRAWL: Self = Self::secs(5, 30, 30);
    pub const OUTREACH: Self = Self::secs(5, 5, 120);
    pub const REPLIES: Self = Self::secs(5, 5, 120);
    pub const DRAFTS: Self = Self::secs(5, 5, 30);
    pub const COURT: Self = Self::secs(5, 30, 30);

    fn delay_after(&self, result: &Result<CycleOutcome, Error>) -> Duration {
        match result {
            Ok(CycleOutcome::Worked(_)) => self.busy_interval,
            Ok(CycleOutcome::Idle) => self.idle_backoff,
            Err(_) => self.error_backoff,
        }
    }
}

/// What a single cycle accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Number of items handled.
    Worked(usize),
    Idle,
}

impl CycleOutcome {
    pub fn from_count(count: usize) -> Self {
        if count == 0 { Self::Idle } else { Self::Worked(count) }
    }
}

/// One unit of periodic work.
#[async_trait]
pub trait PollTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_cycle(&self) -> Result<CycleOutcome, Error>;
}

/// The instant `age` before now. Rows last touched before it are stale.
pub fn cutoff(age: Duration) -> chrono::DateTime<chrono::Utc> {
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    chrono::Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

/// Run one cycle, turning a panic into a failed cycle.
async fn run_guarded(task: &dyn PollTask) -> Result<CycleOutcome, Error> {
    match AssertUnwindSafe(task.run_cycle()).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(WorkflowError::Panicked {
                worker: task.name(),
                message,
            }
            .into())
        }
    }
}

/// Spawn a background loop for `task`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling;
/// the loop exits before its next cycle.
pub fn spawn_poller(
    task: Arc<dyn PollTask>,
    settings: PollSettings,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            worker = task.name(),
            busy_secs = settings.busy_interval.as_secs(),
            idle_secs = settings.idle_backoff.as_secs(),
            "Poller started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(worker = task.name(), "Poller shutting down");
                return;
            }

            let result = run_guarded(task.as_ref()).await;
            match &result {
                Ok(CycleOutcome::Worked(count)) => {
                    debug!(worker = task.name(), count, "Cycle complete")
                }
                Ok(CycleOutcome::Idle) => debug!(worker = task.name(), "Nothing to do"),
                Err(e) => error!(worker = task.name(), error = %e, "Poll cycle failed"),
            }

            tokio::time::sleep(settings.delay_after(&result)).await;
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::error::{CrawlError, Error};

    /// Fails on odd cycles, panics on the third.
    struct Flaky {
        cycles: AtomicUsize,
    }

    #[async_trait]
    impl PollTask for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run_cycle(&self) -> Result<CycleOutcome, Error> {
            let n = self.cycles.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                panic!("boom");
            }
            if n % 2 == 1 {
                return Err(CrawlError::Search("down".into()).into());
            }
            Ok(CycleOutcome::Worked(1))
        }
    }

    #[test]
    fn delays_follow_outcome() {
        let settings = PollSettings::secs(1, 2, 3);
        assert_eq!(settings.delay_after(&Ok(CycleOutcome::Worked(4))), Duration::from_secs(1));
        assert_eq!(settings.delay_after(&Ok(CycleOutcome::Idle)), Duration::from_secs(2));
        let err: Result<CycleOutcome, Error> = Err(CrawlError::Search("x".into()).into());
        assert_eq!(settings.delay_after(&err), Duration::from_secs(3));
    }

    #[test]
    fn outcome_from_count() {
        assert_eq!(CycleOutcome::from_count(0), CycleOutcome::Idle);
        assert_eq!(CycleOutcome::from_count(3), CycleOutcome::Worked(3));
    }

    #[tokio::test]
    async fn panicking_cycle_counts_as_a_failure() {
        let task = Flaky {
            cycles: AtomicUsize::new(2),
        };
        let result = run_guarded(&task).await;
        assert!(matches!(
            &result,
            Err(Error::Workflow(WorkflowError::Panicked { worker: "flaky", message })) if message == "boom"
        ));

        let settings = PollSettings::secs(1, 2, 3);
        assert_eq!(settings.delay_after(&result), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_the_loop() {
        let task = Arc::new(Flaky {
            cycles: AtomicUsize::new(0),
        });
        let settings = PollSettings {
            busy_interval: Duration::from_millis(1),
            idle_backoff: Duration::from_millis(1),
            error_backoff: Duration::from_millis(1),
        };
        let (handle, shutdown) = spawn_poller(task.clone(), settings);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while task.cycles.load(Ordering::SeqCst) < 6 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();

        assert!(task.cycles.load(Ordering::SeqCst) >= 6);
    }
}

//! Periodic background tasks

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::task::AbortHandle;

/// Work run on a fixed period
///
/// Each tick is spawned on its own, so a slow tick never delays the next
/// one. Implementations guard themselves against overlapping runs.
#[async_trait]
pub trait Periodic: Send + Sync + 'static {
    /// A name for the work, used in logs
    fn name(&self) -> &'static str;

    /// Runs the work once
    async fn tick(&self);
}

/// A handle to a running periodic task
///
/// Dropping the handle leaves the task running.
#[derive(Debug)]
pub struct PeriodicHandle {
    name: &'static str,
    period: Duration,
    abort: AbortHandle,
}

impl PeriodicHandle {
    /// The name of the work being run
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The time between ticks
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops further ticks from being started
    ///
    /// A tick already in flight runs to completion.
    pub fn stop(&self) {
        self.abort.abort();
    }

    /// Whether the task has stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Starts running `work` every `period`
///
/// The first tick fires one period from now.
pub fn spawn_periodic<P: Periodic>(work: Arc<P>, period: Duration) -> PeriodicHandle {
    let name = work.name();

    let join = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut timer = tokio::time::interval_at(start, period);

        loop {
            timer.tick().await;
            tracing::trace!(task = name, "tick");
            let work = work.clone();
            tokio::spawn(async move { work.tick().await });
        }
    });
    let abort = join.abort_handle();

    tokio::spawn(async move {
        if let Err(err) = join.await {
            if err.is_panic() {
                tracing::error!(task = name, "periodic task panicked!")
            } else if err.is_cancelled() {
                tracing::info!(task = name, "periodic task was stopped")
            }
        }
    });

    tracing::debug!(task = name, period = ?period, "periodic task started");

    PeriodicHandle {
        name,
        period,
        abort,
    }
}

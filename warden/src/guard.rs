//! Single-flight guards for periodic work

use std::sync::atomic::{AtomicBool, Ordering};

/// Ensures at most one run of an operation is active at a time
///
/// A run that finds the guard held does not wait; it is simply skipped.
#[derive(Debug, Default)]
pub struct SingleFlight {
    active: AtomicBool,
}

impl SingleFlight {
    /// Constructs a released guard
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// Takes the guard, unless a run already holds it
    ///
    /// The guard is released when the returned value is dropped, however
    /// the run ends.
    #[must_use]
    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                active: &self.active,
            })
    }

    /// Whether a run currently holds the guard
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof that the holder is the only active run
#[derive(Debug)]
pub struct FlightGuard<'a> {
    active: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// The result of a guarded tick
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum TickOutcome<T> {
    /// The tick ran to completion
    Completed(T),
    /// Another run held the guard, so nothing was done
    AlreadyRunning,
}

impl<T> TickOutcome<T> {
    /// The result of the run, if the tick ran
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::AlreadyRunning => None,
        }
    }

    /// Whether the tick was skipped
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::AlreadyRunning)
    }
}

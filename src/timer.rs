//! Deadline Timer
//!
//! A small steady-clock helper used to carve one caller-supplied timeout
//! into the successive channel operations of a request/response exchange.

use std::time::{Duration, Instant};

/// Tracks elapsed time against a fixed budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start counting against `budget` now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Time spent since the deadline was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the budget is exhausted.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Remaining budget; zero once exhausted.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }
}

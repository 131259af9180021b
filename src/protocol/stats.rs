//! Connection Statistics
//!
//! Counters and bounded per-category error logs accumulated by the
//! protocol engine and the device interface. A single [`StatsRecorder`]
//! instance is shared by both layers; callers snapshot it for diagnostics.

use crate::constants::MAX_LOGGED_ERRORS;
use crate::result::Error;

use std::collections::VecDeque;
use std::sync::Mutex;

// =============================================================================
// Error Log
// =============================================================================

/// Bounded log of the most recent errors in one category.
///
/// Keeps the last [`MAX_LOGGED_ERRORS`] entries together with the ordinal
/// of the first retained entry, so a reader can tell how many were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    results: VecDeque<Error>,
    first_ordinal: usize,
}

impl ErrorLog {
    /// Retained errors, oldest first.
    #[must_use]
    pub fn results(&self) -> &VecDeque<Error> {
        &self.results
    }

    /// Ordinal of the oldest retained entry (0 until the log overflows).
    #[must_use]
    pub fn first_ordinal(&self) -> usize {
        self.first_ordinal
    }

    /// Total number of errors ever recorded into this log.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.first_ordinal + self.results.len()
    }

    fn push(&mut self, error: Error) {
        self.results.push_back(error);
        if self.results.len() > MAX_LOGGED_ERRORS {
            self.results.pop_front();
            self.first_ordinal += 1;
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of the accumulated connection statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Requests issued by the engine (reads, writes and burst frames).
    pub operations_count: usize,
    /// Flash burst envelopes opened by the device interface.
    pub flash_burst_writes_count: usize,
    /// Channel read failures.
    pub read_errors: ErrorLog,
    /// Channel write failures.
    pub write_errors: ErrorLog,
    /// Structurally or semantically invalid responses.
    pub response_errors: ErrorLog,
}

/// Shared, mutex-guarded statistics accumulator.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: Mutex<Stats>,
}

impl StatsRecorder {
    /// Fresh recorder with zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one issued request.
    pub fn increment_operations_count(&self) {
        self.stats.lock().expect("stats poisoned").operations_count += 1;
    }

    /// Count one opened flash burst envelope.
    pub fn increment_flash_burst_writes_count(&self) {
        self.stats.lock().expect("stats poisoned").flash_burst_writes_count += 1;
    }

    /// Record a channel read failure.
    pub fn add_read_error(&self, error: &Error) {
        self.stats.lock().expect("stats poisoned").read_errors.push(error.clone());
    }

    /// Record a channel write failure.
    pub fn add_write_error(&self, error: &Error) {
        self.stats.lock().expect("stats poisoned").write_errors.push(error.clone());
    }

    /// Record an invalid response.
    pub fn add_response_error(&self, error: &Error) {
        self.stats.lock().expect("stats poisoned").response_errors.push(error.clone());
    }

    /// Reset everything to zero.
    pub fn reset(&self) {
        *self.stats.lock().expect("stats poisoned") = Stats::default();
    }

    /// Copy of the current statistics.
    #[must_use]
    pub fn snapshot(&self) -> Stats {
        self.stats.lock().expect("stats poisoned").clone()
    }
}

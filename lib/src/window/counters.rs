use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::outcome::{ErrorCategory, JobNumber, JobOutcome, JobStatus};

/// Per-window (or per-run) tallies. Safe to update from several threads.
#[derive(Debug, Default)]
pub struct CounterSet {
    successes: AtomicU64,
    failures: AtomicU64,
    error_messages: AtomicU64,
    categories: [AtomicU64; ErrorCategory::COUNT],
    failed_jobs: Mutex<Vec<JobNumber>>,
}

/// A point-in-time copy of a [`CounterSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub error_messages: u64,
    pub categories: [u64; ErrorCategory::COUNT],
    pub failed_jobs: Vec<JobNumber>,
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one job. A free-text failure increments the failure count once,
    /// and the message count once per message. It is also counted as
    /// [`ErrorCategory::Unclassified`] so categorized totals still add up.
    pub fn record(&self, outcome: &JobOutcome) {
        match &outcome.status {
            JobStatus::Succeeded => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                return;
            }
            JobStatus::Failed(category) => {
                self.categories[category.index()].fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Errored(messages) => {
                self.categories[ErrorCategory::Unclassified.index()]
                    .fetch_add(1, Ordering::Relaxed);
                self.error_messages
                    .fetch_add(messages.len() as u64, Ordering::Relaxed);
            }
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut failed_jobs) = self.failed_jobs.lock() {
            failed_jobs.push(outcome.job);
        }
    }

    pub fn jobs(&self) -> u64 {
        self.successes.load(Ordering::Relaxed) + self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let mut categories = [0; ErrorCategory::COUNT];
        for (slot, counter) in categories.iter_mut().zip(self.categories.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }

        let mut failed_jobs = self
            .failed_jobs
            .lock()
            .map(|jobs| jobs.clone())
            .unwrap_or_default();
        failed_jobs.sort_unstable();

        CounterSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            error_messages: self.error_messages.load(Ordering::Relaxed),
            categories,
            failed_jobs,
        }
    }

    /// Read and zero every counter.
    pub fn take(&self) -> CounterSnapshot {
        let snapshot = self.snapshot();
        self.reset();
        snapshot
    }

    pub fn reset(&self) {
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.error_messages.store(0, Ordering::Relaxed);
        for counter in &self.categories {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut failed_jobs) = self.failed_jobs.lock() {
            failed_jobs.clear();
        }
    }
}

impl CounterSnapshot {
    pub fn jobs(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn category(&self, category: ErrorCategory) -> u64 {
        self.categories[category.index()]
    }

    pub fn categorized_failures(&self) -> u64 {
        self.categories.iter().sum()
    }

    /// Failed job numbers, comma separated, in increasing order.
    pub fn failed_job_ids(&self) -> String {
        self.failed_jobs
            .iter()
            .map(|job| job.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn merge(&mut self, other: &CounterSnapshot) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.error_messages += other.error_messages;
        for (total, value) in self.categories.iter_mut().zip(other.categories.iter()) {
            *total += value;
        }
        self.failed_jobs.extend_from_slice(&other.failed_jobs);
    }
}

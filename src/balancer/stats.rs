//! Load balancer statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Load balancer statistics.
#[derive(Debug, Default)]
pub struct LoadBalancerStats {
    /// Total selections made.
    pub total_selections: AtomicU64,
    /// Successful selections.
    pub successful_selections: AtomicU64,
    /// Failed selections (no endpoint available).
    pub failed_selections: AtomicU64,
    /// Selections served from the affinity store.
    pub sticky_selections: AtomicU64,
    /// Responses delivered to callers.
    pub completed: AtomicU64,
    /// Requests expired by the timeout sweeper.
    pub timeouts: AtomicU64,
    /// Requests whose endpoint could not be reached.
    pub connect_failures: AtomicU64,
    /// Completions that arrived after their request was already finished.
    pub late_completions: AtomicU64,
    /// Healthy to unhealthy transitions.
    pub demotions: AtomicU64,
    /// Unhealthy to healthy transitions.
    pub promotions: AtomicU64,
}

impl LoadBalancerStats {
    /// Record a selection outcome.
    pub fn record_selection(&self, success: bool) {
        self.total_selections.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_selections.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_selections.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a selection served by affinity.
    pub fn record_sticky(&self) {
        self.sticky_selections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivered response.
    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timeout.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connect failure.
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discarded late completion.
    pub fn record_late(&self) {
        self.late_completions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a demotion.
    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a promotion.
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_selections: self.total_selections.load(Ordering::Relaxed),
            successful_selections: self.successful_selections.load(Ordering::Relaxed),
            failed_selections: self.failed_selections.load(Ordering::Relaxed),
            sticky_selections: self.sticky_selections.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            late_completions: self.late_completions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`LoadBalancerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_selections: u64,
    pub successful_selections: u64,
    pub failed_selections: u64,
    pub sticky_selections: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub connect_failures: u64,
    pub late_completions: u64,
    pub demotions: u64,
    pub promotions: u64,
}

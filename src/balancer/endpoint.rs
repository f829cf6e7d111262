//! Backend endpoints and their health records.

use super::config::EndpointConfig;
use super::ring::{RingHasher, Sha1Hasher};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics for a single endpoint.
#[derive(Debug, Default)]
pub struct EndpointStats {
    /// Requests dispatched to this endpoint.
    pub dispatched: AtomicU64,
    /// Requests that completed with a response.
    pub completed: AtomicU64,
    /// Requests that timed out.
    pub timeouts: AtomicU64,
    /// Requests that failed to connect.
    pub connect_failures: AtomicU64,
}

impl EndpointStats {
    /// Create new stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch.
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed response.
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

    /// Requests dispatched and not yet completed, timed out or failed.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        let settled = self.completed.load(Ordering::Relaxed)
            + self.timeouts.load(Ordering::Relaxed)
            + self.connect_failures.load(Ordering::Relaxed);
        self.dispatched.load(Ordering::Relaxed).saturating_sub(settled)
    }
}

/// Mutable health and load state of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    /// Whether the endpoint is in the healthy pool.
    pub healthy: bool,
    /// Consecutive failures observed while healthy.
    pub unhealthy_retry_count: u32,
    /// Consecutive recovery probe successes observed while demoted.
    pub healthy_retry_count: u32,
    /// When a probe or request outcome was last recorded.
    pub last_health_checked_at: Option<Instant>,
    /// Running average response time.
    pub avg_response_time: Duration,
    /// Samples folded into `avg_response_time`.
    pub response_samples: u64,
    /// Selections in the current least-response-time window.
    pub current_requests_in_window: u32,
    /// Selections allowed in the current least-response-time window.
    pub max_requests_in_window: u32,
    /// Last computed least-response-time share.
    pub percentage_share: i64,
    /// Selections in the current weighted round-robin window.
    pub current_weight: u32,
    /// Configured weight.
    pub max_weight: u32,
}

impl HealthRecord {
    /// Fresh record for an endpoint with the given weight.
    #[must_use]
    pub fn new(weight: u32) -> Self {
        Self {
            healthy: true,
            unhealthy_retry_count: 0,
            healthy_retry_count: 0,
            last_health_checked_at: None,
            avg_response_time: Duration::ZERO,
            response_samples: 0,
            current_requests_in_window: 0,
            max_requests_in_window: u32::MAX,
            percentage_share: 100,
            current_weight: 0,
            max_weight: weight.max(1),
        }
    }

    /// Restore every counter to its default, keeping the health flag and weight.
    pub fn reset_counters(&mut self) {
        let healthy = self.healthy;
        *self = Self {
            healthy,
            last_health_checked_at: self.last_health_checked_at,
            ..Self::new(self.max_weight)
        };
    }

    /// Fold a response time sample into the running average.
    pub fn record_response_time(&mut self, sample: Duration) {
        let samples = u32::try_from(self.response_samples).unwrap_or(u32::MAX);
        let total = self.avg_response_time.saturating_mul(samples) + sample;
        self.response_samples += 1;
        self.avg_response_time = total / samples.saturating_add(1);
    }
}

/// A single backend endpoint.
///
/// Identity fields are immutable. The health record is guarded by its own lock so
/// different endpoints can be updated concurrently. A separate transition lock
/// serializes healthy/unhealthy transitions of this endpoint without being held
/// by the selection path.
#[derive(Debug)]
pub struct Endpoint {
    /// `host:port`.
    name: String,
    /// Host part.
    host: String,
    /// Port part.
    port: u16,
    /// Target URI.
    uri: String,
    /// Configured weight.
    weight: u32,
    /// Opaque affinity marker written into cookies.
    marker: String,
    /// Health state.
    record: Mutex<HealthRecord>,
    /// Held for the duration of a healthy/unhealthy transition.
    transition: Mutex<()>,
    /// Statistics.
    stats: EndpointStats,
}

impl Endpoint {
    /// Create a new endpoint from configuration.
    #[must_use]
    pub fn new(config: &EndpointConfig) -> Self {
        let name = config.name();
        let marker = format!("{:016x}", Sha1Hasher.hash(name.as_bytes()));

        Self {
            host: config.host.clone(),
            port: config.port,
            uri: config.target_uri(),
            weight: config.weight.max(1),
            marker,
            record: Mutex::new(HealthRecord::new(config.weight)),
            transition: Mutex::new(()),
            stats: EndpointStats::new(),
            name,
        }
    }

    /// Endpoint identity, `host:port`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host part of the identity.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part of the identity.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Target URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Configured weight.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Affinity marker for cookies.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Lock and return the health record.
    pub fn record(&self) -> MutexGuard<'_, HealthRecord> {
        self.record.lock()
    }

    /// Copy of the current health record.
    #[must_use]
    pub fn snapshot(&self) -> HealthRecord {
        self.record.lock().clone()
    }

    /// Whether the endpoint is currently in the healthy pool.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.record.lock().healthy
    }

    /// Endpoint statistics.
    #[must_use]
    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    pub(crate) fn transition_lock(&self) -> MutexGuard<'_, ()> {
        self.transition.lock()
    }

    /// Count a failure against a healthy endpoint.
    ///
    /// Returns `true` when the consecutive failure count has reached `threshold`
    /// and the endpoint should be demoted.
    pub fn record_failure(&self, threshold: u32) -> bool {
        let mut record = self.record.lock();
        record.last_health_checked_at = Some(Instant::now());
        if !record.healthy {
            return false;
        }
        record.unhealthy_retry_count += 1;
        record.unhealthy_retry_count >= threshold
    }

    /// Clear the consecutive failure count after a success.
    pub fn record_success(&self) {
        let mut record = self.record.lock();
        record.last_health_checked_at = Some(Instant::now());
        record.unhealthy_retry_count = 0;
    }

    /// Record a recovery probe outcome for a demoted endpoint.
    ///
    /// Returns `true` when the consecutive success count has reached `threshold`
    /// and the endpoint should be promoted.
    pub fn record_recovery_probe(&self, success: bool, threshold: u32) -> bool {
        let mut record = self.record.lock();
        record.last_health_checked_at = Some(Instant::now());
        if record.healthy {
            return false;
        }
        if success {
            record.healthy_retry_count += 1;
            record.healthy_retry_count >= threshold
        } else {
            record.healthy_retry_count = 0;
            false
        }
    }

    /// Fold a response time sample into the running average.
    pub fn record_response_time(&self, sample: Duration) {
        self.record.lock().record_response_time(sample);
    }

    /// Flip to unhealthy and reset counters. Returns `false` if already unhealthy.
    pub(crate) fn mark_unhealthy(&self) -> bool {
        let mut record = self.record.lock();
        if !record.healthy {
            return false;
        }
        record.healthy = false;
        record.reset_counters();
        true
    }

    /// Flip to healthy and reset counters. Returns `false` if already healthy.
    pub(crate) fn mark_healthy(&self) -> bool {
        let mut record = self.record.lock();
        if record.healthy {
            return false;
        }
        record.healthy = true;
        record.reset_counters();
        true
    }
}

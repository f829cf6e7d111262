//! Windowed least-response-time selection.
//!
//! Requests are counted in windows of `W`. At each window boundary every
//! endpoint gets a budget derived from how its average response time compares
//! to the pool mean; within a window selection is round robin over endpoints
//! that still have budget. The first window has no budgets, so it is plain
//! round robin.

use super::{advance, EndpointSet, Strategy};
use crate::balancer::endpoint::{Endpoint, HealthRecord};
use crate::balancer::message::GatewayRequest;
use std::sync::Arc;
use tracing::{debug, trace};

/// Least-response-time load balancing strategy.
#[derive(Debug)]
pub struct LeastResponseTimeStrategy {
    endpoints: EndpointSet,
    index: usize,
    /// Requests per window.
    window: u32,
    /// Requests served in the current window.
    requests_in_window: u32,
}

impl LeastResponseTimeStrategy {
    /// Create a strategy with the given window size (clamped to at least 1).
    #[must_use]
    pub fn new(window: u32) -> Self {
        Self {
            endpoints: EndpointSet::default(),
            index: 0,
            window: window.max(1),
            requests_in_window: 0,
        }
    }

    /// Window size.
    #[must_use]
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Recompute per-endpoint budgets from the current response time averages.
    fn recompute(&mut self) {
        let averages: Vec<u128> = self
            .endpoints
            .as_slice()
            .iter()
            .map(|e| e.record().avg_response_time.as_millis())
            .collect();

        let mean = rounded_mean(&averages);
        for (endpoint, avg) in self.endpoints.as_slice().iter().zip(averages) {
            let share = percentage_share(avg, mean);
            let mut record = endpoint.record();
            record.percentage_share = share;
            record.max_requests_in_window = window_budget(share, self.window);
            record.current_requests_in_window = 0;
            trace!(
                endpoint = %endpoint.name(),
                avg_ms = %avg,
                share,
                budget = record.max_requests_in_window,
                "Window budget"
            );
        }

        debug!(mean_ms = %mean, endpoints = self.endpoints.len(), "Recomputed response time window");
        self.requests_in_window = 0;
    }

    fn scan(&mut self) -> Option<Arc<Endpoint>> {
        let len = self.endpoints.len();
        for step in 0..len {
            let index = (self.index + step) % len;
            let endpoint = &self.endpoints.as_slice()[index];
            let mut record = endpoint.record();
            if record.current_requests_in_window < record.max_requests_in_window {
                record.current_requests_in_window += 1;
                drop(record);
                self.index = advance(index, len);
                return Some(Arc::clone(endpoint));
            }
        }
        None
    }
}

impl Strategy for LeastResponseTimeStrategy {
    fn name(&self) -> &'static str {
        "least-response-time"
    }

    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>) {
        self.endpoints = EndpointSet::new(endpoints);
        self.index = 0;
        self.reset();
    }

    fn add(&mut self, endpoint: Arc<Endpoint>) {
        self.endpoints.insert(endpoint, self.name());
    }

    fn remove(&mut self, endpoint: &Endpoint) {
        self.endpoints.remove(endpoint.name(), self.name());
    }

    fn next(&mut self, _request: &GatewayRequest) -> Option<Arc<Endpoint>> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }

        if self.requests_in_window >= self.window {
            self.recompute();
        }
        self.requests_in_window += 1;

        if let Some(endpoint) = self.scan() {
            return Some(endpoint);
        }

        // Every budget is spent; fall back to the cursor.
        let index = self.index % len;
        self.index = advance(index, len);
        self.endpoints.as_slice().get(index).cloned()
    }

    /// Restart the window, returning every endpoint to warm-up.
    fn reset(&mut self) {
        if self.index >= self.endpoints.len() {
            self.index = 0;
        }
        self.requests_in_window = 0;

        let fresh = HealthRecord::new(1);
        for endpoint in self.endpoints.as_slice() {
            let mut record = endpoint.record();
            record.current_requests_in_window = 0;
            record.max_requests_in_window = fresh.max_requests_in_window;
            record.percentage_share = fresh.percentage_share;
        }
    }

    fn endpoints(&self) -> &[Arc<Endpoint>] {
        self.endpoints.as_slice()
    }
}

/// Mean of `values`, rounded half up. Zero for an empty slice.
fn rounded_mean(values: &[u128]) -> u128 {
    let n = values.len() as u128;
    if n == 0 {
        return 0;
    }
    let sum: u128 = values.iter().sum();
    (2 * sum + n) / (2 * n)
}

/// `100 - (avg / mean) * 100` with integer division. A zero mean yields 100.
fn percentage_share(avg: u128, mean: u128) -> i64 {
    if mean == 0 {
        return 100;
    }
    let ratio = i64::try_from(avg / mean).unwrap_or(i64::MAX / 100);
    100 - ratio * 100
}

/// Requests allowed in one window for a given share.
fn window_budget(share: i64, window: u32) -> u32 {
    if share <= 0 {
        return 1;
    }
    let budget = share * i64::from(window) / 100;
    u32::try_from(budget).unwrap_or(window)
}

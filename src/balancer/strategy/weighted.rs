//! Weighted round-robin selection.
//!
//! Each endpoint may be served `max_weight` times per window. Selection scans
//! from the cursor for the first endpoint with budget left; once every endpoint
//! has used its budget the window starts over.

use super::{advance, EndpointSet, Strategy};
use crate::balancer::endpoint::Endpoint;
use crate::balancer::message::GatewayRequest;
use std::sync::Arc;
use tracing::trace;

/// Weighted round-robin load balancing strategy.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinStrategy {
    endpoints: EndpointSet,
    index: usize,
}

impl WeightedRoundRobinStrategy {
    /// Create a new weighted round-robin strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of weights, the length of one full window.
    #[must_use]
    pub fn window(&self) -> u64 {
        self.endpoints
            .as_slice()
            .iter()
            .map(|e| u64::from(e.record().max_weight))
            .sum()
    }

    fn clear_weights(&self) {
        for endpoint in self.endpoints.as_slice() {
            endpoint.record().current_weight = 0;
        }
    }

    fn scan(&mut self) -> Option<Arc<Endpoint>> {
        let len = self.endpoints.len();
        for step in 0..len {
            let index = (self.index + step) % len;
            let endpoint = &self.endpoints.as_slice()[index];
            let mut record = endpoint.record();
            if record.current_weight < record.max_weight {
                record.current_weight += 1;
                drop(record);
                self.index = advance(index, len);
                return Some(Arc::clone(endpoint));
            }
        }
        None
    }
}

impl Strategy for WeightedRoundRobinStrategy {
    fn name(&self) -> &'static str {
        "weighted-round-robin"
    }

    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>) {
        self.endpoints = EndpointSet::new(endpoints);
        self.index = 0;
        self.clear_weights();
    }

    fn add(&mut self, endpoint: Arc<Endpoint>) {
        self.endpoints.insert(endpoint, self.name());
    }

    fn remove(&mut self, endpoint: &Endpoint) {
        self.endpoints.remove(endpoint.name(), self.name());
    }

    fn next(&mut self, _request: &GatewayRequest) -> Option<Arc<Endpoint>> {
        if self.endpoints.is_empty() {
            return None;
        }

        if let Some(endpoint) = self.scan() {
            return Some(endpoint);
        }

        trace!(window = self.window(), "Weighted window exhausted, starting over");
        self.clear_weights();
        self.scan()
    }

    fn reset(&mut self) {
        if self.index >= self.endpoints.len() {
            self.index = 0;
        }
        self.clear_weights();
    }

    fn endpoints(&self) -> &[Arc<Endpoint>] {
        self.endpoints.as_slice()
    }
}

//! Uniform random selection.

use super::{EndpointSet, Strategy};
use crate::balancer::endpoint::Endpoint;
use crate::balancer::message::GatewayRequest;
use std::sync::Arc;

/// Random load balancing strategy.
#[derive(Debug, Default)]
pub struct RandomStrategy {
    endpoints: EndpointSet,
}

impl RandomStrategy {
    /// Create a new random strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>) {
        self.endpoints = EndpointSet::new(endpoints);
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
        let idx = rand::RngExt::random_range(&mut rand::rng(), 0..self.endpoints.len());
        self.endpoints.as_slice().get(idx).cloned()
    }

    fn reset(&mut self) {}

    fn endpoints(&self) -> &[Arc<Endpoint>] {
        self.endpoints.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_selects_members_only() {
        let mut strategy = RandomStrategy::new();
        strategy.set_endpoints(endpoints(3));
        let request = GatewayRequest::get();

        let mut seen = HashSet::new();
        for _ in 0..300 {
            let endpoint = strategy.next(&request).unwrap();
            seen.insert(endpoint.name().to_string());
        }
        // 300 uniform draws over 3 endpoints miss one with negligible probability.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_random_single_and_empty() {
        let eps = endpoints(1);
        let mut strategy = RandomStrategy::new();
        strategy.set_endpoints(eps.clone());
        let request = GatewayRequest::get();

        assert_eq!(strategy.next(&request).unwrap().name(), "10.0.0.1:8080");
        strategy.remove(&eps[0]);
        assert!(strategy.next(&request).is_none());
    }
}

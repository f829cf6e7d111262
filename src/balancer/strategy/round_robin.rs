//! Round-robin selection.

use super::{advance, EndpointSet, Strategy};
use crate::balancer::endpoint::Endpoint;
use crate::balancer::message::GatewayRequest;
use std::sync::Arc;

/// Round-robin load balancing strategy.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    endpoints: EndpointSet,
    /// Next position to serve.
    index: usize,
}

impl RoundRobinStrategy {
    /// Create a new round-robin strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>) {
        self.endpoints = EndpointSet::new(endpoints);
        self.index = 0;
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

        let index = self.index % len;
        self.index = advance(index, len);
        self.endpoints.as_slice().get(index).cloned()
    }

    fn reset(&mut self) {
        if self.index >= self.endpoints.len() {
            self.index = 0;
        }
    }

    fn endpoints(&self) -> &[Arc<Endpoint>] {
        self.endpoints.as_slice()
    }
}

//! Client IP consistent hashing.
//!
//! Both strategies map the validated client IP onto a [`HashRing`] of endpoint
//! names. The plain variant keeps the ring equal to the healthy working set, so
//! a client whose endpoint is demoted is re-hashed onto a neighbour. The strict
//! variant keeps every known endpoint on the ring and refuses to fail over: the
//! ring owner is authoritative, and if it is not healthy the client is told no
//! endpoint is available.

use super::{EndpointSet, Strategy};
use crate::balancer::client::{client_ip, extract_client_ip};
use crate::balancer::endpoint::Endpoint;
use crate::balancer::message::GatewayRequest;
use crate::balancer::ring::HashRing;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validated client IP in canonical text form.
fn client_key(request: &GatewayRequest, strategy: &str) -> Option<String> {
    match client_ip(request) {
        Some(ip) => Some(ip.to_string()),
        None => {
            match extract_client_ip(request) {
                Some(raw) => warn!(client_ip = %raw, strategy, "Invalid client IP"),
                None => warn!(strategy, "No client IP on request"),
            }
            None
        },
    }
}

/// Client IP hashing with failover to the next ring owner.
#[derive(Debug)]
pub struct ClientIpHashStrategy {
    endpoints: EndpointSet,
    ring: HashRing,
}

impl ClientIpHashStrategy {
    /// Create a strategy whose ring uses `replicas` virtual nodes per endpoint.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self {
            endpoints: EndpointSet::default(),
            ring: HashRing::new(replicas),
        }
    }

    /// The ring backing this strategy.
    #[must_use]
    pub fn ring(&self) -> &HashRing {
        &self.ring
    }
}

impl Strategy for ClientIpHashStrategy {
    fn name(&self) -> &'static str {
        "client-ip-hash"
    }

    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>) {
        self.endpoints = EndpointSet::new(endpoints);
        self.ring = HashRing::new(self.ring.replicas());
        self.ring
            .add_all(self.endpoints.as_slice().iter().map(|e| e.name()));
    }

    fn add(&mut self, endpoint: Arc<Endpoint>) {
        let name = endpoint.name().to_string();
        if self.endpoints.insert(endpoint, self.name()) {
            self.ring.add(&name);
        }
    }

    fn remove(&mut self, endpoint: &Endpoint) {
        if self.endpoints.remove(endpoint.name(), self.name()) {
            self.ring.remove(endpoint.name());
        }
    }

    fn next(&mut self, request: &GatewayRequest) -> Option<Arc<Endpoint>> {
        if self.endpoints.is_empty() {
            return None;
        }
        let key = client_key(request, self.name())?;
        let name = self.ring.lookup(&key)?;
        self.endpoints.find(name).cloned()
    }

    fn reset(&mut self) {}

    fn endpoints(&self) -> &[Arc<Endpoint>] {
        self.endpoints.as_slice()
    }
}

/// Client IP hashing without failover.
///
/// Demotion only removes an endpoint from the live set; its ring position is
/// kept so its clients stay mapped to it and get no endpoint until it
/// recovers. Administrative removal ([`Strategy::retire`]) drops it from the
/// ring as well.
#[derive(Debug)]
pub struct StrictClientIpHashStrategy {
    endpoints: EndpointSet,
    ring: HashRing,
}

impl StrictClientIpHashStrategy {
    /// Create a strategy whose ring uses `replicas` virtual nodes per endpoint.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self {
            endpoints: EndpointSet::default(),
            ring: HashRing::new(replicas),
        }
    }

    /// The ring backing this strategy.
    #[must_use]
    pub fn ring(&self) -> &HashRing {
        &self.ring
    }
}

impl Strategy for StrictClientIpHashStrategy {
    fn name(&self) -> &'static str {
        "strict-client-ip-hash"
    }

    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>) {
        self.endpoints = EndpointSet::new(endpoints);
        self.ring = HashRing::new(self.ring.replicas());
        self.ring
            .add_all(self.endpoints.as_slice().iter().map(|e| e.name()));
    }

    fn add(&mut self, endpoint: Arc<Endpoint>) {
        let name = endpoint.name().to_string();
        self.endpoints.insert(endpoint, self.name());
        self.ring.add(&name);
    }

    fn remove(&mut self, endpoint: &Endpoint) {
        self.endpoints.remove(endpoint.name(), self.name());
    }

    fn retire(&mut self, endpoint: &Endpoint) {
        self.endpoints.remove(endpoint.name(), self.name());
        self.ring.remove(endpoint.name());
    }

    fn track_demoted(&mut self, endpoint: &Endpoint) {
        self.ring.add(endpoint.name());
    }

    fn next(&mut self, request: &GatewayRequest) -> Option<Arc<Endpoint>> {
        let key = client_key(request, self.name())?;
        let name = self.ring.lookup(&key)?;
        let endpoint = self.endpoints.find(name).cloned();
        if endpoint.is_none() {
            debug!(client_ip = %key, endpoint = %name, "Owning endpoint is not healthy");
        }
        endpoint
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

    fn from_ip(ip: &str) -> GatewayRequest {
        GatewayRequest::get().with_header("X-Forwarded-For", ip)
    }

    fn client_ips(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("192.168.{}.{}", i / 250, i % 250 + 1)).collect()
    }

    #[test]
    fn test_same_client_same_endpoint() {
        let mut strategy = ClientIpHashStrategy::new(100);
        strategy.set_endpoints(endpoints(4));

        for ip in client_ips(50) {
            let first = strategy.next(&from_ip(&ip)).unwrap();
            for _ in 0..5 {
                assert_eq!(strategy.next(&from_ip(&ip)).unwrap().name(), first.name());
            }
        }
    }

    #[test]
    fn test_invalid_or_missing_ip_is_unavailable() {
        let mut strategy = ClientIpHashStrategy::new(100);
        strategy.set_endpoints(endpoints(3));

        assert!(strategy.next(&GatewayRequest::get()).is_none());
        assert!(strategy.next(&from_ip("1.1.1.1.")).is_none());
        assert!(strategy.next(&from_ip("not-an-ip")).is_none());
        assert!(strategy.next(&from_ip("1.1.1.1")).is_some());
        assert!(strategy.next(&from_ip("2001:db8::1")).is_some());
    }

    #[test]
    fn test_demotion_moves_only_affected_clients() {
        let eps = endpoints(4);
        let mut strategy = ClientIpHashStrategy::new(100);
        strategy.set_endpoints(eps.clone());

        let ips = client_ips(200);
        let before: Vec<String> = ips
            .iter()
            .map(|ip| strategy.next(&from_ip(ip)).unwrap().name().to_string())
            .collect();

        strategy.remove(&eps[1]);
        assert!(!strategy.ring().contains(eps[1].name()));

        for (ip, owner) in ips.iter().zip(&before) {
            let now = strategy.next(&from_ip(ip)).unwrap();
            if owner != eps[1].name() {
                assert_eq!(now.name(), owner);
            } else {
                assert_ne!(now.name(), eps[1].name());
            }
        }
    }

    #[test]
    fn test_strict_demoted_owner_is_unavailable() {
        let eps = endpoints(3);
        let mut strategy = StrictClientIpHashStrategy::new(100);
        strategy.set_endpoints(eps.clone());

        let ips = client_ips(100);
        let before: Vec<String> = ips
            .iter()
            .map(|ip| strategy.next(&from_ip(ip)).unwrap().name().to_string())
            .collect();
        assert!(before.iter().any(|n| n == eps[0].name()));

        strategy.remove(&eps[0]);
        assert!(strategy.ring().contains(eps[0].name()));

        for (ip, owner) in ips.iter().zip(&before) {
            let now = strategy.next(&from_ip(ip));
            if owner == eps[0].name() {
                assert!(now.is_none());
            } else {
                assert_eq!(now.unwrap().name(), owner);
            }
        }

        // Recovery restores the original mapping.
        strategy.add(eps[0].clone());
        for (ip, owner) in ips.iter().zip(&before) {
            assert_eq!(strategy.next(&from_ip(ip)).unwrap().name(), owner);
        }
    }

    #[test]
    fn test_strict_retire_drops_ring_position() {
        let eps = endpoints(3);
        let mut strategy = StrictClientIpHashStrategy::new(100);
        strategy.set_endpoints(eps.clone());

        strategy.retire(&eps[2]);
        assert!(!strategy.ring().contains(eps[2].name()));
        for ip in client_ips(100) {
            assert!(strategy.next(&from_ip(&ip)).is_some());
        }
    }

    #[test]
    fn test_strict_tracks_demoted_endpoints_on_ring() {
        let eps = endpoints(3);
        let mut reference = StrictClientIpHashStrategy::new(100);
        reference.set_endpoints(eps.clone());

        let mut strategy = StrictClientIpHashStrategy::new(100);
        strategy.set_endpoints(eps[1..].to_vec());
        strategy.track_demoted(&eps[0]);
        assert!(strategy.ring().contains(eps[0].name()));
        assert_eq!(strategy.endpoints().len(), 2);

        for ip in client_ips(200) {
            let owner = reference.next(&from_ip(&ip)).unwrap();
            match strategy.next(&from_ip(&ip)) {
                Some(now) => assert_eq!(now.name(), owner.name()),
                None => assert_eq!(owner.name(), eps[0].name()),
            }
        }
    }

    #[test]
    fn test_plain_hash_ignores_demoted_endpoints() {
        let eps = endpoints(3);
        let mut strategy = ClientIpHashStrategy::new(100);
        strategy.set_endpoints(eps[1..].to_vec());
        strategy.track_demoted(&eps[0]);
        assert!(!strategy.ring().contains(eps[0].name()));
    }
}

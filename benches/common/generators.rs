//! Test data generators for benchmarks.
//!
//! Endpoint pools, client addresses and requests shaped the way the gateway
//! hands them to the load balancer.

use r0n_balancer::balancer::{Endpoint, EndpointConfig, GatewayRequest};
use rand::RngExt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Endpoint generators
// ---------------------------------------------------------------------------

/// Generate endpoint configurations with random weights between 1 and 10.
pub fn endpoint_configs(count: u16) -> Vec<EndpointConfig> {
    let mut rng = rand::rng();
    (0..count)
        .map(|i| {
            let host = format!("10.0.{}.{}", i / 254, (i % 254) + 1);
            EndpointConfig::new(host, 8080).with_weight(rng.random_range(1u32..=10))
        })
        .collect()
}

/// Build live endpoints from [`endpoint_configs`].
pub fn endpoints(count: u16) -> Vec<Arc<Endpoint>> {
    endpoint_configs(count)
        .iter()
        .map(|config| Arc::new(Endpoint::new(config)))
        .collect()
}

// ---------------------------------------------------------------------------
// Client generators
// ---------------------------------------------------------------------------

/// Generate random IPv4 addresses as strings.
pub fn random_ipv4_addresses(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            format!(
                "{}.{}.{}.{}",
                rng.random_range(1u8..=254),
                rng.random_range(0u8..=255),
                rng.random_range(0u8..=255),
                rng.random_range(1u8..=254),
            )
        })
        .collect()
}

/// Requests from distinct clients behind a proxy.
pub fn forwarded_requests(count: usize) -> Vec<GatewayRequest> {
    random_ipv4_addresses(count)
        .into_iter()
        .map(|ip| {
            GatewayRequest::get().with_header("x-forwarded-for", &format!("{ip}, 10.255.0.1"))
        })
        .collect()
}

/// A request carrying the balancer's cookie.
pub fn cookie_request(cookie_name: &str, marker: &str) -> GatewayRequest {
    GatewayRequest::get().with_header("cookie", &format!("theme=dark; {cookie_name}={marker}"))
}

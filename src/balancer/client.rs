//! Client identification for IP-based routing and persistence.

use super::message::GatewayRequest;
use std::net::IpAddr;

/// Proxy chain header; the first entry is the original client.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Single client address header.
pub const CLIENT_IP: &str = "client-ip";
/// Peer address recorded by the gateway.
pub const REMOTE_ADDR: &str = "remote-addr";

/// Extract the client IP from request headers.
///
/// Checks `X-Forwarded-For` (first entry, trimmed), then `Client-IP`, then
/// `Remote-Addr`. The returned value is not validated.
#[must_use]
pub fn extract_client_ip(request: &GatewayRequest) -> Option<&str> {
    if let Some(forwarded) = request.header(X_FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        return Some(first);
    }

    request
        .header(CLIENT_IP)
        .or_else(|| request.header(REMOTE_ADDR))
}

/// Whether `value` is an IPv4 or IPv6 literal. No resolution is attempted.
#[must_use]
pub fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Extract and validate the client IP.
#[must_use]
pub fn client_ip(request: &GatewayRequest) -> Option<IpAddr> {
    extract_client_ip(request).and_then(|ip| ip.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_first_entry() {
        let request = GatewayRequest::get()
            .with_header("X-Forwarded-For", "9.9.9.9, 1.1.1.1")
            .with_header("Client-IP", "2.2.2.2");
        assert_eq!(extract_client_ip(&request), Some("9.9.9.9"));
    }

    #[test]
    fn test_client_ip_fallback() {
        let request = GatewayRequest::get()
            .with_header("Client-IP", "2.2.2.2")
            .with_header("Remote-Addr", "3.3.3.3");
        assert_eq!(extract_client_ip(&request), Some("2.2.2.2"));

        let request = GatewayRequest::get().with_header("Remote-Addr", "3.3.3.3");
        assert_eq!(extract_client_ip(&request), Some("3.3.3.3"));
    }

    #[test]
    fn test_no_client_headers() {
        assert_eq!(extract_client_ip(&GatewayRequest::get()), None);
        assert_eq!(client_ip(&GatewayRequest::get()), None);
    }

    #[test]
    fn test_ip_validation() {
        assert!(is_valid_ip("1.1.1.1"));
        assert!(is_valid_ip("2001:db8::1"));
        assert!(is_valid_ip("::1"));

        assert!(!is_valid_ip("1.1.1.1."));
        assert!(!is_valid_ip(" 1.1.1.1"));
        assert!(!is_valid_ip("1.1.1"));
        assert!(!is_valid_ip("256.1.1.1"));
        assert!(!is_valid_ip("example.com"));
        assert!(!is_valid_ip(""));
    }

    #[test]
    fn test_client_ip_rejects_garbage() {
        let request = GatewayRequest::get().with_header("X-Forwarded-For", "unknown, 1.1.1.1");
        assert_eq!(extract_client_ip(&request), Some("unknown"));
        assert_eq!(client_ip(&request), None);

        let request = GatewayRequest::get().with_header("X-Forwarded-For", " 2001:db8::1 ");
        assert_eq!(client_ip(&request), Some("2001:db8::1".parse().unwrap()));
    }
}

//! Load balancer policy configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a single backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Backend host (IP literal or hostname).
    pub host: String,

    /// Backend port.
    pub port: u16,

    /// Target URI requests are sent to. Defaults to `http://host:port`.
    #[serde(default)]
    pub uri: Option<String>,

    /// Endpoint weight (for weighted round robin).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl EndpointConfig {
    /// Create an endpoint config with weight 1 and the default URI.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            uri: None,
            weight: default_weight(),
        }
    }

    /// Set the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set an explicit target URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// The endpoint's identity, `host:port`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The target URI for this endpoint.
    #[must_use]
    pub fn target_uri(&self) -> String {
        self.uri
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

/// Endpoint selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyType {
    /// Round-robin distribution.
    #[default]
    RoundRobin,
    /// Weighted round-robin.
    WeightedRoundRobin,
    /// Windowed least response time.
    LeastResponseTime,
    /// Uniform random selection.
    Random,
    /// Consistent hashing on the client IP.
    ClientIpHash,
    /// Consistent hashing on the client IP without failover to other endpoints.
    StrictClientIpHash,
}

impl StrategyType {
    /// All strategies, in declaration order.
    pub const ALL: [StrategyType; 6] = [
        Self::RoundRobin,
        Self::WeightedRoundRobin,
        Self::LeastResponseTime,
        Self::Random,
        Self::ClientIpHash,
        Self::StrictClientIpHash,
    ];

    /// Canonical name of the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::WeightedRoundRobin => "weighted-round-robin",
            Self::LeastResponseTime => "least-response-time",
            Self::Random => "random",
            Self::ClientIpHash => "client-ip-hash",
            Self::StrictClientIpHash => "strict-client-ip-hash",
        }
    }

    /// Whether the strategy routes by hashing the client IP.
    #[must_use]
    pub fn is_ip_hash(&self) -> bool {
        matches!(self, Self::ClientIpHash | Self::StrictClientIpHash)
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}

/// Session persistence modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceMode {
    /// No session persistence.
    #[default]
    None,
    /// Piggyback on a session cookie set by the backend.
    ApplicationCookie,
    /// Load balancer issues its own session cookie.
    LbCookie,
    /// Pin by validated client IP.
    ClientIp,
}

impl PersistenceMode {
    /// Whether this mode relies on cookies.
    #[must_use]
    pub fn is_cookie_based(&self) -> bool {
        matches!(self, Self::ApplicationCookie | Self::LbCookie)
    }
}

/// TLS handling mode of the surrounding gateway. Carried but not interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plain HTTP.
    #[default]
    None,
    /// TLS passed through to the backend.
    Passthrough,
    /// TLS terminated at the gateway.
    Offload,
}

/// Selection and timeout policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Selection algorithm.
    pub strategy: StrategyType,

    /// Session persistence mode.
    pub persistence: PersistenceMode,

    /// TLS mode of the gateway.
    pub ssl_mode: SslMode,

    /// Deadline for a dispatched request; also the probe connect deadline.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Virtual nodes per endpoint on the hash ring.
    pub hash_replicas: usize,

    /// Request window for least-response-time.
    pub response_window: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyType::default(),
            persistence: PersistenceMode::default(),
            ssl_mode: SslMode::default(),
            request_timeout: Duration::from_secs(30),
            hash_replicas: 100,
            response_window: 10,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the active and recovery probers.
    pub enabled: bool,

    /// Probe and sweep interval.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Consecutive failures before an endpoint is demoted.
    pub unhealthy_retries: u32,

    /// Consecutive recovery probe successes before an endpoint is promoted.
    pub healthy_retries: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            unhealthy_retries: 3,
            healthy_retries: 2,
        }
    }
}

/// Session affinity cookie configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// Name of the load balancer's cookie (also the marker key in merged cookies).
    pub cookie_name: String,

    /// Name of the backend session cookie in application-cookie mode.
    pub application_cookie: String,

    /// Always mark the load balancer cookie `Secure`.
    pub secure: bool,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            cookie_name: "R0N_LB".to_string(),
            application_cookie: "JSESSIONID".to_string(),
            secure: false,
        }
    }
}

fn default_weight() -> u32 {
    1
}

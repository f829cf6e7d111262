//! Load balancer error types.

use thiserror::Error;

/// Errors that can occur in the load balancer.
///
/// `NoEndpointAvailable` and `InvalidClientIdentity` are expected steady-state
/// outcomes of selection; callers translate them into a 503 response.
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    /// The pool is empty, exhausted, or a strict hash lookup hit a demoted endpoint.
    #[error("no endpoint available: {0}")]
    NoEndpointAvailable(String),

    /// The client IP was missing or malformed under an IP-hashing policy.
    #[error("invalid client identity: {0}")]
    InvalidClientIdentity(String),

    /// Endpoint not found.
    #[error("endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// Endpoint already exists.
    #[error("endpoint '{0}' already exists")]
    EndpointAlreadyExists(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Background tasks are not running.
    #[error("load balancer not running")]
    NotRunning,

    /// Background tasks are already running.
    #[error("load balancer already running")]
    AlreadyRunning,
}

impl LoadBalancerError {
    /// Whether this error means "no endpoint could serve the request".
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NoEndpointAvailable(_) | Self::InvalidClientIdentity(_)
        )
    }
}

/// Result type for load balancer operations.
pub type LoadBalancerResult<T> = Result<T, LoadBalancerError>;

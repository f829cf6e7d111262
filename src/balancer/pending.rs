//! Registry of in-flight requests.
//!
//! Every dispatch registers an entry under a fresh completion token. The
//! completion path and the timeout sweeper both finish a request by removing
//! its entry; `DashMap::remove` is the check-and-remove that makes whichever
//! comes first the only one that acts.

use super::endpoint::Endpoint;
use super::message::GatewayResponse;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Token identifying one dispatched request.
pub type CompletionToken = u64;

/// What the completion path needs to find its request again.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Registry key.
    pub token: CompletionToken,
    /// Endpoint the request was sent to.
    pub endpoint: Arc<Endpoint>,
    /// When the request was dispatched.
    pub dispatched_at: Instant,
}

/// A registered in-flight request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Endpoint the request was sent to.
    pub endpoint: Arc<Endpoint>,
    /// When the request was dispatched.
    pub dispatched_at: Instant,
    /// Affinity token the request carried.
    pub affinity_token: Option<String>,
    /// Whether the client connection was TLS.
    pub secure: bool,
    responder: oneshot::Sender<GatewayResponse>,
}

impl PendingRequest {
    /// Deliver the final response to the original caller.
    ///
    /// Returns `false` if the caller has gone away.
    pub fn respond(self, response: GatewayResponse) -> bool {
        let status = response.status;
        if self.responder.send(response).is_err() {
            debug!(
                endpoint = %self.endpoint.name(),
                status = %status,
                "Caller dropped before response delivery"
            );
            return false;
        }
        true
    }
}

/// Concurrent map of in-flight requests.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: DashMap<CompletionToken, PendingRequest>,
    next_token: AtomicU64,
}

impl PendingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request dispatched to `endpoint`.
    pub fn register(
        &self,
        endpoint: Arc<Endpoint>,
        affinity_token: Option<String>,
        secure: bool,
        responder: oneshot::Sender<GatewayResponse>,
    ) -> DispatchContext {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let dispatched_at = Instant::now();

        self.entries.insert(
            token,
            PendingRequest {
                endpoint: Arc::clone(&endpoint),
                dispatched_at,
                affinity_token,
                secure,
                responder,
            },
        );

        DispatchContext {
            token,
            endpoint,
            dispatched_at,
        }
    }

    /// Remove and return an entry. `None` if another path already finished it.
    pub fn take(&self, token: CompletionToken) -> Option<PendingRequest> {
        self.entries.remove(&token).map(|(_, pending)| pending)
    }

    /// Tokens of entries dispatched more than `deadline` before `now`.
    #[must_use]
    pub fn expired(&self, now: Instant, deadline: Duration) -> Vec<CompletionToken> {
        self.entries
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.dispatched_at) > deadline)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Whether a token is still pending.
    #[must_use]
    pub fn contains(&self, token: CompletionToken) -> bool {
        self.entries.contains_key(&token)
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

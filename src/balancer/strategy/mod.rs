//! Endpoint selection strategies.
//!
//! Each strategy owns an ordered working set of healthy endpoints plus whatever
//! cursor or derived state it needs. A [`StrategyHandle`] wraps one strategy in
//! its own lock: selection and membership changes (paired with `reset()`) are
//! serialized per strategy instance.

mod ip_hash;
mod least_response_time;
mod random;
mod round_robin;
mod weighted;

pub use ip_hash::{ClientIpHashStrategy, StrictClientIpHashStrategy};
pub use least_response_time::LeastResponseTimeStrategy;
pub use random::RandomStrategy;
pub use round_robin::RoundRobinStrategy;
pub use weighted::WeightedRoundRobinStrategy;

use super::config::{PolicyConfig, StrategyType};
use super::endpoint::Endpoint;
use super::message::GatewayRequest;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Trait for endpoint selection strategies.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Get the strategy name.
    fn name(&self) -> &'static str;

    /// Replace the working set, rebuilding derived state.
    fn set_endpoints(&mut self, endpoints: Vec<Arc<Endpoint>>);

    /// Add an endpoint. Adding a present endpoint is a logged no-op.
    fn add(&mut self, endpoint: Arc<Endpoint>);

    /// Remove an endpoint. Removing an absent endpoint is a logged no-op.
    fn remove(&mut self, endpoint: &Endpoint);

    /// Remove an endpoint permanently (administrative removal, not demotion).
    fn retire(&mut self, endpoint: &Endpoint) {
        self.remove(endpoint);
    }

    /// Keep derived state for an endpoint that is registered but demoted.
    /// The endpoint does not join the working set.
    fn track_demoted(&mut self, _endpoint: &Endpoint) {}

    /// Select the next endpoint, or `None` if none is available.
    fn next(&mut self, request: &GatewayRequest) -> Option<Arc<Endpoint>>;

    /// Re-normalize cursors and ratios after a membership change.
    fn reset(&mut self);

    /// Current working set.
    fn endpoints(&self) -> &[Arc<Endpoint>];
}

/// Ordered working set shared by all strategies.
#[derive(Debug, Default)]
pub struct EndpointSet {
    endpoints: Vec<Arc<Endpoint>>,
}

impl EndpointSet {
    /// Create a set from a list, dropping duplicates.
    #[must_use]
    pub fn new(endpoints: Vec<Arc<Endpoint>>) -> Self {
        let mut set = Self::default();
        for endpoint in endpoints {
            set.insert(endpoint, "endpoint-set");
        }
        set
    }

    /// Append an endpoint. Returns `false` (and logs) if already present.
    pub fn insert(&mut self, endpoint: Arc<Endpoint>, strategy: &str) -> bool {
        if self.contains(endpoint.name()) {
            warn!(
                endpoint = %endpoint.name(),
                strategy,
                "Endpoint already in working set"
            );
            return false;
        }
        self.endpoints.push(endpoint);
        true
    }

    /// Remove an endpoint by name. Returns `false` (and logs) if absent.
    pub fn remove(&mut self, name: &str, strategy: &str) -> bool {
        match self.endpoints.iter().position(|e| e.name() == name) {
            Some(index) => {
                self.endpoints.remove(index);
                true
            },
            None => {
                warn!(endpoint = %name, strategy, "Endpoint not in working set");
                false
            },
        }
    }

    /// Whether an endpoint with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.iter().any(|e| e.name() == name)
    }

    /// Find an endpoint by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.name() == name)
    }

    /// Endpoints in order.
    #[must_use]
    pub fn as_slice(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Strategy container for the supported algorithms.
#[derive(Debug)]
pub enum StrategyContainer {
    /// Round-robin distribution.
    RoundRobin(RoundRobinStrategy),
    /// Weighted round-robin.
    WeightedRoundRobin(WeightedRoundRobinStrategy),
    /// Windowed least response time.
    LeastResponseTime(LeastResponseTimeStrategy),
    /// Random selection.
    Random(RandomStrategy),
    /// Client IP consistent hashing.
    ClientIpHash(ClientIpHashStrategy),
    /// Client IP consistent hashing without failover.
    StrictClientIpHash(StrictClientIpHashStrategy),
}

impl StrategyContainer {
    /// Build a strategy of the given type over `endpoints`.
    #[must_use]
    pub fn build(
        strategy_type: StrategyType,
        policy: &PolicyConfig,
        endpoints: Vec<Arc<Endpoint>>,
    ) -> Self {
        let mut container = match strategy_type {
            StrategyType::RoundRobin => Self::RoundRobin(RoundRobinStrategy::new()),
            StrategyType::WeightedRoundRobin => {
                Self::WeightedRoundRobin(WeightedRoundRobinStrategy::new())
            },
            StrategyType::LeastResponseTime => Self::LeastResponseTime(
                LeastResponseTimeStrategy::new(policy.response_window),
            ),
            StrategyType::Random => Self::Random(RandomStrategy::new()),
            StrategyType::ClientIpHash => {
                Self::ClientIpHash(ClientIpHashStrategy::new(policy.hash_replicas))
            },
            StrategyType::StrictClientIpHash => {
                Self::StrictClientIpHash(StrictClientIpHashStrategy::new(policy.hash_replicas))
            },
        };
        container.as_strategy_mut().set_endpoints(endpoints);
        container
    }

    /// Get the strategy as a trait object.
    pub fn as_strategy(&self) -> &dyn Strategy {
        match self {
            Self::RoundRobin(s) => s,
            Self::WeightedRoundRobin(s) => s,
            Self::LeastResponseTime(s) => s,
            Self::Random(s) => s,
            Self::ClientIpHash(s) => s,
            Self::StrictClientIpHash(s) => s,
        }
    }

    /// Get the strategy as a mutable trait object.
    pub fn as_strategy_mut(&mut self) -> &mut dyn Strategy {
        match self {
            Self::RoundRobin(s) => s,
            Self::WeightedRoundRobin(s) => s,
            Self::LeastResponseTime(s) => s,
            Self::Random(s) => s,
            Self::ClientIpHash(s) => s,
            Self::StrictClientIpHash(s) => s,
        }
    }

    /// Get strategy name.
    pub fn name(&self) -> &'static str {
        self.as_strategy().name()
    }
}

/// A strategy behind its own lock.
#[derive(Debug)]
pub struct StrategyHandle {
    strategy_type: StrategyType,
    inner: Mutex<StrategyContainer>,
}

impl StrategyHandle {
    /// Build a locked strategy over `endpoints`.
    #[must_use]
    pub fn new(
        strategy_type: StrategyType,
        policy: &PolicyConfig,
        endpoints: Vec<Arc<Endpoint>>,
    ) -> Self {
        Self {
            strategy_type,
            inner: Mutex::new(StrategyContainer::build(strategy_type, policy, endpoints)),
        }
    }

    /// Strategy type.
    #[must_use]
    pub fn strategy_type(&self) -> StrategyType {
        self.strategy_type
    }

    /// Lock the strategy. Hold the guard across a membership change and `reset()`.
    pub fn lock(&self) -> MutexGuard<'_, StrategyContainer> {
        self.inner.lock()
    }

    /// Select the next endpoint.
    pub fn next(&self, request: &GatewayRequest) -> Option<Arc<Endpoint>> {
        self.inner.lock().as_strategy_mut().next(request)
    }

    /// Add an endpoint and reset, atomically.
    pub fn add_and_reset(&self, endpoint: Arc<Endpoint>) {
        let mut guard = self.inner.lock();
        let strategy = guard.as_strategy_mut();
        strategy.add(endpoint);
        strategy.reset();
    }

    /// Mark an endpoint unhealthy and drop it from the working set under one
    /// guard. Returns `false` if it was already unhealthy.
    pub fn demote(&self, endpoint: &Endpoint) -> bool {
        let mut guard = self.inner.lock();
        if !endpoint.mark_unhealthy() {
            return false;
        }
        let strategy = guard.as_strategy_mut();
        strategy.remove(endpoint);
        strategy.reset();
        true
    }

    /// Mark an endpoint healthy and add it to the working set under one
    /// guard. Returns `false` if it was already healthy.
    pub fn promote(&self, endpoint: &Arc<Endpoint>) -> bool {
        let mut guard = self.inner.lock();
        if !endpoint.mark_healthy() {
            return false;
        }
        let strategy = guard.as_strategy_mut();
        strategy.add(Arc::clone(endpoint));
        strategy.reset();
        true
    }

    /// Hand over registered endpoints that are currently demoted.
    pub fn track_demoted(&self, endpoints: &[Arc<Endpoint>]) {
        let mut guard = self.inner.lock();
        let strategy = guard.as_strategy_mut();
        for endpoint in endpoints {
            strategy.track_demoted(endpoint);
        }
    }

    /// Retire an endpoint and reset, atomically.
    pub fn retire_and_reset(&self, endpoint: &Endpoint) {
        let mut guard = self.inner.lock();
        let strategy = guard.as_strategy_mut();
        strategy.retire(endpoint);
        strategy.reset();
    }

    /// Names of the endpoints in the working set.
    #[must_use]
    pub fn endpoint_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .as_strategy()
            .endpoints()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Snapshot of the working set.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.inner.lock().as_strategy().endpoints().to_vec()
    }
}

/// Advance a cursor past `index`, wrapping at `len`.
pub(crate) fn advance(index: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        (index + 1) % len
    }
}

//! Shared state of one load balancer instance.
//!
//! Lock order, outermost first: endpoint transition lock, strategy slot,
//! strategy lock, endpoint health record. The selection path only takes the
//! last three, and holds the slot just long enough to clone the handle.
//!
//! A health transition flips the record's flag and changes strategy
//! membership under one strategy lock guard, so selection never sees a
//! demoted endpoint in the working set.

use super::affinity::SessionAffinity;
use super::client::client_ip;
use super::config::{AffinityConfig, EndpointConfig, HealthCheckConfig, PolicyConfig, StrategyType};
use super::endpoint::Endpoint;
use super::error::{LoadBalancerError, LoadBalancerResult};
use super::message::{GatewayRequest, GatewayResponse};
use super::pending::{CompletionToken, DispatchContext, PendingRegistry};
use super::stats::LoadBalancerStats;
use super::strategy::StrategyHandle;
use super::transport::FailureReason;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen endpoint.
    pub endpoint: Arc<Endpoint>,
    /// Affinity token the request carried.
    pub affinity_token: Option<String>,
    /// Whether the endpoint came from the affinity store.
    pub sticky: bool,
}

/// Shared per-instance aggregate.
#[derive(Debug)]
pub struct BalancerContext {
    policy: PolicyConfig,
    health: HealthCheckConfig,
    /// Every registered endpoint, healthy or not.
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
    /// Active strategy. Replaced wholesale on a strategy switch.
    strategy: RwLock<Arc<StrategyHandle>>,
    affinity: SessionAffinity,
    pending: PendingRegistry,
    stats: LoadBalancerStats,
}

impl BalancerContext {
    /// Build a context over the configured endpoints.
    pub fn new(
        policy: PolicyConfig,
        health: HealthCheckConfig,
        affinity: AffinityConfig,
        endpoints: &[EndpointConfig],
    ) -> LoadBalancerResult<Self> {
        check_compatible(policy.strategy, &policy)?;

        let mut registered: Vec<Arc<Endpoint>> = Vec::with_capacity(endpoints.len());
        for config in endpoints {
            let endpoint = Endpoint::new(config);
            if registered.iter().any(|e| e.name() == endpoint.name()) {
                return Err(LoadBalancerError::EndpointAlreadyExists(endpoint.name().to_string()));
            }
            registered.push(Arc::new(endpoint));
        }

        let strategy = StrategyHandle::new(policy.strategy, &policy, registered.clone());
        info!(
            strategy = %policy.strategy,
            persistence = ?policy.persistence,
            endpoints = registered.len(),
            "Load balancer context created"
        );

        Ok(Self {
            affinity: SessionAffinity::new(policy.persistence, affinity),
            policy,
            health,
            endpoints: RwLock::new(registered),
            strategy: RwLock::new(Arc::new(strategy)),
            pending: PendingRegistry::new(),
            stats: LoadBalancerStats::default(),
        })
    }

    /// Selection and timeout policy.
    #[must_use]
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Health check settings.
    #[must_use]
    pub fn health_config(&self) -> &HealthCheckConfig {
        &self.health
    }

    /// Session affinity.
    #[must_use]
    pub fn affinity(&self) -> &SessionAffinity {
        &self.affinity
    }

    /// In-flight requests.
    #[must_use]
    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// Statistics.
    #[must_use]
    pub fn stats(&self) -> &LoadBalancerStats {
        &self.stats
    }

    /// The active strategy.
    #[must_use]
    pub fn strategy(&self) -> Arc<StrategyHandle> {
        Arc::clone(&*self.strategy.read())
    }

    /// Type of the active strategy.
    #[must_use]
    pub fn strategy_type(&self) -> StrategyType {
        self.strategy.read().strategy_type()
    }

    /// Every registered endpoint.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().clone()
    }

    /// Registered endpoints currently in the healthy pool.
    #[must_use]
    pub fn healthy_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .read()
            .iter()
            .filter(|e| e.is_healthy())
            .cloned()
            .collect()
    }

    /// Demoted endpoints awaiting recovery.
    #[must_use]
    pub fn unhealthy_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .read()
            .iter()
            .filter(|e| !e.is_healthy())
            .cloned()
            .collect()
    }

    /// Find a registered endpoint by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().iter().find(|e| e.name() == name).cloned()
    }

    fn is_registered(&self, endpoint: &Endpoint) -> bool {
        self.endpoints
            .read()
            .iter()
            .any(|e| std::ptr::eq(Arc::as_ptr(e), endpoint))
    }

    /// Choose an endpoint for a request.
    ///
    /// A request whose affinity token maps to a healthy endpoint goes there;
    /// otherwise the active strategy decides.
    pub fn select(&self, request: &GatewayRequest) -> LoadBalancerResult<Selection> {
        let affinity_token = self.affinity.request_token(request);

        if let Some(token) = &affinity_token {
            if let Some(endpoint) = self.affinity.sticky_endpoint(token) {
                if endpoint.is_healthy() {
                    self.stats.record_selection(true);
                    self.stats.record_sticky();
                    return Ok(Selection {
                        endpoint,
                        affinity_token,
                        sticky: true,
                    });
                }
                debug!(endpoint = %endpoint.name(), "Sticky endpoint is demoted, falling back");
            }
        }

        let strategy = self.strategy();
        match strategy.next(request) {
            Some(endpoint) => {
                self.stats.record_selection(true);
                Ok(Selection {
                    endpoint,
                    affinity_token,
                    sticky: false,
                })
            },
            None => {
                self.stats.record_selection(false);
                let strategy_type = strategy.strategy_type();
                if strategy_type.is_ip_hash() && client_ip(request).is_none() {
                    Err(LoadBalancerError::InvalidClientIdentity(
                        "missing or malformed client IP".to_string(),
                    ))
                } else {
                    Err(LoadBalancerError::NoEndpointAvailable(strategy_type.to_string()))
                }
            },
        }
    }

    /// Completion path: deliver a response.
    ///
    /// Returns `false` if the request was already finished, in which case the
    /// response is discarded.
    pub fn on_response(&self, mut response: GatewayResponse, dispatch: &DispatchContext) -> bool {
        let Some(pending) = self.pending.take(dispatch.token) else {
            self.stats.record_late();
            debug!(
                endpoint = %dispatch.endpoint.name(),
                token = dispatch.token,
                "Discarding late response"
            );
            return false;
        };

        let endpoint = Arc::clone(&pending.endpoint);
        endpoint.record_response_time(pending.dispatched_at.elapsed());
        endpoint.record_success();
        endpoint.stats().record_completion();
        self.stats.record_completion();

        self.affinity.on_response(
            &mut response,
            &endpoint,
            pending.affinity_token.as_deref(),
            pending.secure,
        );
        pending.respond(response);
        true
    }

    /// Completion path: the transport gave up on a request.
    pub fn on_failure(&self, dispatch: &DispatchContext, reason: FailureReason) -> bool {
        self.fail(dispatch.token, reason)
    }

    /// Finish a request without a response. Shared by the completion path
    /// and the timeout sweeper.
    pub(crate) fn fail(&self, token: CompletionToken, reason: FailureReason) -> bool {
        let Some(pending) = self.pending.take(token) else {
            self.stats.record_late();
            debug!(token, reason = %reason, "Request already finished");
            return false;
        };

        let endpoint = Arc::clone(&pending.endpoint);
        warn!(endpoint = %endpoint.name(), reason = %reason, "Request failed");

        match reason {
            FailureReason::Connect(_) => {
                endpoint.stats().record_connect_failure();
                self.stats.record_connect_failure();
                pending.respond(GatewayResponse::bad_gateway());
                self.record_failure(&endpoint);
            },
            FailureReason::Timeout => {
                endpoint.stats().record_timeout();
                self.stats.record_timeout();
                pending.respond(GatewayResponse::gateway_timeout());
                self.record_timeout(&endpoint);
            },
        }
        true
    }

    /// Count a failure against an endpoint, demoting it at the threshold.
    pub fn record_failure(&self, endpoint: &Arc<Endpoint>) {
        if endpoint.record_failure(self.health.unhealthy_retries) {
            self.demote(endpoint);
        }
    }

    /// Count a timeout. Least-response-time also folds in a zero sample.
    pub fn record_timeout(&self, endpoint: &Arc<Endpoint>) {
        if self.strategy_type() == StrategyType::LeastResponseTime {
            endpoint.record_response_time(Duration::ZERO);
        }
        self.record_failure(endpoint);
    }

    /// Move an endpoint to the unhealthy set. Returns `false` if it was
    /// already demoted or is no longer registered.
    pub fn demote(&self, endpoint: &Arc<Endpoint>) -> bool {
        let _transition = endpoint.transition_lock();
        let active = self.strategy.read();
        if !self.is_registered(endpoint) || !active.demote(endpoint) {
            return false;
        }

        self.stats.record_demotion();
        warn!(endpoint = %endpoint.name(), "Endpoint marked unhealthy");
        true
    }

    /// Return a demoted endpoint to the healthy pool. Returns `false` if it
    /// was already healthy or is no longer registered.
    pub fn promote(&self, endpoint: &Arc<Endpoint>) -> bool {
        let _transition = endpoint.transition_lock();
        let active = self.strategy.read();
        if !self.is_registered(endpoint) || !active.promote(endpoint) {
            return false;
        }

        self.stats.record_promotion();
        info!(endpoint = %endpoint.name(), "Endpoint recovered");
        true
    }

    /// Replace the active strategy with a fresh one over the healthy pool.
    ///
    /// Demoted endpoints are handed over too, so strategies that keep state
    /// for them (the strict ring) stay consistent across the switch.
    pub fn switch_strategy(&self, strategy_type: StrategyType) -> LoadBalancerResult<()> {
        check_compatible(strategy_type, &self.policy)?;

        let mut active = self.strategy.write();
        let previous = active.strategy_type();
        let (healthy, demoted): (Vec<_>, Vec<_>) =
            self.endpoints().into_iter().partition(|e| e.is_healthy());

        let handle = StrategyHandle::new(strategy_type, &self.policy, healthy);
        handle.track_demoted(&demoted);
        *active = Arc::new(handle);
        info!(
            from = %previous,
            to = %strategy_type,
            demoted = demoted.len(),
            "Strategy switched"
        );
        Ok(())
    }

    /// Register a new endpoint in the healthy pool.
    pub fn add_endpoint(&self, config: &EndpointConfig) -> LoadBalancerResult<Arc<Endpoint>> {
        let endpoint = Arc::new(Endpoint::new(config));
        let active = self.strategy.read();
        {
            let mut endpoints = self.endpoints.write();
            if endpoints.iter().any(|e| e.name() == endpoint.name()) {
                return Err(LoadBalancerError::EndpointAlreadyExists(endpoint.name().to_string()));
            }
            endpoints.push(Arc::clone(&endpoint));
        }

        active.add_and_reset(Arc::clone(&endpoint));
        drop(active);
        info!(endpoint = %endpoint.name(), "Endpoint added");
        Ok(endpoint)
    }

    /// Unregister an endpoint and forget its affinity bindings.
    pub fn remove_endpoint(&self, name: &str) -> LoadBalancerResult<Arc<Endpoint>> {
        let endpoint = self
            .find(name)
            .ok_or_else(|| LoadBalancerError::EndpointNotFound(name.to_string()))?;

        {
            let _transition = endpoint.transition_lock();
            let active = self.strategy.read();
            {
                let mut endpoints = self.endpoints.write();
                let before = endpoints.len();
                endpoints.retain(|e| !Arc::ptr_eq(e, &endpoint));
                if endpoints.len() == before {
                    return Err(LoadBalancerError::EndpointNotFound(name.to_string()));
                }
            }

            if endpoint.is_healthy() || active.strategy_type() == StrategyType::StrictClientIpHash {
                active.retire_and_reset(&endpoint);
            }
        }

        let forgotten = self.affinity.store().forget_endpoint(name);
        info!(endpoint = %name, affinity_entries = forgotten, "Endpoint removed");
        Ok(endpoint)
    }

    /// Drop every affinity binding.
    pub fn reset_affinity(&self) {
        let count = self.affinity.store().len();
        self.affinity.store().clear();
        info!(entries = count, "Affinity store reset");
    }
}

fn check_compatible(strategy: StrategyType, policy: &PolicyConfig) -> LoadBalancerResult<()> {
    if strategy.is_ip_hash() && policy.persistence.is_cookie_based() {
        return Err(LoadBalancerError::ConfigError(format!(
            "strategy '{strategy}' cannot be combined with cookie persistence"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::config::PersistenceMode;
    use tokio::sync::oneshot;

    fn configs(count: u16) -> Vec<EndpointConfig> {
        (0..count).map(|i| EndpointConfig::new("10.0.0.1", 8080 + i)).collect()
    }

    fn context_with(policy: PolicyConfig, count: u16) -> BalancerContext {
        BalancerContext::new(
            policy,
            HealthCheckConfig::default(),
            AffinityConfig::default(),
            &configs(count),
        )
        .unwrap()
    }

    fn context(count: u16) -> BalancerContext {
        context_with(PolicyConfig::default(), count)
    }

    #[test]
    fn test_duplicate_endpoints_rejected() {
        let mut endpoints = configs(2);
        endpoints.push(EndpointConfig::new("10.0.0.1", 8080));
        let result = BalancerContext::new(
            PolicyConfig::default(),
            HealthCheckConfig::default(),
            AffinityConfig::default(),
            &endpoints,
        );
        assert!(matches!(result, Err(LoadBalancerError::EndpointAlreadyExists(_))));
    }

    #[test]
    fn test_ip_hash_with_cookie_persistence_rejected() {
        let policy = PolicyConfig {
            strategy: StrategyType::ClientIpHash,
            persistence: PersistenceMode::LbCookie,
            ..PolicyConfig::default()
        };
        let result = BalancerContext::new(
            policy,
            HealthCheckConfig::default(),
            AffinityConfig::default(),
            &configs(2),
        );
        assert!(matches!(result, Err(LoadBalancerError::ConfigError(_))));

        let ctx = context_with(
            PolicyConfig {
                persistence: PersistenceMode::ApplicationCookie,
                ..PolicyConfig::default()
            },
            2,
        );
        assert!(ctx.switch_strategy(StrategyType::StrictClientIpHash).is_err());
        assert_eq!(ctx.strategy_type(), StrategyType::RoundRobin);
    }

    #[test]
    fn test_select_empty_pool() {
        let ctx = context(0);
        let err = ctx.select(&GatewayRequest::get()).unwrap_err();
        assert!(matches!(err, LoadBalancerError::NoEndpointAvailable(_)));
        assert_eq!(ctx.stats().snapshot().failed_selections, 1);
    }

    #[test]
    fn test_select_invalid_client_identity() {
        let ctx = context_with(
            PolicyConfig {
                strategy: StrategyType::ClientIpHash,
                ..PolicyConfig::default()
            },
            3,
        );
        let request = GatewayRequest::get().with_header("X-Forwarded-For", "bogus");
        let err = ctx.select(&request).unwrap_err();
        assert!(matches!(err, LoadBalancerError::InvalidClientIdentity(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_demotion_is_idempotent() {
        let ctx = context(3);
        let endpoint = ctx.endpoints()[1].clone();

        assert!(ctx.demote(&endpoint));
        assert!(!ctx.demote(&endpoint));

        assert_eq!(ctx.unhealthy_endpoints().len(), 1);
        assert_eq!(ctx.strategy().endpoints().len(), 2);
        assert_eq!(ctx.stats().snapshot().demotions, 1);

        for _ in 0..10 {
            let selection = ctx.select(&GatewayRequest::get()).unwrap();
            assert_ne!(selection.endpoint.name(), endpoint.name());
        }
    }

    #[test]
    fn test_concurrent_demotion_counts_once() {
        let ctx = Arc::new(context(3));
        let endpoint = ctx.endpoints()[0].clone();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                let endpoint = Arc::clone(&endpoint);
                std::thread::spawn(move || ctx.demote(&endpoint))
            })
            .collect();
        let demoted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| *d)
            .count();

        assert_eq!(demoted, 1);
        assert_eq!(ctx.unhealthy_endpoints().len(), 1);
        assert_eq!(ctx.strategy().endpoints().len(), 2);
    }

    #[test]
    fn test_promotion_restores_membership() {
        let ctx = context(2);
        let endpoint = ctx.endpoints()[0].clone();

        assert!(!ctx.promote(&endpoint));
        ctx.demote(&endpoint);
        assert!(ctx.promote(&endpoint));
        assert!(!ctx.promote(&endpoint));

        assert!(ctx.unhealthy_endpoints().is_empty());
        assert_eq!(ctx.strategy().endpoints().len(), 2);
        assert_eq!(endpoint.snapshot().unhealthy_retry_count, 0);
    }

    #[test]
    fn test_failures_demote_at_threshold() {
        let ctx = context(2);
        let endpoint = ctx.endpoints()[0].clone();

        ctx.record_failure(&endpoint);
        ctx.record_failure(&endpoint);
        assert!(endpoint.is_healthy());
        ctx.record_failure(&endpoint);
        assert!(!endpoint.is_healthy());
        assert_eq!(ctx.unhealthy_endpoints().len(), 1);
    }

    #[test]
    fn test_response_is_delivered_exactly_once() {
        let ctx = context(1);
        let selection = ctx.select(&GatewayRequest::get()).unwrap();
        let (tx, mut rx) = oneshot::channel();
        let dispatch = ctx.pending().register(selection.endpoint, None, false, tx);

        assert!(ctx.on_response(GatewayResponse::ok(), &dispatch));
        assert!(!ctx.on_response(GatewayResponse::ok(), &dispatch));
        assert!(!ctx.on_failure(&dispatch, FailureReason::Timeout));

        assert_eq!(rx.try_recv().unwrap().status, http::StatusCode::OK);
        let snapshot = ctx.stats().snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.late_completions, 2);
    }

    #[test]
    fn test_connect_failure_delivers_bad_gateway() {
        let ctx = context(1);
        let endpoint = ctx.endpoints()[0].clone();
        let (tx, mut rx) = oneshot::channel();
        let dispatch = ctx.pending().register(Arc::clone(&endpoint), None, false, tx);

        assert!(ctx.on_failure(&dispatch, FailureReason::Connect("refused".into())));
        assert_eq!(rx.try_recv().unwrap().status, http::StatusCode::BAD_GATEWAY);
        assert_eq!(endpoint.snapshot().unhealthy_retry_count, 1);
    }

    #[test]
    fn test_timeout_records_zero_sample_for_least_response_time() {
        let ctx = context_with(
            PolicyConfig {
                strategy: StrategyType::LeastResponseTime,
                ..PolicyConfig::default()
            },
            1,
        );
        let endpoint = ctx.endpoints()[0].clone();
        endpoint.record_response_time(Duration::from_millis(100));

        ctx.record_timeout(&endpoint);
        let record = endpoint.snapshot();
        assert_eq!(record.response_samples, 2);
        assert_eq!(record.avg_response_time, Duration::from_millis(50));
    }

    #[test]
    fn test_switch_strategy_uses_healthy_pool() {
        let ctx = context(3);
        let endpoint = ctx.endpoints()[2].clone();
        ctx.demote(&endpoint);

        ctx.switch_strategy(StrategyType::WeightedRoundRobin).unwrap();
        assert_eq!(ctx.strategy_type(), StrategyType::WeightedRoundRobin);
        assert_eq!(ctx.strategy().endpoints().len(), 2);

        ctx.promote(&endpoint);
        assert_eq!(ctx.strategy().endpoints().len(), 3);
    }

    #[test]
    fn test_add_and_remove_endpoint() {
        let ctx = context(2);

        let added = ctx.add_endpoint(&EndpointConfig::new("10.0.0.9", 9000)).unwrap();
        assert_eq!(ctx.endpoints().len(), 3);
        assert_eq!(ctx.strategy().endpoints().len(), 3);
        assert!(matches!(
            ctx.add_endpoint(&EndpointConfig::new("10.0.0.9", 9000)),
            Err(LoadBalancerError::EndpointAlreadyExists(_))
        ));

        ctx.affinity().store().bind("t", &added);
        ctx.remove_endpoint(added.name()).unwrap();
        assert_eq!(ctx.endpoints().len(), 2);
        assert_eq!(ctx.strategy().endpoints().len(), 2);
        assert!(ctx.affinity().store().is_empty());
        assert!(matches!(
            ctx.remove_endpoint(added.name()),
            Err(LoadBalancerError::EndpointNotFound(_))
        ));

        // A removed endpoint is never promoted back.
        added.mark_unhealthy();
        assert!(!ctx.promote(&added));
        assert_eq!(ctx.strategy().endpoints().len(), 2);
    }

    #[test]
    fn test_remove_demoted_endpoint() {
        let ctx = context(2);
        let endpoint = ctx.endpoints()[0].clone();
        ctx.demote(&endpoint);

        ctx.remove_endpoint(endpoint.name()).unwrap();
        assert!(ctx.unhealthy_endpoints().is_empty());
        assert_eq!(ctx.strategy().endpoints().len(), 1);
    }

    #[test]
    fn test_sticky_selection_falls_back_when_demoted() {
        let ctx = context_with(
            PolicyConfig {
                persistence: PersistenceMode::ClientIp,
                ..PolicyConfig::default()
            },
            3,
        );
        let pinned = ctx.endpoints()[2].clone();
        ctx.affinity().store().bind("9.9.9.9", &pinned);
        let request = GatewayRequest::get().with_header("X-Forwarded-For", "9.9.9.9");

        let selection = ctx.select(&request).unwrap();
        assert!(selection.sticky);
        assert_eq!(selection.endpoint.name(), pinned.name());

        ctx.demote(&pinned);
        let selection = ctx.select(&request).unwrap();
        assert!(!selection.sticky);
        assert_ne!(selection.endpoint.name(), pinned.name());
        // The binding survives demotion.
        assert!(ctx.affinity().sticky_endpoint("9.9.9.9").is_some());

        ctx.reset_affinity();
        assert!(ctx.affinity().store().is_empty());
    }

    #[test]
    fn test_switch_to_strict_hash_keeps_demoted_owner() {
        let strict = PolicyConfig {
            strategy: StrategyType::StrictClientIpHash,
            ..PolicyConfig::default()
        };
        let reference = context_with(strict, 3);
        let ctx = context(3);
        let demoted = ctx.endpoints()[0].clone();
        ctx.demote(&demoted);

        ctx.switch_strategy(StrategyType::StrictClientIpHash).unwrap();

        let requests: Vec<GatewayRequest> = (0..200)
            .map(|i| {
                let ip = format!("172.16.{}.{}", i / 250, i % 250 + 1);
                GatewayRequest::get().with_header("X-Forwarded-For", &ip)
            })
            .collect();

        let mut owned_by_demoted = 0;
        for request in &requests {
            let owner = reference.select(request).unwrap().endpoint;
            match ctx.select(request) {
                Ok(selection) => assert_eq!(selection.endpoint.name(), owner.name()),
                Err(err) => {
                    assert!(matches!(err, LoadBalancerError::NoEndpointAvailable(_)));
                    assert_eq!(owner.name(), demoted.name());
                    owned_by_demoted += 1;
                },
            }
        }
        assert!(owned_by_demoted > 0);

        // Recovery brings the owner back without moving anyone else.
        assert!(ctx.promote(&demoted));
        for request in &requests {
            let owner = reference.select(request).unwrap().endpoint;
            assert_eq!(ctx.select(request).unwrap().endpoint.name(), owner.name());
        }
    }

    #[test]
    fn test_health_flag_matches_membership_during_transitions() {
        let ctx = Arc::new(context(4));
        let flapping = ctx.endpoints()[1].clone();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flipper = {
            let ctx = Arc::clone(&ctx);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    ctx.demote(&flapping);
                    ctx.promote(&flapping);
                }
                done.store(true, std::sync::atomic::Ordering::Release);
            })
        };

        let registered = ctx.endpoints();
        while !done.load(std::sync::atomic::Ordering::Acquire) {
            let strategy = ctx.strategy();
            let guard = strategy.lock();
            let working = guard.as_strategy().endpoints();
            for endpoint in &registered {
                let member = working.iter().any(|e| e.name() == endpoint.name());
                assert_eq!(member, endpoint.is_healthy(), "{}", endpoint.name());
            }
        }
        flipper.join().unwrap();

        let snapshot = ctx.stats().snapshot();
        assert_eq!(snapshot.demotions, snapshot.promotions);
        assert!(ctx.unhealthy_endpoints().is_empty());
    }
}


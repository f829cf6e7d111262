//! Load balancer facade.

use super::config::{EndpointConfig, StrategyType};
use super::context::{BalancerContext, Selection};
use super::endpoint::Endpoint;
use super::error::{LoadBalancerError, LoadBalancerResult};
use super::health::{HealthCheckTask, HealthMonitor, ProbeKind};
use super::message::{GatewayRequest, GatewayResponse};
use super::pending::DispatchContext;
use super::stats::StatsSnapshot;
use super::timeout::{sweep_interval, TimeoutSweeper, TimeoutTask};
use super::transport::{Completion, Connector, FailureReason, Transport};
use crate::config::BalancerConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background tasks of a running load balancer.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: Vec<mpsc::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn the timeout sweeper and, when enabled, both health probers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(context: &Arc<BalancerContext>, connector: &Arc<dyn Connector>) -> Self {
        let mut tasks = Self {
            shutdown: Vec::new(),
            handles: Vec::new(),
        };

        let sweeper = Arc::new(TimeoutSweeper::new(Arc::clone(context)));
        let interval = sweep_interval(context.policy().request_timeout);
        let (tx, rx) = mpsc::channel(1);
        tasks.push(tx, tokio::spawn(TimeoutTask::new(sweeper, interval, rx).run()));

        let health = context.health_config();
        if health.enabled {
            for kind in [ProbeKind::Active, ProbeKind::Recovery] {
                let monitor = Arc::new(HealthMonitor::new(
                    kind,
                    Arc::clone(context),
                    Arc::clone(connector),
                ));
                let (tx, rx) = mpsc::channel(1);
                tasks.push(
                    tx,
                    tokio::spawn(HealthCheckTask::new(monitor, health.interval, rx).run()),
                );
            }
        } else {
            debug!("Health checks disabled");
        }

        tasks
    }

    fn push(&mut self, shutdown: mpsc::Sender<()>, handle: JoinHandle<()>) {
        self.shutdown.push(shutdown);
        self.handles.push(handle);
    }

    /// Number of spawned tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no task was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every task and wait for it to finish.
    pub async fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(()).await;
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// Point-in-time view of a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerStatus {
    /// Whether background tasks are running.
    pub running: bool,
    /// Active strategy.
    pub strategy: StrategyType,
    /// Registered endpoints.
    pub endpoints: usize,
    /// Endpoints in the healthy pool.
    pub healthy: usize,
    /// Names of demoted endpoints.
    pub unhealthy: Vec<String>,
    /// In-flight requests.
    pub pending: usize,
    /// Affinity bindings.
    pub affinity_entries: usize,
    /// Counters.
    pub stats: StatsSnapshot,
}

/// HTTP load balancer.
#[derive(Debug)]
pub struct LoadBalancer {
    context: Arc<BalancerContext>,
    transport: Arc<dyn Transport>,
    connector: Arc<dyn Connector>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl LoadBalancer {
    /// Create a load balancer over an existing context.
    #[must_use]
    pub fn new(
        context: Arc<BalancerContext>,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            context,
            transport,
            connector,
            tasks: Mutex::new(None),
        }
    }

    /// Create a load balancer from configuration.
    pub fn from_config(
        config: &BalancerConfig,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn Connector>,
    ) -> LoadBalancerResult<Self> {
        let context = BalancerContext::new(
            config.balancer.clone(),
            config.health_check.clone(),
            config.affinity.clone(),
            &config.endpoints,
        )?;
        Ok(Self::new(Arc::new(context), transport, connector))
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<BalancerContext> {
        &self.context
    }

    /// Choose an endpoint for a request without dispatching it.
    pub fn select_endpoint(&self, request: &GatewayRequest) -> LoadBalancerResult<Selection> {
        self.context.select(request)
    }

    /// Register a selected request as in flight.
    ///
    /// For callers that drive the transport themselves; report the outcome
    /// with [`on_response`](Self::on_response) or [`on_failure`](Self::on_failure).
    pub fn register(
        &self,
        request: &GatewayRequest,
        selection: &Selection,
    ) -> (DispatchContext, oneshot::Receiver<GatewayResponse>) {
        let (tx, rx) = oneshot::channel();
        let dispatch = self.context.pending().register(
            Arc::clone(&selection.endpoint),
            selection.affinity_token.clone(),
            request.is_secure(),
            tx,
        );
        selection.endpoint.stats().record_dispatch();
        (dispatch, rx)
    }

    /// Select an endpoint and hand the request to the transport.
    ///
    /// The receiver yields the endpoint's response, or a synthesized 504/502.
    pub fn dispatch(
        &self,
        request: GatewayRequest,
    ) -> LoadBalancerResult<oneshot::Receiver<GatewayResponse>> {
        let selection = self.select_endpoint(&request)?;
        let (dispatch, rx) = self.register(&request, &selection);
        debug!(
            endpoint = %selection.endpoint.name(),
            token = dispatch.token,
            sticky = selection.sticky,
            "Dispatching request"
        );

        let completion = Completion::new(Arc::clone(&self.context), dispatch);
        self.transport
            .dispatch(request, selection.endpoint, completion);
        Ok(rx)
    }

    /// Dispatch a request and wait for the final response.
    ///
    /// No available endpoint yields 503.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        match self.dispatch(request) {
            Ok(rx) => rx.await.unwrap_or_else(|_| {
                warn!("Request finished without a response");
                GatewayResponse::bad_gateway()
            }),
            Err(e) => {
                debug!(error = %e, "Request rejected");
                GatewayResponse::service_unavailable()
            },
        }
    }

    /// Deliver an endpoint response. Returns `false` if it arrived too late.
    pub fn on_response(&self, response: GatewayResponse, dispatch: &DispatchContext) -> bool {
        self.context.on_response(response, dispatch)
    }

    /// Report a request that will not get a response.
    pub fn on_failure(&self, dispatch: &DispatchContext, reason: FailureReason) -> bool {
        self.context.on_failure(dispatch, reason)
    }

    /// Start the probers and the timeout sweeper.
    pub fn start(&self) -> LoadBalancerResult<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(LoadBalancerError::AlreadyRunning);
        }

        let spawned = BackgroundTasks::spawn(&self.context, &self.connector);
        info!(tasks = spawned.len(), strategy = %self.context.strategy_type(), "Load balancer started");
        *tasks = Some(spawned);
        Ok(())
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn stop(&self) -> LoadBalancerResult<()> {
        let tasks = self.tasks.lock().take().ok_or(LoadBalancerError::NotRunning)?;
        tasks.shutdown().await;
        info!("Load balancer stopped");
        Ok(())
    }

    /// Whether background tasks are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> BalancerStatus {
        let unhealthy = self
            .context
            .unhealthy_endpoints()
            .iter()
            .map(|e| e.name().to_string())
            .collect();

        BalancerStatus {
            running: self.is_running(),
            strategy: self.context.strategy_type(),
            endpoints: self.context.endpoints().len(),
            healthy: self.context.healthy_endpoints().len(),
            unhealthy,
            pending: self.context.pending().len(),
            affinity_entries: self.context.affinity().store().len(),
            stats: self.context.stats().snapshot(),
        }
    }

    /// Switch the active strategy at runtime.
    pub fn switch_strategy(&self, strategy_type: StrategyType) -> LoadBalancerResult<()> {
        self.context.switch_strategy(strategy_type)
    }

    /// Register a new endpoint.
    pub fn add_endpoint(&self, config: &EndpointConfig) -> LoadBalancerResult<Arc<Endpoint>> {
        self.context.add_endpoint(config)
    }

    /// Unregister an endpoint.
    pub fn remove_endpoint(&self, name: &str) -> LoadBalancerResult<Arc<Endpoint>> {
        self.context.remove_endpoint(name)
    }

    /// Drop every affinity binding.
    pub fn reset_affinity(&self) {
        self.context.reset_affinity();
    }

    /// Demoted endpoints awaiting recovery.
    #[must_use]
    pub fn unhealthy_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.context.unhealthy_endpoints()
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.context.pending().len()
    }
}

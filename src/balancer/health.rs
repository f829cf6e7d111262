//! Active and recovery health probing.
//!
//! The active prober connects to every healthy endpoint and counts failures
//! toward demotion. The recovery prober connects to every demoted endpoint and
//! counts consecutive successes toward promotion. Each cycle works on a
//! snapshot and is skipped if the previous cycle of the same prober is still
//! running.

use super::context::BalancerContext;
use super::endpoint::Endpoint;
use super::transport::Connector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which pool a prober watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Healthy endpoints; failures lead to demotion.
    Active,
    /// Demoted endpoints; successes lead to promotion.
    Recovery,
}

impl ProbeKind {
    /// Kind name for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recovery => "recovery",
        }
    }
}

/// Result of one probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCycle {
    /// Endpoints probed.
    pub probed: usize,
    /// Probes that connected.
    pub passed: usize,
    /// Endpoints that changed pool as a result.
    pub transitions: usize,
}

/// Clears the running flag when a cycle ends, even if it is cancelled or
/// panics.
pub(crate) struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    /// Set the flag, or `None` if it was already set.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Health prober for one pool.
#[derive(Debug)]
pub struct HealthMonitor {
    kind: ProbeKind,
    context: Arc<BalancerContext>,
    connector: Arc<dyn Connector>,
    running: AtomicBool,
}

impl HealthMonitor {
    /// Create a prober of the given kind.
    #[must_use]
    pub fn new(kind: ProbeKind, context: Arc<BalancerContext>, connector: Arc<dyn Connector>) -> Self {
        Self {
            kind,
            context,
            connector,
            running: AtomicBool::new(false),
        }
    }

    /// Prober kind.
    #[must_use]
    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Whether a cycle is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn targets(&self) -> Vec<Arc<Endpoint>> {
        match self.kind {
            ProbeKind::Active => self.context.healthy_endpoints(),
            ProbeKind::Recovery => self.context.unhealthy_endpoints(),
        }
    }

    /// Connect to one endpoint with the request timeout as deadline.
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        let deadline = self.context.policy().request_timeout;
        let start = Instant::now();

        match self
            .connector
            .connect(endpoint.host(), endpoint.port(), deadline)
            .await
        {
            Ok(()) => {
                debug!(
                    endpoint = %endpoint.name(),
                    probe = self.kind.as_str(),
                    response_time_ms = start.elapsed().as_millis() as u64,
                    "Health probe passed"
                );
                true
            },
            Err(e) => {
                warn!(
                    endpoint = %endpoint.name(),
                    probe = self.kind.as_str(),
                    error = %e,
                    "Health probe failed"
                );
                false
            },
        }
    }

    /// Run one cycle. Returns `None` if a cycle is already in progress.
    pub async fn run_once(&self) -> Option<ProbeCycle> {
        let Some(_guard) = RunningGuard::try_acquire(&self.running) else {
            debug!(probe = self.kind.as_str(), "Previous probe cycle still running, skipping");
            return None;
        };

        let health = self.context.health_config();
        let mut cycle = ProbeCycle::default();

        for endpoint in self.targets() {
            let passed = self.probe(&endpoint).await;
            cycle.probed += 1;
            if passed {
                cycle.passed += 1;
            }

            let transitioned = match self.kind {
                ProbeKind::Active => {
                    if passed {
                        endpoint.record_success();
                        false
                    } else {
                        endpoint.record_failure(health.unhealthy_retries)
                            && self.context.demote(&endpoint)
                    }
                },
                ProbeKind::Recovery => {
                    endpoint.record_recovery_probe(passed, health.healthy_retries)
                        && self.context.promote(&endpoint)
                },
            };
            if transitioned {
                cycle.transitions += 1;
            }
        }

        debug!(
            probe = self.kind.as_str(),
            probed = cycle.probed,
            passed = cycle.passed,
            transitions = cycle.transitions,
            "Health check cycle complete"
        );
        Some(cycle)
    }
}

/// Health check task that runs periodically.
#[derive(Debug)]
pub struct HealthCheckTask {
    /// Prober.
    monitor: Arc<HealthMonitor>,
    /// Cycle interval.
    interval: Duration,
    /// Shutdown signal.
    shutdown: mpsc::Receiver<()>,
}

impl HealthCheckTask {
    /// Create a new health check task.
    #[must_use]
    pub fn new(monitor: Arc<HealthMonitor>, interval: Duration, shutdown: mpsc::Receiver<()>) -> Self {
        Self {
            monitor,
            interval,
            shutdown,
        }
    }

    /// Run the health check task.
    pub async fn run(mut self) {
        let probe = self.monitor.kind().as_str();
        debug!(
            probe,
            interval_ms = self.interval.as_millis() as u64,
            "Starting health check task"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!(probe, "Health check task shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.monitor.run_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::config::{AffinityConfig, EndpointConfig, HealthCheckConfig, PolicyConfig};
    use crate::balancer::transport::ConnectFuture;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::io;

    /// Connector whose reachable set is controlled by the test.
    #[derive(Debug, Default)]
    struct ScriptedConnector {
        down: Mutex<HashSet<u16>>,
    }

    impl ScriptedConnector {
        fn set_down(&self, port: u16, down: bool) {
            let mut set = self.down.lock();
            if down {
                set.insert(port);
            } else {
                set.remove(&port);
            }
        }
    }

    impl Connector for ScriptedConnector {
        fn connect<'a>(&'a self, _host: &'a str, port: u16, _deadline: Duration) -> ConnectFuture<'a> {
            let down = self.down.lock().contains(&port);
            Box::pin(async move {
                if down {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn setup(count: u16) -> (Arc<BalancerContext>, Arc<ScriptedConnector>) {
        let endpoints: Vec<_> = (0..count).map(|i| EndpointConfig::new("10.0.0.1", 8080 + i)).collect();
        let context = BalancerContext::new(
            PolicyConfig::default(),
            HealthCheckConfig {
                unhealthy_retries: 2,
                healthy_retries: 2,
                ..HealthCheckConfig::default()
            },
            AffinityConfig::default(),
            &endpoints,
        )
        .unwrap();
        (Arc::new(context), Arc::new(ScriptedConnector::default()))
    }

    #[tokio::test]
    async fn test_active_probe_demotes_after_threshold() {
        let (context, connector) = setup(3);
        let active = HealthMonitor::new(ProbeKind::Active, Arc::clone(&context), connector.clone());
        connector.set_down(8081, true);

        let cycle = active.run_once().await.unwrap();
        assert_eq!(cycle.probed, 3);
        assert_eq!(cycle.passed, 2);
        assert_eq!(cycle.transitions, 0);
        assert!(context.unhealthy_endpoints().is_empty());

        let cycle = active.run_once().await.unwrap();
        assert_eq!(cycle.transitions, 1);
        assert_eq!(context.unhealthy_endpoints()[0].name(), "10.0.0.1:8081");
        assert_eq!(context.strategy().endpoints().len(), 2);

        // Demoted endpoints are no longer actively probed.
        let cycle = active.run_once().await.unwrap();
        assert_eq!(cycle.probed, 2);
    }

    #[tokio::test]
    async fn test_recovery_probe_promotes_after_threshold() {
        let (context, connector) = setup(2);
        let recovery = HealthMonitor::new(ProbeKind::Recovery, Arc::clone(&context), connector.clone());
        let endpoint = context.endpoints()[0].clone();
        context.demote(&endpoint);

        connector.set_down(8080, true);
        assert_eq!(recovery.run_once().await.unwrap().transitions, 0);

        connector.set_down(8080, false);
        assert_eq!(recovery.run_once().await.unwrap().transitions, 0);
        assert_eq!(recovery.run_once().await.unwrap().transitions, 1);

        assert!(endpoint.is_healthy());
        assert!(context.unhealthy_endpoints().is_empty());
        assert_eq!(context.strategy().endpoints().len(), 2);
        assert_eq!(recovery.run_once().await.unwrap().probed, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (context, connector) = setup(1);
        let active = HealthMonitor::new(ProbeKind::Active, Arc::clone(&context), connector.clone());

        connector.set_down(8080, true);
        active.run_once().await;
        connector.set_down(8080, false);
        active.run_once().await;
        connector.set_down(8080, true);
        active.run_once().await;

        assert!(context.endpoints()[0].is_healthy());
    }

    #[tokio::test]
    async fn test_cycle_is_not_reentrant() {
        let (context, connector) = setup(1);
        let active = HealthMonitor::new(ProbeKind::Active, context, connector);

        active.running.store(true, Ordering::Release);
        assert!(active.run_once().await.is_none());

        active.running.store(false, Ordering::Release);
        assert!(active.run_once().await.is_some());
        assert!(!active.is_running());
    }

    #[tokio::test]
    async fn test_task_shutdown() {
        let (context, connector) = setup(1);
        let monitor = Arc::new(HealthMonitor::new(ProbeKind::Active, context, connector));
        let (tx, rx) = mpsc::channel(1);

        let task = HealthCheckTask::new(monitor, Duration::from_millis(10), rx);
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}

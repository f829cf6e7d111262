//! Timeout sweeper for in-flight requests.

use super::context::BalancerContext;
use super::health::RunningGuard;
use super::transport::FailureReason;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Slack added to the request timeout before a request is expired.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(250);

/// Sweep at a quarter of the request timeout, between 50ms and 1s.
#[must_use]
pub fn sweep_interval(request_timeout: Duration) -> Duration {
    (request_timeout / 4).clamp(Duration::from_millis(50), Duration::from_secs(1))
}

/// Expires requests older than `request_timeout + grace`.
///
/// Each expired request gets a synthesized 504 and counts as a failure of its
/// endpoint. A request the completion path already finished is skipped.
#[derive(Debug)]
pub struct TimeoutSweeper {
    context: Arc<BalancerContext>,
    grace: Duration,
    running: AtomicBool,
}

impl TimeoutSweeper {
    /// Create a sweeper with [`DEFAULT_GRACE`].
    #[must_use]
    pub fn new(context: Arc<BalancerContext>) -> Self {
        Self::with_grace(context, DEFAULT_GRACE)
    }

    /// Create a sweeper with a custom grace period.
    #[must_use]
    pub fn with_grace(context: Arc<BalancerContext>, grace: Duration) -> Self {
        Self {
            context,
            grace,
            running: AtomicBool::new(false),
        }
    }

    /// Age past which a request is expired.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.context.policy().request_timeout + self.grace
    }

    /// Expire everything overdue at `now`. Returns how many requests this
    /// sweep finished, or `None` if another sweep is in progress.
    pub fn sweep_once(&self, now: Instant) -> Option<usize> {
        let _guard = RunningGuard::try_acquire(&self.running)?;

        let expired = self.context.pending().expired(now, self.deadline());
        let finished = expired
            .into_iter()
            .filter(|token| self.context.fail(*token, FailureReason::Timeout))
            .count();

        if finished > 0 {
            debug!(expired = finished, "Timeout sweep complete");
        }
        Some(finished)
    }
}

/// Periodic sweep task.
#[derive(Debug)]
pub struct TimeoutTask {
    sweeper: Arc<TimeoutSweeper>,
    interval: Duration,
    shutdown: mpsc::Receiver<()>,
}

impl TimeoutTask {
    /// Create a new sweep task.
    #[must_use]
    pub fn new(sweeper: Arc<TimeoutSweeper>, interval: Duration, shutdown: mpsc::Receiver<()>) -> Self {
        Self {
            sweeper,
            interval,
            shutdown,
        }
    }

    /// Run the sweep task.
    pub async fn run(mut self) {
        debug!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting timeout sweeper"
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!("Timeout sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweeper.sweep_once(Instant::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::config::{
        AffinityConfig, EndpointConfig, HealthCheckConfig, PolicyConfig, StrategyType,
    };
    use crate::balancer::message::GatewayResponse;
    use http::StatusCode;
    use std::sync::atomic::Ordering;
    use tokio::sync::oneshot;

    fn context(strategy: StrategyType) -> Arc<BalancerContext> {
        let context = BalancerContext::new(
            PolicyConfig {
                strategy,
                request_timeout: Duration::from_secs(1),
                ..PolicyConfig::default()
            },
            HealthCheckConfig {
                unhealthy_retries: 2,
                ..HealthCheckConfig::default()
            },
            AffinityConfig::default(),
            &[EndpointConfig::new("10.0.0.1", 8080), EndpointConfig::new("10.0.0.2", 8080)],
        )
        .unwrap();
        Arc::new(context)
    }

    #[test]
    fn test_sweep_interval_bounds() {
        assert_eq!(sweep_interval(Duration::from_secs(30)), Duration::from_secs(1));
        assert_eq!(sweep_interval(Duration::from_millis(100)), Duration::from_millis(50));
        assert_eq!(sweep_interval(Duration::from_secs(2)), Duration::from_millis(500));
    }

    #[test]
    fn test_sweep_delivers_gateway_timeout() {
        let context = context(StrategyType::RoundRobin);
        let sweeper = TimeoutSweeper::new(Arc::clone(&context));
        let endpoint = context.endpoints()[0].clone();

        let (tx, mut rx) = oneshot::channel();
        let dispatch = context.pending().register(Arc::clone(&endpoint), None, false, tx);

        assert_eq!(sweeper.sweep_once(dispatch.dispatched_at), Some(0));
        assert_eq!(
            sweeper.sweep_once(dispatch.dispatched_at + Duration::from_millis(1200)),
            Some(0)
        );

        let late = dispatch.dispatched_at + Duration::from_secs(2);
        assert_eq!(sweeper.sweep_once(late), Some(1));
        assert_eq!(rx.try_recv().unwrap().status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(endpoint.snapshot().unhealthy_retry_count, 1);

        // The late response is discarded.
        assert!(!context.on_response(GatewayResponse::ok(), &dispatch));
        assert_eq!(context.stats().snapshot().timeouts, 1);
        assert_eq!(context.stats().snapshot().late_completions, 1);
    }

    #[test]
    fn test_repeated_timeouts_demote() {
        let context = context(StrategyType::RoundRobin);
        let sweeper = TimeoutSweeper::new(Arc::clone(&context));
        let endpoint = context.endpoints()[1].clone();

        let mut last = None;
        for _ in 0..2 {
            let dispatch =
                context
                    .pending()
                    .register(Arc::clone(&endpoint), None, false, oneshot::channel().0);
            last = Some(dispatch.dispatched_at);
        }

        let now = last.unwrap() + Duration::from_secs(5);
        assert_eq!(sweeper.sweep_once(now), Some(2));
        assert!(!endpoint.is_healthy());
        assert_eq!(context.unhealthy_endpoints().len(), 1);
    }

    #[test]
    fn test_completed_requests_are_skipped() {
        let context = context(StrategyType::LeastResponseTime);
        let sweeper = TimeoutSweeper::new(Arc::clone(&context));
        let endpoint = context.endpoints()[0].clone();

        let dispatch = context
            .pending()
            .register(Arc::clone(&endpoint), None, false, oneshot::channel().0);
        assert!(context.on_response(GatewayResponse::ok(), &dispatch));

        let now = dispatch.dispatched_at + Duration::from_secs(5);
        assert_eq!(sweeper.sweep_once(now), Some(0));
        assert_eq!(endpoint.snapshot().unhealthy_retry_count, 0);
    }

    #[test]
    fn test_sweep_is_not_reentrant() {
        let sweeper = TimeoutSweeper::new(context(StrategyType::RoundRobin));
        sweeper.running.store(true, Ordering::Release);
        assert_eq!(sweeper.sweep_once(Instant::now()), None);
    }

    #[test]
    fn test_sweep_recovers_after_panic() {
        let sweeper = TimeoutSweeper::new(context(StrategyType::RoundRobin));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = RunningGuard::try_acquire(&sweeper.running).unwrap();
            panic!("sweep aborted");
        }));
        assert!(outcome.is_err());
        assert!(!sweeper.running.load(Ordering::Acquire));
        assert_eq!(sweeper.sweep_once(Instant::now()), Some(0));
    }

    #[tokio::test]
    async fn test_task_shutdown() {
        let sweeper = Arc::new(TimeoutSweeper::new(context(StrategyType::RoundRobin)));
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(TimeoutTask::new(sweeper, Duration::from_millis(10), rx).run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}

//! R0N Balancer probe runner.
//!
//! Loads a configuration file, then runs the active and recovery probers
//! against the configured endpoints until interrupted.

use r0n_balancer::balancer::{BackgroundTasks, BalancerContext, Connector, TcpConnector};
use r0n_balancer::config::ConfigLoader;
use r0n_balancer::logging::init_tracing;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: r0n-balancer <config.toml>");
        return ExitCode::from(2);
    };

    let config = match ConfigLoader::with_defaults().load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("r0n-balancer: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("r0n-balancer: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path,
        endpoints = config.endpoints.len(),
        "Starting r0n-balancer"
    );

    let context = match BalancerContext::new(
        config.balancer.clone(),
        config.health_check.clone(),
        config.affinity.clone(),
        &config.endpoints,
    ) {
        Ok(context) => Arc::new(context),
        Err(e) => {
            error!(error = %e, "Invalid load balancer configuration");
            return ExitCode::FAILURE;
        },
    };

    let connector: Arc<dyn Connector> = Arc::new(TcpConnector);
    let tasks = BackgroundTasks::spawn(&context, &connector);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    tasks.shutdown().await;

    let unhealthy: Vec<String> = context
        .unhealthy_endpoints()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    info!(
        healthy = context.healthy_endpoints().len(),
        unhealthy = ?unhealthy,
        "Final endpoint state"
    );

    ExitCode::SUCCESS
}

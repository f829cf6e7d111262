//! Contracts with the transport layer.
//!
//! The balancer never speaks HTTP itself. A [`Transport`] sends a request to
//! the chosen endpoint and reports back through the [`Completion`] it was
//! handed; a [`Connector`] performs the bare TCP connect used by probes.

use super::context::BalancerContext;
use super::endpoint::Endpoint;
use super::message::{GatewayRequest, GatewayResponse};
use super::pending::DispatchContext;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Why a dispatched request did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The endpoint could not be reached.
    Connect(String),
    /// No response arrived before the deadline.
    Timeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(reason) => write!(f, "connect failed: {reason}"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

/// Completion callback for one dispatched request.
///
/// Consumed by either [`complete`](Self::complete) or [`fail`](Self::fail).
/// If the timeout sweeper already finished the request, the call is a
/// discarded no-op and returns `false`.
#[derive(Debug)]
pub struct Completion {
    context: Arc<BalancerContext>,
    dispatch: DispatchContext,
}

impl Completion {
    pub(crate) fn new(context: Arc<BalancerContext>, dispatch: DispatchContext) -> Self {
        Self { context, dispatch }
    }

    /// Dispatch details.
    #[must_use]
    pub fn dispatch_context(&self) -> &DispatchContext {
        &self.dispatch
    }

    /// Report the endpoint's response.
    pub fn complete(self, response: GatewayResponse) -> bool {
        self.context.on_response(response, &self.dispatch)
    }

    /// Report that no response will arrive.
    pub fn fail(self, reason: FailureReason) -> bool {
        self.context.on_failure(&self.dispatch, reason)
    }
}

/// Sends requests to endpoints.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `request` to `endpoint` and invoke `completion` exactly once.
    ///
    /// Must not block; implementations spawn the actual I/O.
    fn dispatch(&self, request: GatewayRequest, endpoint: Arc<Endpoint>, completion: Completion);
}

/// Type alias for an in-progress connect attempt.
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Raw TCP reachability check.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connect to `host:port` within `deadline`, then release the socket.
    ///
    /// No verdict within the deadline is an error of kind `TimedOut`.
    fn connect<'a>(&'a self, host: &'a str, port: u16, deadline: Duration) -> ConnectFuture<'a>;
}

/// [`Connector`] backed by `tokio::net::TcpStream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16, deadline: Duration) -> ConnectFuture<'a> {
        Box::pin(async move {
            match timeout(deadline, TcpStream::connect((host, port))).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    Ok(())
                },
                Ok(Err(e)) => Err(e),
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection timeout")),
            }
        })
    }
}

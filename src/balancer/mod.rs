//! # Load Balancer
//!
//! Decision core of the gateway's HTTP load balancer: chooses an endpoint for
//! each request, keeps session affinity, and tracks endpoint health from both
//! probes and request outcomes.
//!
//! ## Features
//!
//! - **Strategies**: round-robin, weighted round-robin, least-response-time,
//!   random, client IP hashing and strict client IP hashing
//! - **Session Affinity**: application cookie, load balancer cookie or client IP
//! - **Health Monitoring**: active probing of healthy endpoints, recovery
//!   probing of demoted ones, passive demotion on timeouts and connect failures
//! - **Timeouts**: in-flight requests past their deadline get a 504
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────────┐
//!  request ────▶ │ LoadBalancer                         │
//!                │   affinity ──▶ strategy ──▶ endpoint │ ────▶ Transport
//!                │        ▲                      │      │
//!                │        │   PendingRegistry ◀──┘      │ ◀──── Completion
//!                │        │          ▲                  │
//!                │  HealthMonitor    TimeoutSweeper     │
//!                │  (active/recovery)                   │ ────▶ Connector
//!                └──────────────────────────────────────┘
//! ```

pub mod affinity;
pub mod balancer;
pub mod client;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod message;
pub mod pending;
pub mod ring;
pub mod stats;
pub mod strategy;
pub mod timeout;
pub mod transport;

pub use affinity::{AffinityStore, SessionAffinity};
pub use balancer::{BackgroundTasks, BalancerStatus, LoadBalancer};
pub use config::{
    AffinityConfig, EndpointConfig, HealthCheckConfig, PersistenceMode, PolicyConfig, SslMode,
    StrategyType,
};
pub use context::{BalancerContext, Selection};
pub use endpoint::{Endpoint, EndpointStats, HealthRecord};
pub use error::{LoadBalancerError, LoadBalancerResult};
pub use health::{HealthCheckTask, HealthMonitor, ProbeCycle, ProbeKind};
pub use message::{GatewayRequest, GatewayResponse};
pub use pending::{CompletionToken, DispatchContext, PendingRegistry};
pub use ring::{HashRing, RingHasher, Sha1Hasher};
pub use stats::{LoadBalancerStats, StatsSnapshot};
pub use strategy::{Strategy, StrategyContainer, StrategyHandle};
pub use timeout::{TimeoutSweeper, TimeoutTask};
pub use transport::{Completion, Connector, FailureReason, TcpConnector, Transport};

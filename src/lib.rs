//! # R0N Balancer
//!
//! Endpoint selection core for the R0N gateway's HTTP load balancer.
//!
//! ## Features
//!
//! - Six selection strategies behind one [`balancer::Strategy`] trait
//! - Consistent-hash ring for client IP affinity
//! - Session affinity by application cookie, balancer cookie or client IP
//! - Active and recovery health probing with threshold-based transitions
//! - Passive failure detection from request timeouts and connect failures
//!
//! ## Architecture
//!
//! A [`balancer::LoadBalancer`] owns one [`balancer::BalancerContext`] holding
//! every endpoint, the active strategy, the affinity store and the registry of
//! in-flight requests. The mediation layer hands requests in and reports
//! outcomes through a [`balancer::Transport`]; the probers reach endpoints
//! through a [`balancer::Connector`].

pub mod balancer;
pub mod config;
pub mod logging;

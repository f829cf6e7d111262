//! Benchmark harness utilities.
//!
//! Tokio runtimes and standard sizes for the load balancer benchmarks.

/// Create a multi-threaded Tokio runtime for async benchmarks.
pub fn bench_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime for benchmarks")
}

/// Endpoint pool sizes exercised by the selection benchmarks.
pub struct PoolSizes;

impl PoolSizes {
    /// Pool sizes from a small cluster to a large fleet.
    pub const ALL: [u16; 4] = [3, 10, 50, 200];
}

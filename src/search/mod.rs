//! Serve-time search: caching, rate limiting, retries, metrics and the
//! service that ties them to a loaded knowledge base.

pub mod benchmark;
pub mod cache;
pub mod metrics;
pub mod rate_limit;
pub mod resources;
pub mod retry;
pub mod service;

pub use benchmark::{
    BenchmarkReport, DEFAULT_BENCHMARK_QUERIES, LatencySummary, QueryFailure, QueryMeasurement,
    RelevanceSummary, run_benchmark, run_benchmark_with_progress,
};
pub use cache::{CacheStats, SearchCache, normalize_query};
pub use metrics::{MetricsSnapshot, SearchMetrics};
pub use rate_limit::{RateDecision, RateLimiter};
pub use resources::{ResourceMonitor, SystemInfo, SystemMetrics};
pub use retry::{RetryExhausted, RetryPolicy};
pub use service::{SearchService, ServiceOptions};

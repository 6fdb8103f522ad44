//! Search volume, cache efficiency, latency and error counters, plus the
//! process's current resource use.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::search::resources::{ResourceMonitor, SystemMetrics};

#[derive(Debug, Clone)]
struct Counters {
    total_searches: u64,
    cache_hits: u64,
    cache_misses: u64,
    errors: u64,
    rate_limited_requests: u64,
    total_search_time: Duration,
    last_reset: DateTime<Utc>,
}

impl Counters {
    fn zeroed() -> Self {
        Self {
            total_searches: 0,
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
            rate_limited_requests: 0,
            total_search_time: Duration::ZERO,
            last_reset: Utc::now(),
        }
    }
}

/// Point-in-time view of the counters with derived rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_searches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub rate_limited_requests: u64,
    pub total_search_time_ms: f64,
    /// 0 when no search has completed
    pub avg_search_time_ms: f64,
    /// 0 when no search has completed
    pub cache_hit_rate: f64,
    pub uptime_secs: f64,
    pub last_reset: DateTime<Utc>,
    pub system: SystemMetrics,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Searches:        {}", self.total_searches)?;
        writeln!(
            f,
            "Cache hits:      {} ({:.1}%)",
            self.cache_hits,
            self.cache_hit_rate * 100.0
        )?;
        writeln!(f, "Cache misses:    {}", self.cache_misses)?;
        writeln!(f, "Errors:          {}", self.errors)?;
        writeln!(f, "Rate limited:    {}", self.rate_limited_requests)?;
        writeln!(f, "Avg latency:     {:.2}ms", self.avg_search_time_ms)?;
        writeln!(f, "CPU:             {:.1}%", self.system.cpu_percent)?;
        writeln!(
            f,
            "Memory:          {:.1}MB ({:.2}% of host)",
            self.system.memory_usage_mb, self.system.process_memory_percent
        )?;
        write!(f, "Uptime:          {:.0}s", self.uptime_secs)
    }
}

/// Thread-safe search metrics.
///
/// Completed searches (hits and misses) count toward `total_searches` and
/// latency; errors and rate-limit rejections are counted separately.
#[derive(Debug)]
pub struct SearchMetrics {
    started: Instant,
    counters: Mutex<Counters>,
    resources: ResourceMonitor,
}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters::zeroed()),
            resources: ResourceMonitor::new(),
        }
    }

    pub fn record_cache_hit(&self, elapsed: Duration) {
        self.record_search(true, elapsed);
    }

    pub fn record_cache_miss(&self, elapsed: Duration) {
        self.record_search(false, elapsed);
    }

    fn record_search(&self, cache_hit: bool, elapsed: Duration) {
        let mut counters = self.counters.lock();
        counters.total_searches += 1;
        counters.total_search_time += elapsed;
        if cache_hit {
            counters.cache_hits += 1;
        } else {
            counters.cache_misses += 1;
        }
        drop(counters);
        tracing::debug!(cache_hit, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "search recorded");
    }

    pub fn record_error(&self) {
        self.counters.lock().errors += 1;
    }

    pub fn record_rate_limited(&self) {
        self.counters.lock().rate_limited_requests += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().clone();
        self.derive(&counters)
    }

    /// Zeros every counter and returns the values from just before.
    pub fn reset(&self) -> MetricsSnapshot {
        let previous = {
            let mut counters = self.counters.lock();
            std::mem::replace(&mut *counters, Counters::zeroed())
        };
        tracing::info!("metrics reset");
        self.derive(&previous)
    }

    fn derive(&self, c: &Counters) -> MetricsSnapshot {
        let total_ms = c.total_search_time.as_secs_f64() * 1000.0;
        let (avg, hit_rate) = if c.total_searches > 0 {
            (
                total_ms / c.total_searches as f64,
                c.cache_hits as f64 / c.total_searches as f64,
            )
        } else {
            (0.0, 0.0)
        };

        MetricsSnapshot {
            total_searches: c.total_searches,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            errors: c.errors,
            rate_limited_requests: c.rate_limited_requests,
            total_search_time_ms: total_ms,
            avg_search_time_ms: avg,
            cache_hit_rate: hit_rate,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            last_reset: c.last_reset,
            system: self.resources.sample(),
        }
    }
}

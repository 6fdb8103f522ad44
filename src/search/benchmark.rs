//! Query-suite benchmark over a loaded service.

use std::time::Instant;

use serde::Serialize;

use crate::indexing::validate_knowledge_base;
use crate::search::SearchService;
use crate::search::resources::{ResourceMonitor, SystemInfo};

/// Agricultural questions used when no query file is given.
pub const DEFAULT_BENCHMARK_QUERIES: &[&str] = &[
    "What are the best practices for crop rotation?",
    "How to manage pest control in organic farming?",
    "What fertilizers are recommended for wheat cultivation?",
    "How to improve soil health naturally?",
    "What are the signs of nutrient deficiency in plants?",
    "Best irrigation techniques for water conservation",
    "How to prevent crop diseases during monsoon?",
    "Organic farming methods for sustainable agriculture",
    "What are the benefits of companion planting?",
    "How to increase crop yield without chemicals?",
];

const SLOW_AVERAGE_MS: f64 = 100.0;
const SLOW_P95_MS: f64 = 500.0;
const LOW_RELEVANCE: f64 = 0.5;
const SMALL_INDEX: usize = 100;
const HIGH_MEMORY_MB: f64 = 100.0;

#[derive(Debug, Clone, Serialize)]
pub struct QueryMeasurement {
    pub query: String,
    pub latency_ms: f64,
    pub result_count: usize,
    /// Mean score of the returned hits, 0 when none
    pub relevance: f64,
    /// Change in resident process memory across the query
    pub memory_delta_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryFailure {
    pub query: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelevanceSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub k: usize,
    pub index_size: usize,
    /// Suite queries answered from the service's cache
    pub cache_hits: u64,
    /// `None` when every query failed
    pub latency: Option<LatencySummary>,
    pub relevance: Option<RelevanceSummary>,
    pub avg_memory_usage_mb: Option<f64>,
    pub system: SystemInfo,
    pub measurements: Vec<QueryMeasurement>,
    pub failures: Vec<QueryFailure>,
    pub recommendations: Vec<String>,
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Queries:     {} ({} ok, {} failed)",
            self.total_queries, self.successful_queries, self.failed_queries
        )?;
        writeln!(f, "Index size:  {}", self.index_size)?;
        writeln!(f, "Cache hits:  {}", self.cache_hits)?;
        writeln!(
            f,
            "Host:        {} CPUs, {:.1}GB memory",
            self.system.cpu_count, self.system.memory_total_gb
        )?;
        if let Some(latency) = &self.latency {
            writeln!(
                f,
                "Latency:     avg {:.2}ms  min {:.2}ms  max {:.2}ms  p95 {:.2}ms",
                latency.avg_ms, latency.min_ms, latency.max_ms, latency.p95_ms
            )?;
        }
        if let Some(relevance) = &self.relevance {
            writeln!(
                f,
                "Relevance:   avg {:.3}  min {:.3}  max {:.3}",
                relevance.avg, relevance.min, relevance.max
            )?;
        }
        if let Some(memory) = self.avg_memory_usage_mb {
            writeln!(f, "Memory:      avg {memory:.2}MB per query")?;
        }
        for failure in &self.failures {
            writeln!(f, "Failed:      {} ({})", failure.query, failure.error)?;
        }
        if self.recommendations.is_empty() {
            write!(f, "No recommendations")
        } else {
            write!(f, "Recommendations:")?;
            for recommendation in &self.recommendations {
                write!(f, "\n  - {recommendation}")?;
            }
            Ok(())
        }
    }
}

/// Runs each query once through `service` and summarizes the outcome.
///
/// Queries use their own caller ids so the suite is never throttled by
/// the service's rate limit.
///
/// The suite runs against the live service. Its searches count toward the
/// service metrics and fill its cache. Each `benchmark-{i}` caller keeps a
/// rate window until purged as idle. A query already cached is timed as a
/// cache hit; `cache_hits` in the report says how many were.
pub fn run_benchmark<S: AsRef<str>>(
    service: &SearchService,
    queries: &[S],
    k: usize,
) -> BenchmarkReport {
    run_benchmark_with_progress(service, queries, k, |_| {})
}

/// Like [`run_benchmark`], calling `on_query` with the number of queries
/// finished so far.
pub fn run_benchmark_with_progress<S, F>(
    service: &SearchService,
    queries: &[S],
    k: usize,
    mut on_query: F,
) -> BenchmarkReport
where
    S: AsRef<str>,
    F: FnMut(usize),
{
    tracing::info!(queries = queries.len(), k, "running benchmark suite");

    let monitor = ResourceMonitor::new();
    let hits_before = service.metrics().cache_hits;
    let mut measurements = Vec::with_capacity(queries.len());
    let mut failures = Vec::new();

    for (i, query) in queries.iter().enumerate() {
        let query = query.as_ref();
        let caller_id = format!("benchmark-{i}");
        let memory_before = monitor.process_memory_mb();
        let started = Instant::now();

        match service.search(query, k, &caller_id) {
            Ok(hits) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let memory_delta_mb = monitor.process_memory_mb() - memory_before;
                let relevance = if hits.is_empty() {
                    0.0
                } else {
                    hits.iter().map(|h| h.score.get() as f64).sum::<f64>() / hits.len() as f64
                };
                tracing::debug!(query, latency_ms, hits = hits.len(), "benchmark query");
                measurements.push(QueryMeasurement {
                    query: query.to_string(),
                    latency_ms,
                    result_count: hits.len(),
                    relevance,
                    memory_delta_mb,
                });
            }
            Err(e) => {
                tracing::error!(query, error = %e, "benchmark query failed");
                failures.push(QueryFailure {
                    query: query.to_string(),
                    error: e.to_string(),
                });
            }
        }
        on_query(i + 1);
    }

    let latency = summarize_latency(&measurements);
    let relevance = summarize_relevance(&measurements);
    let avg_memory_usage_mb = average_memory(&measurements);
    let index_size = service.knowledge_base().len();
    let cache_hits = service.metrics().cache_hits.saturating_sub(hits_before);

    let mut recommendations = recommend(
        latency.as_ref(),
        relevance.as_ref(),
        avg_memory_usage_mb,
        index_size,
    );
    for issue in validate_knowledge_base(service.knowledge_base()).issues {
        recommendations.push(format!("Integrity issue: {issue}"));
    }

    BenchmarkReport {
        total_queries: queries.len(),
        successful_queries: measurements.len(),
        failed_queries: failures.len(),
        k,
        index_size,
        cache_hits,
        latency,
        relevance,
        avg_memory_usage_mb,
        system: monitor.system_info(),
        measurements,
        failures,
        recommendations,
    }
}

fn recommend(
    latency: Option<&LatencySummary>,
    relevance: Option<&RelevanceSummary>,
    avg_memory_mb: Option<f64>,
    index_size: usize,
) -> Vec<String> {
    let mut recommendations = Vec::new();
    if let Some(latency) = latency {
        if latency.avg_ms > SLOW_AVERAGE_MS {
            recommendations.push(format!(
                "Average search time is {:.1}ms; consider an inverted-file index or fewer probes",
                latency.avg_ms
            ));
        }
        if latency.p95_ms > SLOW_P95_MS {
            recommendations.push(format!(
                "p95 search time is {:.1}ms; enable caching for repeated queries",
                latency.p95_ms
            ));
        }
    }
    if let Some(avg) = relevance.map(|r| r.avg).filter(|avg| *avg < LOW_RELEVANCE) {
        recommendations.push(format!(
            "Average relevance is {avg:.3}; consider a stronger embedding model or smaller chunks"
        ));
    }
    if let Some(memory) = avg_memory_mb.filter(|mb| *mb > HIGH_MEMORY_MB) {
        recommendations.push(format!(
            "Queries grow memory by {memory:.1}MB on average; embed in smaller batches or stream large query sets"
        ));
    }
    if index_size < SMALL_INDEX {
        recommendations.push(format!(
            "Index holds only {index_size} vectors; add more records to the knowledge base"
        ));
    }
    recommendations
}

fn average_memory(measurements: &[QueryMeasurement]) -> Option<f64> {
    if measurements.is_empty() {
        return None;
    }
    Some(measurements.iter().map(|m| m.memory_delta_mb).sum::<f64>() / measurements.len() as f64)
}

fn summarize_latency(measurements: &[QueryMeasurement]) -> Option<LatencySummary> {
    if measurements.is_empty() {
        return None;
    }
    let mut latencies: Vec<f64> = measurements.iter().map(|m| m.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);

    Some(LatencySummary {
        avg_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
        min_ms: latencies[0],
        max_ms: latencies[latencies.len() - 1],
        p95_ms: percentile(&latencies, 0.95),
    })
}

fn summarize_relevance(measurements: &[QueryMeasurement]) -> Option<RelevanceSummary> {
    if measurements.is_empty() {
        return None;
    }
    let values = measurements.iter().map(|m| m.relevance);
    Some(RelevanceSummary {
        avg: values.clone().sum::<f64>() / measurements.len() as f64,
        min: values.clone().fold(f64::INFINITY, f64::min),
        max: values.fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Linear interpolation between closest ranks. `sorted` must be non-empty
/// and ascending.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

//! Cost and metrics tracking.
//!
//! Counts remote operations and cache outcomes across the engine and derives
//! an estimated spend plus a static list of tuning recommendations. Strictly
//! observational: nothing in here ever alters control flow.

use intake_config::CostConfig;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared operation counters.
///
/// All methods are `&self`; the tracker is designed to be held in an `Arc`
/// and poked from every component.
#[derive(Debug, Default)]
pub struct CostTracker {
    cost: CostConfig,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    batch_commits: AtomicU64,
    failed_commits: AtomicU64,
}

impl CostTracker {
    pub fn new(cost: CostConfig) -> Self {
        Self { cost, ..Default::default() }
    }

    pub fn record_reads(&self, n: u64) {
        self.reads.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_writes(&self, n: u64) {
        self.writes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, n: u64) {
        self.deletes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_commit(&self) {
        self.batch_commits.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch exhausted its retry budget. This is the only place terminal
    /// batch failures surface; `enqueue` is fire-and-forget by contract.
    pub fn record_failed_commit(&self) {
        self.failed_commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot with derived figures.
    pub fn snapshot(&self) -> CostMetrics {
        let reads = self.reads.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let deletes = self.deletes.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let batch_commits = self.batch_commits.load(Ordering::Relaxed);
        let failed_commits = self.failed_commits.load(Ordering::Relaxed);

        let lookups = cache_hits + cache_misses;
        let cache_hit_rate = (lookups > 0).then(|| cache_hits as f64 / lookups as f64);
        let estimated_cost = reads as f64 * self.cost.read_unit
            + writes as f64 * self.cost.write_unit
            + deletes as f64 * self.cost.delete_unit;

        let mut metrics = CostMetrics {
            reads,
            writes,
            deletes,
            cache_hits,
            cache_misses,
            batch_commits,
            failed_commits,
            estimated_cost,
            cache_hit_rate,
            recommendations: Vec::new(),
        };
        metrics.recommendations = recommend(&metrics);
        metrics
    }
}

/// Snapshot of counters plus derived cost and advice.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMetrics {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub batch_commits: u64,
    pub failed_commits: u64,
    /// Linear estimate from per-operation unit costs.
    pub estimated_cost: f64,
    /// `None` until at least one cache lookup has happened.
    pub cache_hit_rate: Option<f64>,
    pub recommendations: Vec<String>,
}

// Static rule list, not a learned heuristic. Thresholds are deliberately
// coarse; this exists to nudge operators, not to tune itself.
fn recommend(metrics: &CostMetrics) -> Vec<String> {
    let mut advice = Vec::new();
    if let Some(rate) = metrics.cache_hit_rate {
        let lookups = metrics.cache_hits + metrics.cache_misses;
        if rate < 0.5 && lookups >= 20 {
            advice.push("cache hit rate below 50%: widen the query TTL or entry max age".to_string());
        }
    }
    if metrics.failed_commits > 0 {
        advice.push("batch commits are exhausting retries: check remote connectivity".to_string());
    }
    if metrics.batch_commits > 0 {
        let per_batch = (metrics.writes + metrics.deletes) as f64 / metrics.batch_commits as f64;
        if per_batch < 2.0 && metrics.batch_commits >= 10 {
            advice.push("batches average under 2 operations: widen the debounce window".to_string());
        }
    }
    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let tracker = CostTracker::new(CostConfig::default());
        tracker.record_reads(3);
        tracker.record_writes(2);
        tracker.record_deletes(1);
        tracker.record_cache_hit();
        tracker.record_cache_miss();
        tracker.record_batch_commit();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.reads, 3);
        assert_eq!(snapshot.writes, 2);
        assert_eq!(snapshot.deletes, 1);
        assert_eq!(snapshot.cache_hit_rate, Some(0.5));
        assert_eq!(snapshot.batch_commits, 1);
    }

    #[test]
    fn test_cost_is_linear_in_ops() {
        let cost = CostConfig { read_unit: 1.0, write_unit: 10.0, delete_unit: 100.0 };
        let tracker = CostTracker::new(cost);
        tracker.record_reads(2);
        tracker.record_writes(3);
        tracker.record_deletes(4);
        assert_eq!(tracker.snapshot().estimated_cost, 2.0 + 30.0 + 400.0);
    }

    #[test]
    fn test_hit_rate_none_without_lookups() {
        let tracker = CostTracker::new(CostConfig::default());
        assert_eq!(tracker.snapshot().cache_hit_rate, None);
    }

    #[test]
    fn test_low_hit_rate_recommendation() {
        let tracker = CostTracker::new(CostConfig::default());
        for _ in 0..5 {
            tracker.record_cache_hit();
        }
        for _ in 0..15 {
            tracker.record_cache_miss();
        }
        let snapshot = tracker.snapshot();
        assert!(snapshot.recommendations.iter().any(|r| r.contains("hit rate below 50%")));
    }

    #[test]
    fn test_failed_commit_recommendation() {
        let tracker = CostTracker::new(CostConfig::default());
        tracker.record_failed_commit();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.failed_commits, 1);
        assert!(snapshot.recommendations.iter().any(|r| r.contains("exhausting retries")));
    }
}

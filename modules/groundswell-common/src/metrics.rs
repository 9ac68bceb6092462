use std::collections::HashMap;
use std::sync::Mutex;

/// Per-stage call counters. Thread-safe and resettable; each process (and
/// each test) constructs its own instance.
#[derive(Default)]
pub struct Metrics {
    stages: Mutex<HashMap<String, StageCounters>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageCounters {
    pub calls: u64,
    pub errors: u64,
    pub latency_ms_total: u64,
    pub tokens_used: u64,
}

/// Snapshot row for one stage.
#[derive(Debug, Clone)]
pub struct StageStats {
    pub stage: String,
    pub calls: u64,
    pub errors: u64,
    pub avg_latency_ms: u64,
    pub tokens_used: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: &str, success: bool, latency_ms: u64, tokens_used: u32) {
        let mut stages = self.stages.lock().expect("metrics lock poisoned");
        let counters = stages.entry(stage.to_string()).or_default();
        counters.calls += 1;
        if !success {
            counters.errors += 1;
        }
        counters.latency_ms_total += latency_ms;
        counters.tokens_used += tokens_used as u64;
    }

    /// Stable-ordered snapshot of every stage seen so far.
    pub fn snapshot(&self) -> Vec<StageStats> {
        let stages = self.stages.lock().expect("metrics lock poisoned");
        let mut rows: Vec<StageStats> = stages
            .iter()
            .map(|(stage, c)| StageStats {
                stage: stage.clone(),
                calls: c.calls,
                errors: c.errors,
                avg_latency_ms: if c.calls > 0 { c.latency_ms_total / c.calls } else { 0 },
                tokens_used: c.tokens_used,
            })
            .collect();
        rows.sort_by(|a, b| a.stage.cmp(&b.stage));
        rows
    }

    pub fn reset(&self) {
        self.stages.lock().expect("metrics lock poisoned").clear();
    }

    pub fn log_summary(&self) {
        for row in self.snapshot() {
            tracing::info!(
                stage = row.stage.as_str(),
                calls = row.calls,
                errors = row.errors,
                avg_latency_ms = row.avg_latency_ms,
                tokens = row.tokens_used,
                "Stage metrics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_averages() {
        let metrics = Metrics::new();
        metrics.record("spam_check", true, 100, 50);
        metrics.record("spam_check", false, 300, 70);

        let rows = metrics.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].calls, 2);
        assert_eq!(rows[0].errors, 1);
        assert_eq!(rows[0].avg_latency_ms, 200);
        assert_eq!(rows[0].tokens_used, 120);
    }

    #[test]
    fn reset_clears_counters() {
        let metrics = Metrics::new();
        metrics.record("sentiment", true, 10, 5);
        metrics.reset();
        assert!(metrics.snapshot().is_empty());
    }

    #[test]
    fn snapshot_is_sorted_by_stage() {
        let metrics = Metrics::new();
        metrics.record("validity", true, 1, 0);
        metrics.record("classification", true, 1, 0);
        let rows = metrics.snapshot();
        assert_eq!(rows[0].stage, "classification");
        assert_eq!(rows[1].stage, "validity");
    }
}

//! Metric sink
//!
//! One [`MetricSink`] is created per run and shared by reference with every
//! virtual user and, once the run has drained, with the reporter. Samples are
//! append-only; aggregates are computed on demand from everything recorded
//! under a name.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

// ============================================================================
// METRIC NAMES
// ============================================================================

/// Built-in request metrics, recorded for every GET
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";

/// Driver metrics
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_FAULTS: &str = "iteration_faults";
pub const VUS: &str = "vus";

/// Classification metrics
pub const STATUS_CODES: &str = "status_codes";
pub const SUCCESSFUL_REQUESTS: &str = "successful_requests";
pub const ERROR_REQUESTS: &str = "error_requests";
pub const RATE_LIMIT_429: &str = "rate_limit_429";
pub const CIRCUIT_BREAKER_503: &str = "circuit_breaker_503";
pub const ERROR_RATE: &str = "error_rate";
pub const DEGRADED_RATE: &str = "degraded_rate";
pub const UNSUCCESSFUL_RATE: &str = "unsuccessful_rate";
pub const CHECKS: &str = "checks";

// ============================================================================
// SAMPLES
// ============================================================================

/// Metric kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative sum of added values
    Counter,
    /// Stream of observations summarised by avg/min/max/percentiles
    Trend,
    /// Fraction of non-zero observations
    Rate,
}

/// Sample tags, ordered for stable output
pub type Tags = BTreeMap<String, String>;

/// A single recorded observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
    /// Milliseconds since the sink was created
    pub elapsed_ms: u64,
}

// ============================================================================
// AGGREGATES
// ============================================================================

/// Aggregate view over the samples of one metric
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    kind: MetricKind,
    /// Sample values, ascending
    sorted: Vec<f64>,
    sum: f64,
}

impl Aggregate {
    fn from_values(kind: MetricKind, mut values: Vec<f64>) -> Self {
        values.sort_by(f64::total_cmp);
        let sum = values.iter().sum();
        Self {
            kind,
            sorted: values,
            sum,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Number of samples recorded
    pub fn samples(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Counter total for counters; number of observations otherwise
    pub fn count(&self) -> f64 {
        match self.kind {
            MetricKind::Counter => self.sum,
            MetricKind::Trend | MetricKind::Rate => self.sorted.len() as f64,
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> Option<f64> {
        if self.sorted.is_empty() {
            None
        } else {
            Some(self.sum / self.sorted.len() as f64)
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Percentile `p` in `[0, 100]`, interpolated linearly between ranks.
    /// Exact over every retained sample; the snapshot keeps them all anyway.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.sorted.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(self.sorted[0]);
        }

        let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let low = self.sorted[lower];
        let high = self.sorted[upper];
        Some(low + (high - low) * (rank - lower as f64))
    }

    /// Non-zero observations
    pub fn passes(&self) -> usize {
        self.sorted.iter().filter(|v| **v != 0.0).count()
    }

    /// Zero observations
    pub fn fails(&self) -> usize {
        self.sorted.len() - self.passes()
    }

    /// Fraction of non-zero observations
    pub fn rate(&self) -> Option<f64> {
        if self.sorted.is_empty() {
            None
        } else {
            Some(self.passes() as f64 / self.sorted.len() as f64)
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

#[derive(Debug, Default)]
struct SinkInner {
    samples: Vec<MetricSample>,
    kinds: BTreeMap<String, MetricKind>,
}

/// Append-only, thread-safe metric collector
#[derive(Debug)]
pub struct MetricSink {
    started: Instant,
    inner: RwLock<SinkInner>,
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: RwLock::new(SinkInner::default()),
        }
    }

    /// Record a sample.
    ///
    /// A name keeps the kind it was first recorded with; a sample of a
    /// different kind under the same name is dropped.
    pub fn record(&self, name: &str, kind: MetricKind, value: f64, tags: &[(&str, &str)]) {
        let sample = MetricSample {
            name: name.to_string(),
            kind,
            value,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };

        let mut inner = self.inner.write();
        let registered = *inner.kinds.entry(name.to_string()).or_insert(kind);
        if registered != kind {
            warn!(
                metric = name,
                ?registered,
                ?kind,
                "Dropping sample recorded with mismatched kind"
            );
            return;
        }
        inner.samples.push(sample);
    }

    pub fn add_counter(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.record(name, MetricKind::Counter, value, tags);
    }

    pub fn add_trend(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.record(name, MetricKind::Trend, value, tags);
    }

    pub fn add_rate(&self, name: &str, hit: bool, tags: &[(&str, &str)]) {
        self.record(name, MetricKind::Rate, if hit { 1.0 } else { 0.0 }, tags);
    }

    /// Aggregate of every sample under `name`; `None` if never recorded
    pub fn aggregate(&self, name: &str) -> Option<Aggregate> {
        self.collect(name, |_| true)
    }

    /// Aggregate of the samples under `name` carrying `tag=value`
    pub fn aggregate_where(&self, name: &str, tag: &str, value: &str) -> Option<Aggregate> {
        self.collect(name, |sample| {
            sample.tags.get(tag).map(String::as_str) == Some(value)
        })
    }

    fn collect<F>(&self, name: &str, filter: F) -> Option<Aggregate>
    where
        F: Fn(&MetricSample) -> bool,
    {
        let inner = self.inner.read();
        let kind = *inner.kinds.get(name)?;
        let values = inner
            .samples
            .iter()
            .filter(|s| s.name == name && filter(s))
            .map(|s| s.value)
            .collect();
        Some(Aggregate::from_values(kind, values))
    }

    /// Registered metric names with their kinds, sorted by name
    pub fn metrics(&self) -> Vec<(String, MetricKind)> {
        self.inner
            .read()
            .kinds
            .iter()
            .map(|(name, kind)| (name.clone(), *kind))
            .collect()
    }

    /// Distinct values of `tag` under `name`, sorted
    pub fn tag_values(&self, name: &str, tag: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut values: Vec<String> = inner
            .samples
            .iter()
            .filter(|s| s.name == name)
            .filter_map(|s| s.tags.get(tag).cloned())
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Copy of every recorded sample in recording order
    pub fn samples(&self) -> Vec<MetricSample> {
        self.inner.read().samples.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Summary reporting
//!
//! [`render`] reads the sink once, after the driver has drained, and produces
//! both the console text and the structured snapshot written as the result
//! artifact. It is pure: the same sink and run metadata always yield the same
//! snapshot.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::driver::RunStats;
use crate::error::Result;
use crate::metrics::{self, Aggregate, MetricKind, MetricSample, MetricSink};
use crate::profiles::Profile;
use crate::scenario::Format;
use crate::threshold::{Threshold, ThresholdOutcome};

/// Shown in place of a per-format mean with no samples
pub const NOT_AVAILABLE: &str = "N/A";

/// Prefix for Prometheus metric names
pub const PROMETHEUS_PREFIX: &str = "documentos_loadtest";

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub vus_max: u32,
    pub vus_spawned: u64,
}

impl From<&RunStats> for RunMetadata {
    fn from(stats: &RunStats) -> Self {
        Self {
            started_at: stats.started_at,
            elapsed_secs: stats.elapsed.as_secs_f64(),
            vus_max: stats.vus_max,
            vus_spawned: stats.vus_spawned,
        }
    }
}

/// Aggregate values of one metric, keyed by statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub kind: MetricKind,
    pub values: BTreeMap<String, f64>,
}

impl MetricSummary {
    fn from_aggregate(aggregate: &Aggregate, elapsed_secs: f64) -> Self {
        Self::build(aggregate.kind(), Some(aggregate), elapsed_secs)
    }

    /// Summary of a declared metric that received no samples: every value 0
    pub fn zeroed(kind: MetricKind) -> Self {
        Self::build(kind, None, 0.0)
    }

    fn build(kind: MetricKind, aggregate: Option<&Aggregate>, elapsed_secs: f64) -> Self {
        let stat = |read: fn(&Aggregate) -> Option<f64>| aggregate.and_then(read).unwrap_or(0.0);
        let mut values = BTreeMap::new();
        match kind {
            MetricKind::Counter => {
                let count = aggregate.map(Aggregate::count).unwrap_or(0.0);
                let rate = if elapsed_secs > 0.0 { count / elapsed_secs } else { 0.0 };
                values.insert("count".to_string(), count);
                values.insert("rate".to_string(), rate);
            }
            MetricKind::Trend => {
                let stats = [
                    ("avg", stat(Aggregate::avg)),
                    ("min", stat(Aggregate::min)),
                    ("med", stat(Aggregate::median)),
                    ("max", stat(Aggregate::max)),
                    ("p(90)", stat(|a: &Aggregate| a.percentile(90.0))),
                    ("p(95)", stat(|a: &Aggregate| a.percentile(95.0))),
                    ("p(99)", stat(|a: &Aggregate| a.percentile(99.0))),
                ];
                for (name, value) in stats {
                    values.insert(name.to_string(), value);
                }
            }
            MetricKind::Rate => {
                let passes = aggregate.map(Aggregate::passes).unwrap_or(0);
                let fails = aggregate.map(Aggregate::fails).unwrap_or(0);
                values.insert("rate".to_string(), stat(Aggregate::rate));
                values.insert("passes".to_string(), passes as f64);
                values.insert("fails".to_string(), fails as f64);
            }
        }
        Self { kind, values }
    }

    pub fn value(&self, stat: &str) -> Option<f64> {
        self.values.get(stat).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub passes: usize,
    pub fails: usize,
}

/// Structured dump of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub profile: Profile,
    pub run: RunMetadata,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub verdict: Verdict,
    pub samples: Vec<MetricSample>,
}

impl SummarySnapshot {
    /// Statistic of a metric; `None` if the metric was never recorded
    pub fn value(&self, metric: &str, stat: &str) -> Option<f64> {
        self.metrics.get(metric).and_then(|m| m.value(stat))
    }

    /// Counter total, 0 when absent
    pub fn count(&self, metric: &str) -> f64 {
        self.value(metric, "count").unwrap_or(0.0)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Console text plus the structured snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub text: String,
    pub snapshot: SummarySnapshot,
}

// ============================================================================
// RENDERING
// ============================================================================

/// Build the report for a drained run
pub fn render(
    profile: Profile,
    sink: &MetricSink,
    run: &RunMetadata,
    thresholds: &[Threshold],
) -> SummaryReport {
    // Declared metrics are always present so the snapshot keeps one shape
    let mut summaries: BTreeMap<String, MetricSummary> = profile
        .declared_metrics()
        .into_iter()
        .map(|(name, kind)| (name.to_string(), MetricSummary::zeroed(kind)))
        .collect();
    for (name, _) in sink.metrics() {
        if let Some(aggregate) = sink.aggregate(&name) {
            summaries.insert(name, MetricSummary::from_aggregate(&aggregate, run.elapsed_secs));
        }
    }

    let checks = sink
        .tag_values(metrics::CHECKS, "check")
        .into_iter()
        .filter_map(|name| {
            sink.aggregate_where(metrics::CHECKS, "check", &name)
                .map(|aggregate| {
                    let summary = CheckSummary {
                        passes: aggregate.passes(),
                        fails: aggregate.fails(),
                    };
                    (name, summary)
                })
        })
        .collect();

    let thresholds: Vec<ThresholdOutcome> =
        thresholds.iter().map(|t| t.evaluate(sink)).collect();

    let mut snapshot = SummarySnapshot {
        profile,
        run: run.clone(),
        metrics: summaries,
        checks,
        thresholds,
        verdict: Verdict::Failed,
        samples: sink.samples(),
    };
    snapshot.verdict = verdict(&snapshot);

    let format_means: Vec<(Format, Option<f64>)> = Format::ALL
        .iter()
        .map(|f| (*f, sink.aggregate(f.duration_metric()).and_then(|a| a.avg())))
        .collect();

    let text = render_text(&snapshot, &format_means);
    SummaryReport { text, snapshot }
}

/// Every threshold must pass; smoke additionally needs every request to
/// have succeeded.
fn verdict(snapshot: &SummarySnapshot) -> Verdict {
    let thresholds_pass = snapshot.thresholds.iter().all(|t| t.passed);
    let profile_pass = match snapshot.profile {
        Profile::Smoke => {
            let total = snapshot.count(metrics::HTTP_REQS);
            total > 0.0 && snapshot.count(metrics::SUCCESSFUL_REQUESTS) == total
        }
        Profile::Load | Profile::Spike => true,
    };
    if thresholds_pass && profile_pass {
        Verdict::Passed
    } else {
        Verdict::Failed
    }
}

fn percent(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// `http_req_duration` percentiles, 0 when nothing was recorded
fn write_latency(out: &mut String, duration: &dyn Fn(&str) -> f64) {
    let _ = writeln!(out, "\n--- Latency ---");
    let _ = writeln!(out, "p50:  {:.2}ms", duration("med"));
    let _ = writeln!(out, "p95:  {:.2}ms", duration("p(95)"));
    let _ = writeln!(out, "p99:  {:.2}ms", duration("p(99)"));
}

fn render_text(snapshot: &SummarySnapshot, format_means: &[(Format, Option<f64>)]) -> String {
    let mut out = String::new();
    let total = snapshot.count(metrics::HTTP_REQS);
    let successful = snapshot.count(metrics::SUCCESSFUL_REQUESTS);
    let errors = snapshot.count(metrics::ERROR_REQUESTS);
    let duration = |stat: &str| snapshot.value(metrics::HTTP_REQ_DURATION, stat).unwrap_or(0.0);

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "═══════════════ {} TEST SUMMARY ═══════════════",
        snapshot.profile.label()
    );

    match snapshot.profile {
        Profile::Smoke => {
            let _ = writeln!(out, "Total Requests:   {}", total);
            let _ = writeln!(
                out,
                "Successful:       {} ({:.2}%)",
                successful,
                percent(successful, total)
            );
            let _ = writeln!(out, "Errors:           {} ({:.2}%)", errors, percent(errors, total));
            let _ = writeln!(out, "Avg Duration:     {:.2}ms", duration("avg"));
            write_latency(&mut out, &duration);
        }
        Profile::Load => {
            let rate = |name: &str| snapshot.value(name, "rate").unwrap_or(0.0) * 100.0;
            let _ = writeln!(out, "Total Requests:     {}", total);
            let _ = writeln!(out, "Successful (200):   {}", successful);
            let _ = writeln!(out, "Errors:             {}", errors);
            let _ = writeln!(out, "Error Rate:         {:.2}%", rate(metrics::ERROR_RATE));
            let _ = writeln!(out, "Degraded (429/503): {:.2}%", rate(metrics::DEGRADED_RATE));
            let _ = writeln!(out, "Unsuccessful:       {:.2}%", rate(metrics::UNSUCCESSFUL_RATE));
            write_latency(&mut out, &duration);
            let _ = writeln!(out, "\n--- Per Format ---");
            for (format, mean) in format_means {
                let label = format!("{} avg:", format.as_str().to_uppercase());
                match mean {
                    Some(ms) => {
                        let _ = writeln!(out, "{:<10}{:.2}ms", label, ms);
                    }
                    None => {
                        let _ = writeln!(out, "{:<10}{}", label, NOT_AVAILABLE);
                    }
                }
            }
        }
        Profile::Spike => {
            let rate_limited = snapshot.count(metrics::RATE_LIMIT_429);
            let circuit_broken = snapshot.count(metrics::CIRCUIT_BREAKER_503);
            let _ = writeln!(out, "Total Requests:        {}", total);
            let _ = writeln!(
                out,
                "Successful (200):      {} ({:.2}%)",
                successful,
                percent(successful, total)
            );
            let _ = writeln!(
                out,
                "Rate Limit (429):      {} ({:.2}%)",
                rate_limited,
                percent(rate_limited, total)
            );
            let _ = writeln!(
                out,
                "Circuit Breaker (503): {} ({:.2}%)",
                circuit_broken,
                percent(circuit_broken, total)
            );
            let _ = writeln!(
                out,
                "Other Errors:          {}",
                (errors - rate_limited - circuit_broken).max(0.0)
            );
            write_latency(&mut out, &duration);
        }
    }

    if !snapshot.checks.is_empty() {
        let _ = writeln!(out, "\n--- Checks ---");
        for (name, check) in &snapshot.checks {
            let mark = if check.fails == 0 { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "{} {} ({}/{})",
                mark,
                name,
                check.passes,
                check.passes + check.fails
            );
        }
    }

    if !snapshot.thresholds.is_empty() {
        let _ = writeln!(out, "\n--- Thresholds ---");
        for threshold in &snapshot.thresholds {
            let status = if threshold.passed { "✅ PASS" } else { "❌ FAIL" };
            let _ = writeln!(
                out,
                "{} {} {} (actual {:.2})",
                status, threshold.metric, threshold.expression, threshold.actual
            );
        }
    }

    let mark = if snapshot.verdict.passed() { "✅" } else { "❌" };
    let _ = writeln!(
        out,
        "\n{} {} TEST {}",
        mark,
        snapshot.profile.label(),
        snapshot.verdict.as_str()
    );
    let _ = writeln!(out, "═══════════════════════════════════════════════════");
    out
}

// ============================================================================
// ARTIFACTS
// ============================================================================

/// Write the snapshot as pretty JSON to the profile's artifact path
pub fn write_artifact(snapshot: &SummarySnapshot, results_dir: &Path) -> Result<PathBuf> {
    let path = results_dir.join(snapshot.profile.artifact_path());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, snapshot.to_json_pretty()?)?;
    info!("Results saved to {}", path.display());
    Ok(path)
}

/// Write the Prometheus exposition next to the JSON artifact
pub fn write_prometheus(snapshot: &SummarySnapshot, results_dir: &Path) -> Result<PathBuf> {
    let path = results_dir
        .join(snapshot.profile.artifact_path())
        .with_extension("prom");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, prometheus_text(snapshot)?)?;
    info!("Prometheus metrics saved to {}", path.display());
    Ok(path)
}

/// Render final aggregates in the Prometheus text format
pub fn prometheus_text(snapshot: &SummarySnapshot) -> Result<String> {
    let registry = Registry::new();

    for (name, summary) in &snapshot.metrics {
        let metric_name = format!("{}_{}", PROMETHEUS_PREFIX, name);
        match summary.kind {
            MetricKind::Counter => {
                let counter =
                    prometheus::Counter::new(metric_name, format!("Total of {}", name))?;
                counter.inc_by(summary.value("count").unwrap_or(0.0).max(0.0));
                registry.register(Box::new(counter))?;
            }
            MetricKind::Trend => {
                let gauge = GaugeVec::new(
                    Opts::new(metric_name, format!("Trend statistics of {}", name)),
                    &["stat"],
                )?;
                for (stat, value) in &summary.values {
                    gauge.with_label_values(&[stat.as_str()]).set(*value);
                }
                registry.register(Box::new(gauge))?;
            }
            MetricKind::Rate => {
                let gauge = Gauge::new(metric_name, format!("Rate of {}", name))?;
                gauge.set(summary.value("rate").unwrap_or(0.0));
                registry.register(Box::new(gauge))?;
            }
        }
    }

    let thresholds = GaugeVec::new(
        Opts::new(
            format!("{}_threshold_passed", PROMETHEUS_PREFIX),
            "1 if the threshold held",
        ),
        &["metric", "expression"],
    )?;
    for outcome in &snapshot.thresholds {
        thresholds
            .with_label_values(&[outcome.metric.as_str(), outcome.expression.as_str()])
            .set(if outcome.passed { 1.0 } else { 0.0 });
    }
    registry.register(Box::new(thresholds))?;

    let verdict = Gauge::new(
        format!("{}_verdict_passed", PROMETHEUS_PREFIX),
        "1 if the run passed",
    )?;
    verdict.set(if snapshot.verdict.passed() { 1.0 } else { 0.0 });
    registry.register(Box::new(verdict))?;

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

//! Pass/fail thresholds over final aggregates
//!
//! Expressions use the `stat op limit` form: `p(95)<2000`, `rate<0.1`,
//! `count>100`. Thresholds are evaluated once, after the run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};
use crate::metrics::{Aggregate, MetricSink};

/// Aggregate statistic a threshold reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Statistic {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "count" => Some(Self::Count),
            "rate" => Some(Self::Rate),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "med" => Some(Self::Med),
            _ => {
                let p: f64 = text.strip_prefix("p(")?.strip_suffix(')')?.trim().parse().ok()?;
                (0.0..=100.0).contains(&p).then_some(Self::Percentile(p))
            }
        }
    }

    /// Value of this statistic; 0 when the metric has no samples
    pub fn read(&self, aggregate: Option<&Aggregate>) -> f64 {
        let Some(aggregate) = aggregate else {
            return 0.0;
        };
        let value = match self {
            Self::Count => Some(aggregate.count()),
            Self::Rate => aggregate.rate(),
            Self::Avg => aggregate.avg(),
            Self::Min => aggregate.min(),
            Self::Max => aggregate.max(),
            Self::Med => aggregate.median(),
            Self::Percentile(p) => aggregate.percentile(*p),
        };
        value.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    fn holds(&self, actual: f64, limit: f64) -> bool {
        match self {
            Self::Lt => actual < limit,
            Self::Le => actual <= limit,
            Self::Gt => actual > limit,
            Self::Ge => actual >= limit,
            Self::Eq => actual == limit,
        }
    }
}

/// A parsed threshold on one metric
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expression: String,
    pub statistic: Statistic,
    pub comparison: Comparison,
    pub limit: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self> {
        let invalid = |reason: &str| LoadTestError::InvalidThreshold {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let op_start = expression
            .find(['<', '>', '='])
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let (lhs, rest) = expression.split_at(op_start);

        let (comparison, rhs) = if let Some(rhs) = rest.strip_prefix("<=") {
            (Comparison::Le, rhs)
        } else if let Some(rhs) = rest.strip_prefix(">=") {
            (Comparison::Ge, rhs)
        } else if let Some(rhs) = rest.strip_prefix("==") {
            (Comparison::Eq, rhs)
        } else if let Some(rhs) = rest.strip_prefix('<') {
            (Comparison::Lt, rhs)
        } else if let Some(rhs) = rest.strip_prefix('>') {
            (Comparison::Gt, rhs)
        } else {
            return Err(invalid("unknown comparison operator"));
        };

        let statistic =
            Statistic::parse(lhs.trim()).ok_or_else(|| invalid("unknown statistic"))?;
        let limit: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| invalid("limit is not a number"))?;

        Ok(Self {
            metric: metric.to_string(),
            expression: expression.to_string(),
            statistic,
            comparison,
            limit,
        })
    }

    pub fn evaluate(&self, sink: &MetricSink) -> ThresholdOutcome {
        let actual = self.statistic.read(sink.aggregate(&self.metric).as_ref());
        ThresholdOutcome {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            actual,
            passed: self.comparison.holds(actual, self.limit),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

/// Result of evaluating one threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub actual: f64,
    pub passed: bool,
}

/// Parse a `(metric, expression)` table
pub fn parse_all(table: &[(&str, &str)]) -> Result<Vec<Threshold>> {
    table
        .iter()
        .map(|(metric, expression)| Threshold::parse(metric, expression))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;

    #[test]
    fn test_parse_expressions() {
        let t = Threshold::parse("http_req_duration", "p(95)<2000").unwrap();
        assert_eq!(t.statistic, Statistic::Percentile(95.0));
        assert_eq!(t.comparison, Comparison::Lt);
        assert_eq!(t.limit, 2000.0);

        let t = Threshold::parse("successful_requests", "count>100").unwrap();
        assert_eq!(t.statistic, Statistic::Count);
        assert_eq!(t.comparison, Comparison::Gt);

        let t = Threshold::parse("error_rate", " rate <= 0.1 ").unwrap();
        assert_eq!(t.statistic, Statistic::Rate);
        assert_eq!(t.comparison, Comparison::Le);
        assert_eq!(t.limit, 0.1);

        let t = Threshold::parse("http_req_duration", "p(99.9)>=1").unwrap();
        assert_eq!(t.statistic, Statistic::Percentile(99.9));
        assert_eq!(t.comparison, Comparison::Ge);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for expression in ["p(95)", "p(101)<5", "mean<5", "count>lots", "count!5"] {
            assert!(
                matches!(
                    Threshold::parse("m", expression),
                    Err(LoadTestError::InvalidThreshold { .. })
                ),
                "accepted '{}'",
                expression
            );
        }
    }

    #[test]
    fn test_evaluate_against_sink() {
        let sink = MetricSink::new();
        for ms in [100.0, 200.0, 300.0] {
            sink.add_trend(metrics::HTTP_REQ_DURATION, ms, &[]);
        }
        sink.add_rate(metrics::ERROR_RATE, false, &[]);

        let p95 = Threshold::parse(metrics::HTTP_REQ_DURATION, "p(95)<2000").unwrap();
        let outcome = p95.evaluate(&sink);
        assert!(outcome.passed);
        assert!((outcome.actual - 290.0).abs() < 1e-9);

        let rate = Threshold::parse(metrics::ERROR_RATE, "rate<0.1").unwrap();
        assert!(rate.evaluate(&sink).passed);
    }

    #[test]
    fn test_missing_metric_reads_zero() {
        let sink = MetricSink::new();
        let count = Threshold::parse(metrics::SUCCESSFUL_REQUESTS, "count>50").unwrap();
        let outcome = count.evaluate(&sink);
        assert_eq!(outcome.actual, 0.0);
        assert!(!outcome.passed);

        let rate = Threshold::parse(metrics::ERROR_RATE, "rate<0.1").unwrap();
        assert!(rate.evaluate(&sink).passed);
    }
}

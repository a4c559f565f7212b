//! The three fixed traffic profiles
//!
//! Stages, thresholds and artifact paths are constants of each profile and
//! are not read from configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::{constant_vus, Stage};
use crate::error::Result;
use crate::metrics::{self, MetricKind};
use crate::scenario::{CertificateScenario, Format, Scenario, SmokeScenario};
use crate::threshold::{self, Threshold};

const SMOKE_THRESHOLDS: &[(&str, &str)] = &[
    (metrics::HTTP_REQ_DURATION, "p(95)<1000"),
    (metrics::HTTP_REQ_FAILED, "rate<0.01"),
];

const LOAD_THRESHOLDS: &[(&str, &str)] = &[
    (metrics::HTTP_REQ_DURATION, "p(95)<2000"),
    (metrics::HTTP_REQ_DURATION, "p(99)<3000"),
    (metrics::ERROR_RATE, "rate<0.1"),
    (metrics::SUCCESSFUL_REQUESTS, "count>100"),
];

const SPIKE_THRESHOLDS: &[(&str, &str)] = &[
    (metrics::HTTP_REQ_DURATION, "p(95)<3000"),
    (metrics::SUCCESSFUL_REQUESTS, "count>50"),
];

/// Metrics every profile records
const COMMON_METRICS: &[(&str, MetricKind)] = &[
    (metrics::HTTP_REQS, MetricKind::Counter),
    (metrics::HTTP_REQ_DURATION, MetricKind::Trend),
    (metrics::HTTP_REQ_FAILED, MetricKind::Rate),
    (metrics::DATA_RECEIVED, MetricKind::Counter),
    (metrics::ITERATIONS, MetricKind::Counter),
    (metrics::ITERATION_FAULTS, MetricKind::Counter),
    (metrics::VUS, MetricKind::Trend),
    (metrics::CHECKS, MetricKind::Rate),
    (metrics::STATUS_CODES, MetricKind::Trend),
    (metrics::SUCCESSFUL_REQUESTS, MetricKind::Counter),
    (metrics::ERROR_REQUESTS, MetricKind::Counter),
    (metrics::RATE_LIMIT_429, MetricKind::Counter),
    (metrics::CIRCUIT_BREAKER_503, MetricKind::Counter),
    (metrics::ERROR_RATE, MetricKind::Rate),
    (metrics::DEGRADED_RATE, MetricKind::Rate),
    (metrics::UNSUCCESSFUL_RATE, MetricKind::Rate),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// One virtual user, fixed health/pdf/docx sequence for 30s
    Smoke,
    /// Gradual ramp to 50 virtual users over 9 minutes
    Load,
    /// Sudden jump from 10 to 100 virtual users
    Spike,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Smoke, Profile::Load, Profile::Spike];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Smoke => "smoke",
            Profile::Load => "load",
            Profile::Spike => "spike",
        }
    }

    /// Upper-case name used in report headings and the verdict line
    pub fn label(&self) -> &'static str {
        match self {
            Profile::Smoke => "SMOKE",
            Profile::Load => "LOAD",
            Profile::Spike => "SPIKE",
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        match self {
            Profile::Smoke => constant_vus(1, Duration::from_secs(30)),
            Profile::Load => vec![
                Stage::secs(60, 10),
                Stage::secs(180, 30),
                Stage::secs(120, 50),
                Stage::secs(120, 30),
                Stage::secs(60, 0),
            ],
            Profile::Spike => vec![
                Stage::secs(30, 10),
                Stage::secs(10, 100),
                Stage::secs(20, 100),
                Stage::secs(10, 0),
            ],
        }
    }

    pub fn thresholds(&self) -> Result<Vec<Threshold>> {
        let table = match self {
            Profile::Smoke => SMOKE_THRESHOLDS,
            Profile::Load => LOAD_THRESHOLDS,
            Profile::Spike => SPIKE_THRESHOLDS,
        };
        threshold::parse_all(table)
    }

    /// Formats the profile requests
    pub fn formats(&self) -> &'static [Format] {
        match self {
            Profile::Smoke => &[Format::Pdf, Format::Docx],
            Profile::Load | Profile::Spike => &Format::ALL,
        }
    }

    /// Every metric that appears in this profile's snapshot, sampled or not
    pub fn declared_metrics(&self) -> Vec<(&'static str, MetricKind)> {
        let mut declared = COMMON_METRICS.to_vec();
        declared.extend(
            self.formats()
                .iter()
                .map(|format| (format.duration_metric(), MetricKind::Trend)),
        );
        declared
    }

    /// Artifact path relative to the results directory
    pub fn artifact_path(&self) -> &'static str {
        match self {
            Profile::Smoke => "performance/results/smoke-test-summary.json",
            Profile::Load => "performance/results/load-test-summary.json",
            Profile::Spike => "performance/results/spike-test-summary.json",
        }
    }

    pub fn scenario(&self, base_url: &str) -> Arc<dyn Scenario> {
        match self {
            Profile::Smoke => Arc::new(SmokeScenario::new(base_url)),
            Profile::Load => Arc::new(CertificateScenario::load(base_url)),
            Profile::Spike => Arc::new(CertificateScenario::spike(base_url)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{target_at, total_duration};

    #[test]
    fn test_all_thresholds_parse() {
        for profile in Profile::ALL {
            let thresholds = profile.thresholds().unwrap();
            assert!(!thresholds.is_empty(), "{} has no thresholds", profile);
        }
        assert_eq!(Profile::Load.thresholds().unwrap().len(), 4);
    }

    #[test]
    fn test_profile_durations() {
        assert_eq!(total_duration(&Profile::Smoke.stages()), Duration::from_secs(30));
        assert_eq!(total_duration(&Profile::Load.stages()), Duration::from_secs(540));
        assert_eq!(total_duration(&Profile::Spike.stages()), Duration::from_secs(70));
    }

    #[test]
    fn test_load_and_spike_end_at_zero() {
        for profile in [Profile::Load, Profile::Spike] {
            let stages = profile.stages();
            assert_eq!(target_at(&stages, total_duration(&stages)), 0);
        }
        let smoke = Profile::Smoke.stages();
        assert_eq!(target_at(&smoke, Duration::ZERO), 1);
    }

    #[test]
    fn test_artifact_paths_are_distinct() {
        let paths: std::collections::HashSet<_> =
            Profile::ALL.iter().map(|p| p.artifact_path()).collect();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_declared_metrics_cover_thresholds() {
        for profile in Profile::ALL {
            let declared = profile.declared_metrics();
            for threshold in profile.thresholds().unwrap() {
                assert!(
                    declared.iter().any(|(name, _)| *name == threshold.metric),
                    "{} threshold on undeclared {}",
                    profile,
                    threshold.metric
                );
            }
        }
        let smoke = Profile::Smoke.declared_metrics();
        assert!(smoke.contains(&("docx_generation_duration", MetricKind::Trend)));
        assert!(!smoke.iter().any(|(name, _)| *name == "odt_generation_duration"));
        assert!(Profile::Spike
            .declared_metrics()
            .contains(&("odt_generation_duration", MetricKind::Trend)));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Profile::Spike).unwrap(), "\"spike\"");
        assert_eq!(Profile::Load.label(), "LOAD");
    }
}

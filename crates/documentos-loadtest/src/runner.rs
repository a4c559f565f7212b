//! Profile runner: wires settings, sink, driver and reporter together

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::RunSettings;
use crate::driver::Driver;
use crate::error::Result;
use crate::http::HttpClient;
use crate::metrics::MetricSink;
use crate::profiles::Profile;
use crate::random::RandomFactory;
use crate::report::{self, RunMetadata, SummaryReport};
use crate::scenario::Scenario;
use crate::threshold::Threshold;

/// Runs one profile end to end
pub struct LoadTestRunner {
    profile: Profile,
    settings: RunSettings,
    client: Arc<dyn HttpClient>,
    scenario: Arc<dyn Scenario>,
    thresholds: Vec<Threshold>,
}

impl LoadTestRunner {
    pub fn new(profile: Profile, settings: RunSettings, client: Arc<dyn HttpClient>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            scenario: profile.scenario(settings.base_url()),
            thresholds: profile.thresholds()?,
            profile,
            settings,
            client,
        })
    }

    /// Replace the profile's scenario, keeping its stages and thresholds
    pub fn with_scenario(mut self, scenario: Arc<dyn Scenario>) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Drive every stage, then render the summary from a fresh sink
    pub async fn run(&self) -> Result<SummaryReport> {
        info!(
            profile = %self.profile,
            target = self.settings.base_url(),
            "Starting {} test",
            self.profile.as_str()
        );

        let sink = Arc::new(MetricSink::new());
        let driver = Driver::new(self.profile.stages(), sink.clone(), self.client.clone())?
            .with_tick(self.settings.tick())
            .with_random(RandomFactory::from_seed(self.settings.seed));

        let stats = driver.run(self.scenario.clone()).await;
        let report = report::render(
            self.profile,
            &sink,
            &RunMetadata::from(&stats),
            &self.thresholds,
        );

        info!(
            profile = %self.profile,
            verdict = report.snapshot.verdict.as_str(),
            samples = report.snapshot.samples.len(),
            "Run finished"
        );
        Ok(report)
    }

    /// Write the JSON artifact, plus the Prometheus file when asked
    pub fn write_artifacts(&self, report: &SummaryReport, prometheus: bool) -> Result<Vec<PathBuf>> {
        let mut paths = vec![report::write_artifact(
            &report.snapshot,
            &self.settings.results_dir,
        )?];
        if prometheus {
            paths.push(report::write_prometheus(
                &report.snapshot,
                &self.settings.results_dir,
            )?);
        }
        Ok(paths)
    }
}

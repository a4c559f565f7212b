//! Virtual user execution context

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::http::HttpClient;
use crate::metrics::{self, MetricSink};
use crate::random::RandomSource;
use crate::scenario::ScenarioResult;

/// Identity of a simulated client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualUser {
    /// Spawn ordinal, starting at 0
    pub id: u64,
    /// Completed iterations
    pub iterations: u64,
}

/// Everything one virtual user needs to run scenario iterations.
///
/// Owned by the virtual user's task and handed to the scenario mutably for
/// each iteration.
pub struct VuContext {
    pub vu: VirtualUser,
    sink: Arc<MetricSink>,
    client: Arc<dyn HttpClient>,
    random: Box<dyn RandomSource>,
    retire: watch::Receiver<bool>,
}

impl VuContext {
    pub fn new(
        id: u64,
        sink: Arc<MetricSink>,
        client: Arc<dyn HttpClient>,
        random: Box<dyn RandomSource>,
        retire: watch::Receiver<bool>,
    ) -> Self {
        Self {
            vu: VirtualUser { id, iterations: 0 },
            sink,
            client,
            random,
            retire,
        }
    }

    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    pub fn random(&mut self) -> &mut dyn RandomSource {
        self.random.as_mut()
    }

    /// False once the driver has asked this virtual user to retire
    pub fn is_active(&self) -> bool {
        !*self.retire.borrow()
    }

    /// Issue a GET and record the built-in request metrics.
    ///
    /// Transport failures come back as status 0 rather than an error.
    pub async fn get(&mut self, url: &str, name: &str) -> ScenarioResult {
        let started = Instant::now();
        let outcome = self.client.get(url).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(response) => ScenarioResult::from_response(response, elapsed),
            Err(err) => ScenarioResult::transport_failure(err.to_string(), elapsed),
        };

        let tags = [("name", name)];
        self.sink.add_counter(metrics::HTTP_REQS, 1.0, &tags);
        self.sink
            .add_trend(metrics::HTTP_REQ_DURATION, result.elapsed_ms(), &tags);
        self.sink.add_rate(
            metrics::HTTP_REQ_FAILED,
            result.status == 0 || result.status >= 400,
            &tags,
        );
        self.sink
            .add_counter(metrics::DATA_RECEIVED, result.body.len() as f64, &tags);

        result
    }

    /// Think-time between requests, cut short if the virtual user is retired.
    ///
    /// Returns whether the virtual user is still active.
    pub async fn pause(&mut self, duration: Duration) -> bool {
        if !self.is_active() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            changed = self.retire.changed() => {
                // Sender dropped: the driver is gone, treat as retirement
                if changed.is_err() {
                    return false;
                }
            }
        }
        self.is_active()
    }
}

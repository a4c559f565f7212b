//! Request scenarios and response classification
//!
//! A scenario is the unit of work a virtual user repeats. Each request it
//! issues is classified into exactly one [`Outcome`] and recorded:
//!
//! | Outcome        | Counters                                   | Rates                         |
//! |----------------|--------------------------------------------|-------------------------------|
//! | Success        | `successful_requests`                      | all 0                         |
//! | RateLimited    | `rate_limit_429`, `error_requests`         | `degraded`, `unsuccessful`    |
//! | CircuitBroken  | `circuit_breaker_503`, `error_requests`    | `degraded`, `unsuccessful`    |
//! | Failed         | `error_requests`                           | `error`, `unsuccessful`       |
//!
//! `status_codes` receives the raw status of every request.

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::http::HttpResponse;
use crate::metrics::{self, MetricSink};
use crate::random::RandomSource;
use crate::vu::VuContext;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Subject (alumno) ids known to the service's mock data
pub const SUBJECT_IDS: [u32; 8] = [1, 2, 3, 5, 8, 13, 21, 34];

pub const HEALTH_PATH: &str = "/api/v1/health";

/// A generated document must be larger than this many bytes
pub const MIN_DOCUMENT_BYTES: usize = 1000;

/// `service` field expected in the health payload
pub const SERVICE_NAME: &str = "documentos-service";

/// Think-time between load-profile iterations
pub const LOAD_THINK_TIME: Range<Duration> = Duration::from_secs(1)..Duration::from_secs(3);

/// Fixed pause after each smoke request
pub const SMOKE_PAUSE: Duration = Duration::from_secs(2);

// ============================================================================
// REQUESTS
// ============================================================================

/// Document format served by the certificate endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Pdf,
    Docx,
    Odt,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Pdf, Format::Docx, Format::Odt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Pdf => "pdf",
            Format::Docx => "docx",
            Format::Odt => "odt",
        }
    }

    /// PDF must match exactly; office formats match on a substring
    pub fn content_type_matches(&self, content_type: &str) -> bool {
        match self {
            Format::Pdf => content_type == "application/pdf",
            Format::Docx => content_type.contains("wordprocessingml"),
            Format::Odt => content_type.contains("opendocument"),
        }
    }

    /// Trend receiving the latency of successful requests for this format
    pub fn duration_metric(&self) -> &'static str {
        match self {
            Format::Pdf => "pdf_generation_duration",
            Format::Docx => "docx_generation_duration",
            Format::Odt => "odt_generation_duration",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn certificate_url(base_url: &str, subject_id: u32, format: Format) -> String {
    format!("{}/api/v1/certificado/{}/{}", base_url, subject_id, format)
}

pub fn health_url(base_url: &str) -> String {
    format!("{}{}", base_url, HEALTH_PATH)
}

/// One certificate request, built fresh per iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioRequest {
    pub subject_id: u32,
    pub format: Format,
    pub url: String,
}

impl ScenarioRequest {
    pub fn new(base_url: &str, subject_id: u32, format: Format) -> Self {
        Self {
            subject_id,
            format,
            url: certificate_url(base_url, subject_id, format),
        }
    }

    /// Uniform subject from [`SUBJECT_IDS`], uniform format
    pub fn sample(base_url: &str, random: &mut dyn RandomSource) -> Self {
        let subject_id = SUBJECT_IDS[random.index(SUBJECT_IDS.len())];
        let format = Format::ALL[random.index(Format::ALL.len())];
        Self::new(base_url, subject_id, format)
    }
}

// ============================================================================
// RESULTS & CLASSIFICATION
// ============================================================================

/// Response plus timing, consumed by the classifier then discarded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioResult {
    /// HTTP status, 0 when no response was received
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn from_response(response: HttpResponse, elapsed: Duration) -> Self {
        Self {
            status: response.status,
            content_type: response.header("content-type").unwrap_or_default().to_string(),
            body: response.body,
            elapsed,
            error: None,
        }
    }

    pub fn transport_failure(error: String, elapsed: Duration) -> Self {
        Self {
            elapsed,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// What a request is expected to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// JSON `{status: "ok", service: "documentos-service"}`
    Health,
    /// A generated document of the given format
    Document(Format),
}

impl Expectation {
    /// Value of the `name` tag on request metrics
    pub fn name(&self) -> &'static str {
        match self {
            Expectation::Health => "health",
            Expectation::Document(format) => format.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthPayload {
    status: String,
    service: String,
}

/// Why a request counted as a generic failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Transport(String),
    Status(u16),
    ContentType(String),
    ShortBody(usize),
    MalformedHealth(String),
    UnexpectedHealth,
    Fault(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(err) => write!(f, "transport error: {}", err),
            FailureReason::Status(status) => write!(f, "unexpected status {}", status),
            FailureReason::ContentType(ct) => write!(f, "unexpected content type '{}'", ct),
            FailureReason::ShortBody(len) => write!(f, "body too short ({} bytes)", len),
            FailureReason::MalformedHealth(err) => write!(f, "malformed health payload: {}", err),
            FailureReason::UnexpectedHealth => f.write_str("health payload does not match"),
            FailureReason::Fault(err) => write!(f, "iteration fault: {}", err),
        }
    }
}

/// Classification of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    CircuitBroken,
    Failed(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Apply the success predicate, then the 429 and 503 signals, then fall
/// through to a generic failure.
pub fn classify(expectation: Expectation, result: &ScenarioResult) -> Outcome {
    if let Some(err) = &result.error {
        return Outcome::Failed(FailureReason::Transport(err.clone()));
    }

    if result.status == 200 {
        match expectation {
            Expectation::Health => match serde_json::from_slice::<HealthPayload>(&result.body) {
                Ok(payload) if payload.status == "ok" && payload.service == SERVICE_NAME => {
                    return Outcome::Success;
                }
                Ok(_) => return Outcome::Failed(FailureReason::UnexpectedHealth),
                Err(err) => return Outcome::Failed(FailureReason::MalformedHealth(err.to_string())),
            },
            Expectation::Document(format) => {
                if !format.content_type_matches(&result.content_type) {
                    return Outcome::Failed(FailureReason::ContentType(result.content_type.clone()));
                }
                if result.body.len() <= MIN_DOCUMENT_BYTES {
                    return Outcome::Failed(FailureReason::ShortBody(result.body.len()));
                }
                return Outcome::Success;
            }
        }
    }

    match result.status {
        429 => Outcome::RateLimited,
        503 => Outcome::CircuitBroken,
        status => Outcome::Failed(FailureReason::Status(status)),
    }
}

/// Record the classification metrics for one request
pub fn record_outcome(
    sink: &MetricSink,
    expectation: Expectation,
    result: &ScenarioResult,
    outcome: &Outcome,
) {
    let tags = [("name", expectation.name())];
    sink.add_trend(metrics::STATUS_CODES, f64::from(result.status), &tags);

    match outcome {
        Outcome::Success => {
            sink.add_counter(metrics::SUCCESSFUL_REQUESTS, 1.0, &tags);
            if let Expectation::Document(format) = expectation {
                sink.add_trend(format.duration_metric(), result.elapsed_ms(), &tags);
            }
        }
        Outcome::RateLimited => {
            sink.add_counter(metrics::RATE_LIMIT_429, 1.0, &tags);
            sink.add_counter(metrics::ERROR_REQUESTS, 1.0, &tags);
        }
        Outcome::CircuitBroken => {
            sink.add_counter(metrics::CIRCUIT_BREAKER_503, 1.0, &tags);
            sink.add_counter(metrics::ERROR_REQUESTS, 1.0, &tags);
        }
        Outcome::Failed(_) => {
            sink.add_counter(metrics::ERROR_REQUESTS, 1.0, &tags);
        }
    }

    record_rates(sink, outcome, &tags);
}

/// Record an iteration that failed outside classification
pub fn record_fault(sink: &MetricSink, fault: &str) {
    let outcome = Outcome::Failed(FailureReason::Fault(fault.to_string()));
    sink.add_counter(metrics::ITERATION_FAULTS, 1.0, &[]);
    sink.add_counter(metrics::ERROR_REQUESTS, 1.0, &[]);
    record_rates(sink, &outcome, &[]);
}

fn record_rates(sink: &MetricSink, outcome: &Outcome, tags: &[(&str, &str)]) {
    let degraded = matches!(outcome, Outcome::RateLimited | Outcome::CircuitBroken);
    let failed = matches!(outcome, Outcome::Failed(_));
    sink.add_rate(metrics::ERROR_RATE, failed, tags);
    sink.add_rate(metrics::DEGRADED_RATE, degraded, tags);
    sink.add_rate(metrics::UNSUCCESSFUL_RATE, !outcome.is_success(), tags);
}

// ============================================================================
// CHECKS
// ============================================================================

/// Record a named boolean check, returning its result
pub fn check(sink: &MetricSink, name: &str, passed: bool) -> bool {
    sink.add_rate(metrics::CHECKS, passed, &[("check", name)]);
    passed
}

/// Checks run on every load-profile response
fn document_checks(sink: &MetricSink, format: Format, result: &ScenarioResult) {
    check(sink, "status is 200", result.status == 200);
    check(
        sink,
        "content type is correct",
        format.content_type_matches(&result.content_type),
    );
    check(
        sink,
        "response has content",
        result.body.len() > MIN_DOCUMENT_BYTES,
    );
}

/// Checks run on every spike-profile response
fn spike_checks(sink: &MetricSink, result: &ScenarioResult) {
    check(sink, "status is 200", result.status == 200);
    check(
        sink,
        "status is valid (200, 429, or 503)",
        matches!(result.status, 200 | 429 | 503),
    );
    check(
        sink,
        "no unexpected errors",
        result.status != 500 && result.status != 502,
    );
    check(sink, "response has content", !result.body.is_empty());
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Work repeated by every virtual user
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Run one iteration. Classification failures are recorded, not returned;
    /// an `Err` is an unexpected fault the driver records and survives.
    async fn iteration(&self, ctx: &mut VuContext) -> Result<()>;
}

/// Which checks a certificate scenario evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSet {
    Document,
    Spike,
}

/// Random certificate requests (load and spike profiles)
pub struct CertificateScenario {
    name: &'static str,
    base_url: String,
    checks: CheckSet,
    think_time: Option<Range<Duration>>,
}

impl CertificateScenario {
    /// Paced with 1 to 3 s think-time
    pub fn load(base_url: &str) -> Self {
        Self {
            name: "load",
            base_url: base_url.to_string(),
            checks: CheckSet::Document,
            think_time: Some(LOAD_THINK_TIME),
        }
    }

    /// Unpaced, with the 429/503-tolerant spike checks
    pub fn spike(base_url: &str) -> Self {
        Self {
            name: "spike",
            base_url: base_url.to_string(),
            checks: CheckSet::Spike,
            think_time: None,
        }
    }
}

#[async_trait]
impl Scenario for CertificateScenario {
    fn name(&self) -> &str {
        self.name
    }

    async fn iteration(&self, ctx: &mut VuContext) -> Result<()> {
        let request = ScenarioRequest::sample(&self.base_url, ctx.random());
        let expectation = Expectation::Document(request.format);
        let result = ctx.get(&request.url, expectation.name()).await;

        match self.checks {
            CheckSet::Document => document_checks(ctx.sink(), request.format, &result),
            CheckSet::Spike => spike_checks(ctx.sink(), &result),
        }

        let outcome = classify(expectation, &result);
        record_outcome(ctx.sink(), expectation, &result, &outcome);

        match &outcome {
            Outcome::Success => {}
            Outcome::RateLimited => warn!(
                vu = ctx.vu.id,
                subject = request.subject_id,
                format = %request.format,
                "[RATE LIMIT] 429"
            ),
            Outcome::CircuitBroken => warn!(
                vu = ctx.vu.id,
                subject = request.subject_id,
                format = %request.format,
                "[CIRCUIT BREAKER] 503"
            ),
            Outcome::Failed(reason) => warn!(
                vu = ctx.vu.id,
                subject = request.subject_id,
                format = %request.format,
                status = result.status,
                "[ERROR] {}",
                reason
            ),
        }

        if let Some(range) = &self.think_time {
            let pause = ctx.random().duration_in(range);
            ctx.pause(pause).await;
        }

        Ok(())
    }
}

/// Fixed health → pdf → docx sequence with 2 s pauses (smoke profile)
pub struct SmokeScenario {
    base_url: String,
    subject_id: u32,
    pause: Duration,
}

impl SmokeScenario {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            subject_id: SUBJECT_IDS[0],
            pause: SMOKE_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    fn steps(&self) -> [(Expectation, String); 3] {
        [
            (Expectation::Health, health_url(&self.base_url)),
            (
                Expectation::Document(Format::Pdf),
                certificate_url(&self.base_url, self.subject_id, Format::Pdf),
            ),
            (
                Expectation::Document(Format::Docx),
                certificate_url(&self.base_url, self.subject_id, Format::Docx),
            ),
        ]
    }
}

#[async_trait]
impl Scenario for SmokeScenario {
    fn name(&self) -> &str {
        "smoke"
    }

    async fn iteration(&self, ctx: &mut VuContext) -> Result<()> {
        for (expectation, url) in self.steps() {
            let label = expectation.name();
            info!(vu = ctx.vu.id, "Testing {} endpoint...", label);
            let result = ctx.get(&url, label).await;

            let outcome = classify(expectation, &result);
            let sink = ctx.sink();
            match expectation {
                Expectation::Health => {
                    check(sink, "health status is 200", result.status == 200);
                    check(sink, "health returns correct JSON", outcome.is_success());
                }
                Expectation::Document(format) => {
                    check(sink, &format!("{} status is 200", label), result.status == 200);
                    check(
                        sink,
                        &format!("{} content type is correct", label),
                        format.content_type_matches(&result.content_type),
                    );
                    check(
                        sink,
                        &format!("{} has content", label),
                        result.body.len() > MIN_DOCUMENT_BYTES,
                    );
                }
            }

            record_outcome(sink, expectation, &result, &outcome);

            match &outcome {
                Outcome::Success => match expectation {
                    Expectation::Health => info!("Health check passed"),
                    Expectation::Document(_) => {
                        info!("{} generated ({} bytes)", label, result.body.len())
                    }
                },
                Outcome::Failed(reason) => {
                    warn!(status = result.status, "{} failed: {}", label, reason)
                }
                _ => warn!(status = result.status, "{} failed", label),
            }

            // Remaining steps still run after retirement; the pause is skipped
            ctx.pause(self.pause).await;
        }

        Ok(())
    }
}

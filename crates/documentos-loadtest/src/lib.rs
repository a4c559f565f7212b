//! # documentos-service Load Testing
//!
//! Synthetic traffic profiles for the certificate-generation API of
//! documentos-service.
//!
//! ## Profiles
//!
//! - **smoke**: one virtual user runs health → pdf → docx with 2s pauses for 30s
//! - **load**: ramps 0 → 10 → 30 → 50 → 30 → 0 virtual users over 9 minutes
//! - **spike**: 10 virtual users, then a jump to 100 held for 20s
//!
//! Every request is classified as success, rate-limited (429),
//! circuit-broken (503) or failed, recorded into a per-run [`MetricSink`],
//! and summarised once the run has drained.
//!
//! ## Usage
//!
//! ```bash
//! documentos-loadtest smoke --target https://documentos.universidad.localhost
//! documentos-loadtest load --seed 42 --prometheus
//! documentos-loadtest spike --results-dir /tmp/results
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod http;
pub mod metrics;
pub mod profiles;
pub mod random;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod threshold;
pub mod vu;

pub use config::RunSettings;
pub use driver::{target_at, Driver, RunStats, Stage};
pub use error::{LoadTestError, Result};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use metrics::{Aggregate, MetricKind, MetricSample, MetricSink};
pub use profiles::Profile;
pub use random::{RandomFactory, RandomSource, SeededRandom};
pub use report::{SummaryReport, SummarySnapshot, Verdict};
pub use runner::LoadTestRunner;
pub use scenario::{classify, Format, Outcome, Scenario, ScenarioRequest, ScenarioResult};
pub use threshold::{Threshold, ThresholdOutcome};
pub use vu::{VirtualUser, VuContext};

//! Traffic profile driver
//!
//! Executes an ordered stage sequence. On every tick the target concurrency
//! is recomputed with [`target_at`]; missing virtual users are spawned as
//! tokio tasks and surplus ones (highest ordinal first) are told to retire.
//! A retiring virtual user finishes the iteration it is in and exits; nothing
//! is aborted mid-request.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{LoadTestError, Result};
use crate::http::HttpClient;
use crate::metrics::{self, MetricSink};
use crate::random::RandomFactory;
use crate::scenario::{self, Scenario};
use crate::vu::VuContext;

// ============================================================================
// STAGES
// ============================================================================

/// A time-boxed concurrency step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub const fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }

    pub const fn secs(secs: u64, target: u32) -> Self {
        Self::new(Duration::from_secs(secs), target)
    }

    /// Target `elapsed` into this stage when it starts from `start`
    pub fn target_at(&self, start: u32, elapsed: Duration) -> u32 {
        if self.duration.is_zero() || elapsed >= self.duration {
            return self.target;
        }
        let progress = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let delta = self.target as f64 - start as f64;
        (start as f64 + delta * progress).floor() as u32
    }
}

/// A constant population: jump to `vus` immediately, hold for `duration`
pub fn constant_vus(vus: u32, duration: Duration) -> Vec<Stage> {
    vec![Stage::new(Duration::ZERO, vus), Stage::new(duration, vus)]
}

pub fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|s| s.duration).sum()
}

/// Target concurrency `elapsed` into the run.
///
/// Each stage interpolates linearly from the previous stage's target (0 for
/// the first) to its own. Past the end the last target holds.
pub fn target_at(stages: &[Stage], elapsed: Duration) -> u32 {
    let mut stage_start = Duration::ZERO;
    let mut previous = 0;
    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            return stage.target_at(previous, elapsed - stage_start);
        }
        stage_start = stage_end;
        previous = stage.target;
    }
    previous
}

/// Index of the stage running at `elapsed`, `None` once all have elapsed
pub fn stage_index(stages: &[Stage], elapsed: Duration) -> Option<usize> {
    let mut stage_end = Duration::ZERO;
    for (index, stage) in stages.iter().enumerate() {
        stage_end += stage.duration;
        if elapsed < stage_end {
            return Some(index);
        }
    }
    None
}

// ============================================================================
// DRIVER
// ============================================================================

/// What the driver observed during a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    /// Wall-clock time including the drain of in-flight iterations
    pub elapsed: Duration,
    /// Highest number of concurrently active virtual users
    pub vus_max: u32,
    /// Virtual users spawned over the run
    pub vus_spawned: u64,
}

struct ActiveVu {
    id: u64,
    retire: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives a stage sequence with a population of virtual users
pub struct Driver {
    stages: Vec<Stage>,
    tick: Duration,
    sink: Arc<MetricSink>,
    client: Arc<dyn HttpClient>,
    random: RandomFactory,
}

impl Driver {
    pub fn new(
        stages: Vec<Stage>,
        sink: Arc<MetricSink>,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(LoadTestError::InvalidStage(
                "at least one stage is required".to_string(),
            ));
        }
        if total_duration(&stages).is_zero() {
            return Err(LoadTestError::InvalidStage(
                "stages must span a non-zero duration".to_string(),
            ));
        }
        Ok(Self {
            stages,
            tick: Duration::from_millis(100),
            sink,
            client,
            random: RandomFactory::Entropy,
        })
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn with_random(mut self, random: RandomFactory) -> Self {
        self.random = random;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage, then wait for all virtual users to drain
    pub async fn run(&self, scenario: Arc<dyn Scenario>) -> RunStats {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = total_duration(&self.stages);
        let deadline = start + total;

        info!(
            scenario = scenario.name(),
            stages = self.stages.len(),
            "Starting run for {:.0}s",
            total.as_secs_f64()
        );

        let mut active: Vec<ActiveVu> = Vec::new();
        let mut retiring: Vec<JoinHandle<()>> = Vec::new();
        let mut next_id: u64 = 0;
        let mut vus_max: u32 = 0;
        let mut current_stage: Option<usize> = None;

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            let stage = stage_index(&self.stages, elapsed);
            if stage != current_stage {
                if let Some(index) = stage {
                    let s = self.stages[index];
                    info!(
                        "Stage {}/{}: {} VUs over {:.0}s",
                        index + 1,
                        self.stages.len(),
                        s.target,
                        s.duration.as_secs_f64()
                    );
                }
                current_stage = stage;
            }

            let target = target_at(&self.stages, elapsed) as usize;

            while active.len() < target {
                active.push(self.spawn_vu(next_id, scenario.clone(), deadline));
                next_id += 1;
            }
            while active.len() > target {
                if let Some(vu) = active.pop() {
                    debug!(vu = vu.id, "Retiring virtual user");
                    let _ = vu.retire.send(true);
                    retiring.push(vu.handle);
                }
            }

            vus_max = vus_max.max(active.len() as u32);
            self.sink
                .add_trend(metrics::VUS, active.len() as f64, &[]);

            retiring.retain(|handle| !handle.is_finished());
        }

        info!(active = active.len(), "All stages elapsed, draining virtual users");
        for vu in active.drain(..) {
            let _ = vu.retire.send(true);
            retiring.push(vu.handle);
        }
        for handle in retiring {
            if let Err(e) = handle.await {
                error!("Virtual user task failed: {}", e);
            }
        }

        let elapsed = start.elapsed();
        info!(
            vus_max,
            vus_spawned = next_id,
            "Run complete after {:.1}s",
            elapsed.as_secs_f64()
        );

        RunStats {
            started_at,
            elapsed,
            vus_max,
            vus_spawned: next_id,
        }
    }

    fn spawn_vu(&self, id: u64, scenario: Arc<dyn Scenario>, deadline: Instant) -> ActiveVu {
        let (retire, retire_rx) = watch::channel(false);
        let ctx = VuContext::new(
            id,
            self.sink.clone(),
            self.client.clone(),
            self.random.for_vu(id),
            retire_rx,
        );
        debug!(vu = id, "Spawning virtual user");
        let handle = tokio::spawn(run_virtual_user(ctx, scenario, deadline));
        ActiveVu { id, retire, handle }
    }
}

/// Iterate until retired or past the deadline. Faults are recorded and the
/// loop carries on.
async fn run_virtual_user(mut ctx: VuContext, scenario: Arc<dyn Scenario>, deadline: Instant) {
    while ctx.is_active() && Instant::now() < deadline {
        let outcome = AssertUnwindSafe(scenario.iteration(&mut ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(vu = ctx.vu.id, "Iteration failed: {}", e);
                scenario::record_fault(ctx.sink(), &e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(vu = ctx.vu.id, "Iteration panicked: {}", message);
                scenario::record_fault(ctx.sink(), &message);
            }
        }

        ctx.sink().add_counter(metrics::ITERATIONS, 1.0, &[]);
        ctx.vu.iterations += 1;
        tokio::task::yield_now().await;
    }
    debug!(vu = ctx.vu.id, iterations = ctx.vu.iterations, "Virtual user exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Stage scheduling, retirement and fault tolerance of the driver

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use documentos_loadtest::metrics;
use documentos_loadtest::{
    Driver, HttpClient, LoadTestError, LoadTestRunner, MetricSink, Profile, RandomFactory,
    Result, RunSettings, Scenario, Stage, VuContext,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Records when each iteration starts and how many finished
struct StartRecorder {
    origin: Instant,
    work: Duration,
    starts: Mutex<Vec<Duration>>,
    finished: AtomicU64,
}

impl StartRecorder {
    fn new(work: Duration) -> Self {
        Self {
            origin: Instant::now(),
            work,
            starts: Mutex::new(Vec::new()),
            finished: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Scenario for StartRecorder {
    fn name(&self) -> &str {
        "start-recorder"
    }

    async fn iteration(&self, ctx: &mut VuContext) -> Result<()> {
        self.starts.lock().push(self.origin.elapsed());
        let _ = ctx.get(&format!("{}/api/v1/health", BASE_URL), "health").await;
        tokio::time::sleep(self.work).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every second iteration and panics every third
struct Faulty {
    calls: AtomicU64,
}

#[async_trait]
impl Scenario for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn iteration(&self, _ctx: &mut VuContext) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 3 == 0 {
            panic!("iteration {} exploded", n);
        }
        if n % 2 == 0 {
            return Err(LoadTestError::IterationFault(format!("iteration {}", n)));
        }
        Ok(())
    }
}

fn healthy_client() -> Arc<dyn HttpClient> {
    Arc::new(ScriptedClient::new(Duration::from_millis(50), healthy_service))
}

#[test]
fn test_driver_rejects_empty_schedules() {
    let sink = Arc::new(MetricSink::new());
    assert!(matches!(
        Driver::new(Vec::new(), sink.clone(), healthy_client()),
        Err(LoadTestError::InvalidStage(_))
    ));
    assert!(matches!(
        Driver::new(vec![Stage::secs(0, 5)], sink.clone(), healthy_client()),
        Err(LoadTestError::InvalidStage(_))
    ));

    let stages = vec![Stage::secs(0, 5), Stage::secs(10, 5)];
    let driver = Driver::new(stages.clone(), sink, healthy_client()).unwrap();
    assert_eq!(driver.stages(), stages.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_runner_drives_replacement_scenario_on_profile_schedule() {
    let settings = RunSettings {
        base_url: BASE_URL.to_string(),
        seed: Some(4),
        ..RunSettings::default()
    };
    let recorder = Arc::new(StartRecorder::new(Duration::from_millis(950)));
    let runner = LoadTestRunner::new(Profile::Smoke, settings, healthy_client())
        .unwrap()
        .with_scenario(recorder.clone());
    assert_eq!(runner.profile(), Profile::Smoke);

    let report = runner.run().await.unwrap();

    let starts = recorder.starts.lock().len();
    assert_eq!(starts, 30);
    assert_eq!(report.snapshot.profile, Profile::Smoke);
    assert_eq!(report.snapshot.run.vus_max, 1);
    assert_eq!(report.snapshot.count(metrics::HTTP_REQS), starts as f64);
    // The replacement records no classification, so smoke cannot pass
    assert_eq!(report.snapshot.verdict, documentos_loadtest::Verdict::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_no_iteration_starts_after_deadline() {
    let sink = Arc::new(MetricSink::new());
    let stages = vec![Stage::secs(2, 4), Stage::secs(3, 4), Stage::secs(2, 0)];
    let driver = Driver::new(stages, sink.clone(), healthy_client())
        .unwrap()
        .with_random(RandomFactory::Seeded(1));
    let recorder = Arc::new(StartRecorder::new(Duration::from_millis(650)));

    let stats = driver.run(recorder.clone()).await;

    let starts = recorder.starts.lock().clone();
    assert!(!starts.is_empty());
    assert!(
        starts.iter().all(|s| *s < Duration::from_secs(7)),
        "late start in {:?}",
        starts
    );
    assert_eq!(stats.vus_max, 4);
    assert!(stats.elapsed >= Duration::from_secs(7));
    assert!(stats.elapsed < Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn test_retired_users_finish_in_flight_iterations() {
    let sink = Arc::new(MetricSink::new());
    let stages = vec![Stage::secs(1, 10), Stage::secs(4, 10), Stage::secs(1, 0)];
    let client: Arc<dyn HttpClient> =
        Arc::new(ScriptedClient::new(Duration::from_millis(1500), healthy_service));
    let driver = Driver::new(stages, sink.clone(), client).unwrap();
    let recorder = Arc::new(StartRecorder::new(Duration::from_millis(100)));

    let stats = driver.run(recorder.clone()).await;

    let started = recorder.starts.lock().len() as u64;
    assert_eq!(recorder.finished.load(Ordering::SeqCst), started);
    assert_eq!(count(&sink, metrics::HTTP_REQS), started as f64);
    assert_eq!(count(&sink, metrics::ITERATIONS), started as f64);
    assert_eq!(stats.vus_spawned, 10);
}

#[tokio::test(start_paused = true)]
async fn test_faults_do_not_stop_the_run() {
    let sink = Arc::new(MetricSink::new());
    let driver =
        Driver::new(vec![Stage::secs(0, 2), Stage::secs(3, 2)], sink.clone(), healthy_client())
            .unwrap();
    let scenario = Arc::new(Faulty {
        calls: AtomicU64::new(0),
    });

    let stats = driver.run(scenario.clone()).await;

    let calls = scenario.calls.load(Ordering::SeqCst);
    assert!(calls >= 20, "only {} iterations", calls);
    assert_eq!(count(&sink, metrics::ITERATIONS), calls as f64);

    let faults = count(&sink, metrics::ITERATION_FAULTS);
    let expected = (1..=calls).filter(|n| n % 3 == 0 || n % 2 == 0).count();
    assert_eq!(faults, expected as f64);
    assert_eq!(count(&sink, metrics::ERROR_REQUESTS), faults);
    assert_eq!(stats.vus_spawned, 2);
}

#[tokio::test(start_paused = true)]
async fn test_ramp_down_retires_highest_ordinals_first() {
    let sink = Arc::new(MetricSink::new());
    let stages = vec![Stage::secs(0, 6), Stage::secs(2, 6), Stage::secs(0, 2), Stage::secs(2, 2)];
    let driver = Driver::new(stages, sink.clone(), healthy_client()).unwrap();

    struct Tracker(Mutex<Vec<(u64, Duration)>>, Instant);

    #[async_trait]
    impl Scenario for Tracker {
        fn name(&self) -> &str {
            "tracker"
        }

        async fn iteration(&self, ctx: &mut VuContext) -> Result<()> {
            self.0.lock().push((ctx.vu.id, self.1.elapsed()));
            ctx.pause(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    let tracker = Arc::new(Tracker(Mutex::new(Vec::new()), Instant::now()));
    let stats = driver.run(tracker.clone()).await;

    assert_eq!(stats.vus_max, 6);
    let late: std::collections::BTreeSet<u64> = tracker
        .0
        .lock()
        .iter()
        .filter(|(_, at)| *at >= Duration::from_millis(2500))
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(late, [0, 1].into_iter().collect());
}

#[tokio::test(start_paused = true)]
async fn test_vus_trend_tracks_population() {
    let sink = Arc::new(MetricSink::new());
    let driver = Driver::new(vec![Stage::secs(2, 8), Stage::secs(1, 0)], sink.clone(), healthy_client())
        .unwrap()
        .with_tick(Duration::from_millis(250));
    let recorder = Arc::new(StartRecorder::new(Duration::from_millis(100)));

    driver.run(recorder).await;

    let vus = sink.aggregate(metrics::VUS).unwrap();
    assert_eq!(vus.max(), Some(8.0));
    assert_eq!(vus.min(), Some(0.0));
    assert_eq!(vus.samples(), 12);
}

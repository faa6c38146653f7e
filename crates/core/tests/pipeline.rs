use std::sync::Arc;
use std::time::{Duration, Instant};

use congestion_monitor::{
    capture::{self, PacketMetadata},
    config::SamplerConfig,
    ingest::ObservationIngestor,
    observation::SharedObservationState,
    sampler::SamplingScheduler,
    util::TimeSource,
    Monitor,
};
use parking_lot::Mutex;
use testresult::TestResult;

#[derive(Clone)]
struct ManualClock(Arc<Mutex<Instant>>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

fn setup(
    config: SamplerConfig,
) -> (
    ObservationIngestor,
    SamplingScheduler<ManualClock>,
    ManualClock,
) {
    let state = Arc::new(SharedObservationState::new(config.initial_max_window_size));
    let clock = ManualClock::new();
    let sampler = SamplingScheduler::with_time_source(config, state.clone(), clock.clone())
        .expect("valid config");
    (ObservationIngestor::new(state), sampler, clock)
}

/// Packet whose ack RTT is given in milliseconds.
fn packet(window: u64, rtt_ms: f64) -> PacketMetadata {
    PacketMetadata {
        window_size: Some(window.to_string()),
        ack_rtt: Some(format!("{}", rtt_ms / 1000.0)),
    }
}

#[test_log::test]
fn scores_from_raw_packets() {
    let (mut ingestor, mut sampler, clock) = setup(SamplerConfig::default());

    ingestor.ingest(&packet(500, 50.0));
    clock.advance(Duration::from_millis(100));
    let calm = sampler.tick();
    let score = calm.sample.congestion_score.expect("both metrics observed");
    assert!((score - 0.5).abs() < 1e-9);
    assert!(!calm.congested);

    ingestor.ingest(&packet(100, 150.0));
    clock.advance(Duration::from_millis(100));
    let congested = sampler.tick();
    let score = congested.sample.congestion_score.expect("both metrics observed");
    assert!((score - 0.95).abs() < 1e-9);
    assert!(congested.congested);

    let snapshot = sampler.history().snapshot();
    assert_eq!(snapshot.events.len(), 1);
    assert_eq!(snapshot.events[0].t, congested.sample.t);
}

#[test]
fn window_without_rtt_keeps_slots_aligned() {
    let (mut ingestor, mut sampler, clock) = setup(SamplerConfig::default());
    ingestor.ingest(&PacketMetadata::new(Some("300"), None));
    clock.advance(Duration::from_millis(100));
    let outcome = sampler.tick();

    assert_eq!(outcome.sample.congestion_score, None);
    let snapshot = sampler.history().snapshot();
    assert_eq!(snapshot.time.len(), 1);
    assert_eq!(snapshot.throughput_pps.len(), 1);
    assert_eq!(snapshot.window_size, vec![Some(300)]);
    assert_eq!(snapshot.rtt_ms, vec![None]);
}

#[test]
fn throughput_over_half_a_second() {
    let (mut ingestor, mut sampler, clock) = setup(SamplerConfig::default());
    for _ in 0..250 {
        ingestor.ingest(&PacketMetadata::default());
    }
    clock.advance(Duration::from_millis(500));
    assert_eq!(sampler.tick().sample.throughput_pps, Some(500.0));
}

#[test]
fn long_run_keeps_latest_history() {
    let config = SamplerConfig {
        history_length: 100,
        ..Default::default()
    };
    let (mut ingestor, mut sampler, clock) = setup(config);
    let mut last_max = 0;
    for i in 0..150u64 {
        ingestor.ingest(&packet(900 + i * 10, 20.0));
        clock.advance(Duration::from_millis(100));
        let frame_max = {
            sampler.tick();
            let frames = sampler.subscribe();
            let max = frames.borrow().as_ref().map(|f| f.max_window_size_seen);
            max.expect("frame published")
        };
        assert!(frame_max >= last_max);
        last_max = frame_max;

        let snapshot = sampler.history().snapshot();
        let len = snapshot.len();
        assert_eq!(len, (i as usize + 1).min(100));
        assert_eq!(snapshot.window_size.len(), len);
        assert_eq!(snapshot.rtt_ms.len(), len);
        assert_eq!(snapshot.throughput_pps.len(), len);
        assert_eq!(snapshot.congestion_score.len(), len);
    }

    let snapshot = sampler.history().snapshot();
    assert_eq!(snapshot.window_size.first(), Some(&Some(900 + 50 * 10)));
    assert_eq!(snapshot.window_size.last(), Some(&Some(900 + 149 * 10)));
    assert_eq!(last_max, 900 + 149 * 10);
}

#[tokio::test]
async fn live_monitor_end_to_end() -> TestResult {
    let (tx, stream) = capture::channel(256);
    let config = SamplerConfig {
        sample_interval_ms: 20,
        history_length: 10,
        ..Default::default()
    };
    let monitor = Monitor::start(config, stream)?;
    let mut frames = monitor.frames();

    tx.send(PacketMetadata::new(Some("garbage"), Some("also garbage")))
        .await?;
    for window in [2000u64, 1800, 1500] {
        tx.send(PacketMetadata::new(Some(window.to_string().as_str()), Some("0.030")))
            .await?;
    }

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            frames.changed().await?;
            let frame = frames.borrow_and_update().clone();
            if let Some(frame) = frame.filter(|f| f.sample.window_size == Some(1500)) {
                return Ok::<_, tokio::sync::watch::error::RecvError>(frame);
            }
        }
    })
    .await??;

    // only windows current at a tick boundary can raise the maximum
    assert!(frame.max_window_size_seen >= 1500);
    assert_eq!(frame.sample.rtt_ms, Some(30.0));
    assert!(frame.history.len() <= 10);

    let report = monitor.stop().await;
    let ingest = report.ingest.ok_or("ingest task panicked")?;
    assert_eq!(ingest.packets, 4);
    assert_eq!(ingest.field_errors, 2);
    Ok(())
}

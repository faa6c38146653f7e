//! Fixed-cadence sampling of the shared observation state.
//!
//! Every tick the sampler takes the packet count and latest observation out of
//! [`SharedObservationState`], derives throughput and the congestion score,
//! appends one entry to each history sequence and publishes a [`RenderFrame`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::{ConfigError, SamplerConfig, StaleValues};
use crate::history::{CongestionEvent, HistoryStore};
use crate::observation::{SharedObservationState, TickReading};
use crate::render::{FrameReceiver, RenderFrame, ViewTracker};
use crate::score::congestion_score;
use crate::util::time_source::{InstantTimeSrc, TimeSource};

/// Values recorded for one tick. Missing metrics are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds since the sampler started.
    pub t: f64,
    pub window_size: Option<u64>,
    pub rtt_ms: Option<f64>,
    pub throughput_pps: Option<f64>,
    pub congestion_score: Option<f64>,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub sample: Sample,
    pub congested: bool,
    /// First congested tick after a calm one.
    pub onset: bool,
}

/// What the sampler leaves behind once stopped.
#[derive(Debug)]
pub struct SamplerReport {
    pub ticks: u64,
    pub history: HistoryStore,
}

pub struct SamplingScheduler<T: TimeSource = InstantTimeSrc> {
    config: SamplerConfig,
    state: Arc<SharedObservationState>,
    history: HistoryStore,
    view: ViewTracker,
    time_source: T,
    started_at: Instant,
    last_throughput_at: Instant,
    ticks: u64,
    in_congestion: bool,
    frames: watch::Sender<Option<Arc<RenderFrame>>>,
}

impl SamplingScheduler<InstantTimeSrc> {
    pub fn new(
        config: SamplerConfig,
        state: Arc<SharedObservationState>,
    ) -> Result<Self, ConfigError> {
        Self::with_time_source(config, state, InstantTimeSrc::new())
    }
}

impl<T: TimeSource> SamplingScheduler<T> {
    pub fn with_time_source(
        config: SamplerConfig,
        state: Arc<SharedObservationState>,
        time_source: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let history = HistoryStore::new(config.history_capacity()?, config.max_congestion_events);
        let started_at = time_source.now();
        let (frames, _) = watch::channel(None);
        Ok(Self {
            config,
            state,
            history,
            view: ViewTracker::default(),
            time_source,
            started_at,
            last_throughput_at: started_at,
            ticks: 0,
            in_congestion: false,
            frames,
        })
    }

    /// Subscribes to the frame published after each tick.
    pub fn subscribe(&self) -> FrameReceiver {
        self.frames.subscribe()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Packets per second since the previous throughput instant, or `None`
    /// when no time has passed.
    fn throughput(&mut self, now: Instant, packets: u64) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_throughput_at);
        if elapsed == Duration::ZERO {
            tracing::trace!(packets, "No time elapsed since last tick, throughput skipped");
            return None;
        }
        self.last_throughput_at = now;
        Some(packets as f64 / elapsed.as_secs_f64())
    }

    fn visible_metrics(&self, reading: &TickReading) -> (Option<u64>, Option<f64>) {
        let obs = reading.observation;
        match self.config.stale_values {
            StaleValues::Repeat => (obs.window_size, obs.rtt_ms),
            StaleValues::Mark => (
                obs.window_size.filter(|_| reading.fresh.window_size),
                obs.rtt_ms.filter(|_| reading.fresh.rtt),
            ),
        }
    }

    /// Runs one sampling step and publishes its frame.
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.time_source.now();
        let reading = self.state.take_tick();

        let throughput_pps = self.throughput(now, reading.packets);
        let t = now.saturating_duration_since(self.started_at).as_secs_f64();
        let (window_size, rtt_ms) = self.visible_metrics(&reading);
        let score = congestion_score(
            rtt_ms,
            window_size,
            reading.max_window_size_seen,
            self.config.rtt_threshold_ms,
        );
        let sample = Sample {
            t,
            window_size,
            rtt_ms,
            throughput_pps,
            congestion_score: score,
        };

        self.history.push_sample(&sample);
        let congested = score.is_some_and(|s| s > self.config.congestion_event_threshold);
        let onset = congested && !self.in_congestion;
        if congested {
            if onset {
                tracing::info!(t, score = ?score, rtt_ms = ?rtt_ms, window_size = ?window_size, "Congestion detected");
            } else {
                tracing::debug!(t, score = ?score, "Congestion persists");
            }
            self.history.record_event(CongestionEvent { t });
        } else if self.in_congestion {
            tracing::info!(t, score = ?score, "Congestion cleared");
        }
        self.in_congestion = congested;
        self.ticks += 1;

        let view = self.view.update(&sample, reading.max_window_size_seen);
        let frame = RenderFrame {
            tick: self.ticks,
            taken_at: chrono::Utc::now(),
            sample,
            congested,
            max_window_size_seen: reading.max_window_size_seen,
            history: Arc::new(self.history.snapshot()),
            view,
        };
        self.frames.send_replace(Some(Arc::new(frame)));

        TickOutcome {
            sample,
            congested,
            onset,
        }
    }

    /// Ticks every `sample_interval_ms` until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SamplerReport {
        let mut interval = tokio::time::interval(self.config.sample_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        interval.tick().await;
        tracing::info!(
            interval_ms = self.config.sample_interval_ms,
            history_length = self.config.history_length,
            "Sampler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        tracing::info!(ticks = self.ticks, events = self.history.events_recorded(), "Sampler stopped");
        SamplerReport {
            ticks: self.ticks,
            history: self.history,
        }
    }
}

//! Frames handed to renderers, plus a plain terminal renderer.
//!
//! The sampler publishes one [`RenderFrame`] per tick through a `watch`
//! channel. Renderers only ever see the latest frame: a slow renderer skips
//! frames instead of holding the sampler back.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::history::HistorySnapshot;
use crate::sampler::Sample;

/// Seconds of history a renderer is expected to show.
pub const VISIBLE_SECONDS: f64 = 20.0;

const INITIAL_RTT_AXIS_MAX_MS: f64 = 200.0;
const INITIAL_THROUGHPUT_AXIS_MAX_PPS: f64 = 100.0;
const WINDOW_AXIS_HEADROOM: f64 = 1.1;
const RTT_AXIS_GROWTH: f64 = 1.5;
const THROUGHPUT_AXIS_GROWTH: f64 = 1.1;

/// Axis ranges for plotting the history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewHints {
    pub time_min: f64,
    pub time_max: f64,
    pub window_axis_max: f64,
    pub rtt_axis_max: f64,
    pub throughput_axis_max: f64,
}

/// Keeps the axes stable: they only ever grow.
#[derive(Debug, Clone)]
pub(crate) struct ViewTracker {
    rtt_axis_max: f64,
    throughput_axis_max: f64,
}

impl Default for ViewTracker {
    fn default() -> Self {
        Self {
            rtt_axis_max: INITIAL_RTT_AXIS_MAX_MS,
            throughput_axis_max: INITIAL_THROUGHPUT_AXIS_MAX_PPS,
        }
    }
}

impl ViewTracker {
    pub(crate) fn update(&mut self, sample: &Sample, max_window_size_seen: u64) -> ViewHints {
        if let Some(rtt) = sample.rtt_ms {
            if rtt > self.rtt_axis_max {
                self.rtt_axis_max = rtt * RTT_AXIS_GROWTH;
            }
        }
        if let Some(pps) = sample.throughput_pps {
            if pps > self.throughput_axis_max {
                self.throughput_axis_max = pps * THROUGHPUT_AXIS_GROWTH;
            }
        }
        ViewHints {
            time_min: (sample.t - VISIBLE_SECONDS).max(0.0),
            time_max: sample.t + 1.0,
            window_axis_max: max_window_size_seen as f64 * WINDOW_AXIS_HEADROOM,
            rtt_axis_max: self.rtt_axis_max,
            throughput_axis_max: self.throughput_axis_max,
        }
    }
}

/// Everything a renderer needs for one tick. Read-only by construction.
#[derive(Debug, Clone, Serialize)]
pub struct RenderFrame {
    pub tick: u64,
    /// Wall-clock time the tick was taken.
    pub taken_at: chrono::DateTime<chrono::Utc>,
    pub sample: Sample,
    /// The tick's score exceeded the event threshold.
    pub congested: bool,
    pub max_window_size_seen: u64,
    pub history: Arc<HistorySnapshot>,
    pub view: ViewHints,
}

/// Receiving side of the frame feed. `None` until the first tick.
pub type FrameReceiver = watch::Receiver<Option<Arc<RenderFrame>>>;

/// Writes one line per frame, text or JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalRenderer {
    json: bool,
}

impl TerminalRenderer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn format(&self, frame: &RenderFrame) -> String {
        if self.json {
            return serde_json::to_string(frame).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Failed serializing frame");
                String::new()
            });
        }

        fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "-".to_owned(), |v| v.to_string())
        }

        let s = &frame.sample;
        let mut line = format!(
            "t={:.2}s window={} rtt={} throughput={} score={} events={}",
            s.t,
            opt(s.window_size),
            opt(s.rtt_ms.map(|v| format!("{v:.2}ms"))),
            opt(s.throughput_pps.map(|v| format!("{v:.1}pps"))),
            opt(s.congestion_score.map(|v| format!("{v:.2}"))),
            frame.history.events_recorded,
        );
        if frame.congested {
            line.push_str("  CONGESTED");
        }
        line
    }

    /// Writes the latest frame every time one is published, until the
    /// sampler goes away.
    pub async fn run<W>(self, mut frames: FrameReceiver, mut out: W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while frames.changed().await.is_ok() {
            let frame = frames.borrow_and_update().clone();
            let Some(frame) = frame else { continue };
            let mut line = self.format(&frame);
            if line.is_empty() {
                continue;
            }
            line.push('\n');
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;
        }
        Ok(())
    }
}

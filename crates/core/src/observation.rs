//! Latest-value observation state shared between the ingest flow and the sampler.
//!
//! Everything the sampler reads jointly (the latest observation, the packet
//! counter and the largest window seen) lives behind one mutex, so a tick
//! always sees a consistent combination of the three.

use parking_lot::Mutex;
use serde::Serialize;

/// Most recently seen value of each metric. Absent until first observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Observation {
    pub window_size: Option<u64>,
    pub rtt_ms: Option<f64>,
}

/// Whether each metric was refreshed since the previous tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Freshness {
    pub window_size: bool,
    pub rtt: bool,
}

/// What the sampler takes out of the shared state on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReading {
    /// Packets ingested since the previous tick.
    pub packets: u64,
    pub observation: Observation,
    pub fresh: Freshness,
    /// Largest window seen, already raised by this tick's window if needed.
    pub max_window_size_seen: u64,
}

#[derive(Debug)]
struct ObservationState {
    current: Observation,
    packet_count: u64,
    max_window_size_seen: u64,
    fresh: Freshness,
}

/// Shared record written by the ingestor and read/reset by the sampler.
#[derive(Debug)]
pub struct SharedObservationState {
    inner: Mutex<ObservationState>,
}

impl SharedObservationState {
    pub fn new(initial_max_window_size: u64) -> Self {
        Self {
            inner: Mutex::new(ObservationState {
                current: Observation::default(),
                packet_count: 0,
                max_window_size_seen: initial_max_window_size,
                fresh: Freshness::default(),
            }),
        }
    }

    /// Counts one packet and overwrites whichever metrics it carried.
    pub fn record_packet(&self, update: Observation) {
        let mut state = self.inner.lock();
        state.packet_count = state.packet_count.saturating_add(1);
        if let Some(window_size) = update.window_size {
            state.current.window_size = Some(window_size);
            state.fresh.window_size = true;
        }
        if let Some(rtt_ms) = update.rtt_ms {
            state.current.rtt_ms = Some(rtt_ms);
            state.fresh.rtt = true;
        }
    }

    /// Reads and zeroes the packet counter, reads the latest observation
    /// (left in place) and raises `max_window_size_seen` if the latest window
    /// exceeds it. All of it under a single lock acquisition.
    pub fn take_tick(&self) -> TickReading {
        let mut state = self.inner.lock();
        let packets = std::mem::take(&mut state.packet_count);
        let observation = state.current;
        let fresh = std::mem::take(&mut state.fresh);
        if let Some(window_size) = observation.window_size {
            if window_size > state.max_window_size_seen {
                state.max_window_size_seen = window_size;
            }
        }
        TickReading {
            packets,
            observation,
            fresh,
            max_window_size_seen: state.max_window_size_seen,
        }
    }

    pub fn current(&self) -> Observation {
        self.inner.lock().current
    }

    pub fn packet_count(&self) -> u64 {
        self.inner.lock().packet_count
    }

    pub fn max_window_size_seen(&self) -> u64 {
        self.inner.lock().max_window_size_seen
    }
}

//! Bounded, index-aligned sample history.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use serde::Serialize;

use crate::sampler::Sample;

/// Fixed-capacity FIFO sequence: pushing past capacity evicts the oldest value.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedSeries<T> {
    capacity: NonZeroUsize,
    values: VecDeque<T>,
}

impl<T> BoundedSeries<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity.get()),
        }
    }

    /// Appends `value`, returning the evicted oldest value if full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.values.len() >= self.capacity.get() {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn front(&self) -> Option<&T> {
        self.values.front()
    }
}

impl<T: Clone> BoundedSeries<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.values.iter().cloned().collect()
    }
}

/// A tick whose congestion score exceeded the event threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CongestionEvent {
    /// Seconds since the monitor started.
    pub t: f64,
}

/// Aligned history of every sampled metric plus the congestion events.
///
/// Only the sampler appends, one entry per sequence per tick, so all five
/// sequences always have the same length.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    time: BoundedSeries<f64>,
    window_size: BoundedSeries<Option<u64>>,
    rtt_ms: BoundedSeries<Option<f64>>,
    throughput_pps: BoundedSeries<Option<f64>>,
    congestion_score: BoundedSeries<Option<f64>>,
    events: VecDeque<CongestionEvent>,
    max_events: Option<usize>,
    events_recorded: u64,
}

impl HistoryStore {
    /// `max_events` of `None` keeps every congestion event for the lifetime
    /// of the store.
    pub fn new(history_length: NonZeroUsize, max_events: Option<usize>) -> Self {
        Self {
            time: BoundedSeries::new(history_length),
            window_size: BoundedSeries::new(history_length),
            rtt_ms: BoundedSeries::new(history_length),
            throughput_pps: BoundedSeries::new(history_length),
            congestion_score: BoundedSeries::new(history_length),
            events: VecDeque::new(),
            max_events,
            events_recorded: 0,
        }
    }

    pub fn push_sample(&mut self, sample: &Sample) {
        self.time.push(sample.t);
        self.window_size.push(sample.window_size);
        self.rtt_ms.push(sample.rtt_ms);
        self.throughput_pps.push(sample.throughput_pps);
        self.congestion_score.push(sample.congestion_score);
        debug_assert!(self.is_aligned());
    }

    pub fn record_event(&mut self, event: CongestionEvent) {
        self.events_recorded += 1;
        if let Some(max) = self.max_events {
            if max == 0 {
                return;
            }
            while self.events.len() >= max {
                self.events.pop_front();
            }
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Every retained congestion event, oldest first.
    pub fn events(&self) -> &VecDeque<CongestionEvent> {
        &self.events
    }

    /// Congestion events recorded so far, evicted ones included.
    pub fn events_recorded(&self) -> u64 {
        self.events_recorded
    }

    fn is_aligned(&self) -> bool {
        let len = self.time.len();
        self.window_size.len() == len
            && self.rtt_ms.len() == len
            && self.throughput_pps.len() == len
            && self.congestion_score.len() == len
    }

    /// Immutable copy of the current history.
    ///
    /// Only the events falling inside the retained time range are copied, so
    /// the cost is bounded by the history length and not by how long the
    /// monitor has been running.
    pub fn snapshot(&self) -> HistorySnapshot {
        let oldest = self.time.front().copied().unwrap_or(f64::INFINITY);
        let in_range = self.events.iter().rev().take_while(|e| e.t >= oldest).count();
        let events = self
            .events
            .range(self.events.len() - in_range..)
            .copied()
            .collect();
        HistorySnapshot {
            time: self.time.to_vec(),
            window_size: self.window_size.to_vec(),
            rtt_ms: self.rtt_ms.to_vec(),
            throughput_pps: self.throughput_pps.to_vec(),
            congestion_score: self.congestion_score.to_vec(),
            events,
            events_recorded: self.events_recorded,
        }
    }
}

/// Point-in-time copy of [`HistoryStore`] handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySnapshot {
    pub time: Vec<f64>,
    pub window_size: Vec<Option<u64>>,
    pub rtt_ms: Vec<Option<f64>>,
    pub throughput_pps: Vec<Option<f64>>,
    pub congestion_score: Vec<Option<f64>>,
    /// Events no older than the first entry of `time`.
    pub events: Vec<CongestionEvent>,
    pub events_recorded: u64,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn sample(t: f64) -> Sample {
        Sample {
            t,
            window_size: Some(t as u64),
            rtt_ms: None,
            throughput_pps: Some(1.0),
            congestion_score: None,
        }
    }

    #[test]
    fn bounded_series_evicts_oldest() {
        let mut series = BoundedSeries::new(cap(3));
        assert_eq!(series.push(1), None);
        assert_eq!(series.push(2), None);
        assert_eq!(series.push(3), None);
        assert_eq!(series.push(4), Some(1));
        assert_eq!(series.to_vec(), vec![2, 3, 4]);
        assert_eq!(series.front(), Some(&2));
    }

    #[test]
    fn single_slot_series_never_grows() {
        let mut series = BoundedSeries::new(cap(1));
        for i in 0..50 {
            series.push(i);
            assert_eq!(series.len(), 1);
        }
        assert_eq!(series.to_vec(), vec![49]);
    }

    #[test]
    fn store_keeps_most_recent_samples() {
        let mut store = HistoryStore::new(cap(100), None);
        for i in 0..150 {
            store.push_sample(&sample(i as f64));
        }
        let snap = store.snapshot();
        assert_eq!(snap.len(), 100);
        assert_eq!(snap.window_size.len(), 100);
        assert_eq!(snap.rtt_ms.len(), 100);
        assert_eq!(snap.throughput_pps.len(), 100);
        assert_eq!(snap.congestion_score.len(), 100);
        assert_eq!(snap.time.first(), Some(&50.0));
        assert_eq!(snap.time.last(), Some(&149.0));
    }

    #[test]
    fn sequences_grow_together_until_capacity() {
        let mut store = HistoryStore::new(cap(4), None);
        for i in 0..10 {
            store.push_sample(&sample(i as f64));
            assert_eq!(store.len(), (i + 1).min(4));
            assert!(store.is_aligned());
        }
    }

    #[test]
    fn events_unbounded_by_default() {
        let mut store = HistoryStore::new(cap(2), None);
        for i in 0..500 {
            store.record_event(CongestionEvent { t: i as f64 });
        }
        assert_eq!(store.events().len(), 500);
        assert_eq!(store.events_recorded(), 500);
    }

    #[test]
    fn events_can_be_bounded() {
        let mut store = HistoryStore::new(cap(2), Some(3));
        for i in 0..5 {
            store.record_event(CongestionEvent { t: i as f64 });
        }
        let ts: Vec<_> = store.events().iter().map(|e| e.t).collect();
        assert_eq!(ts, vec![2.0, 3.0, 4.0]);
        assert_eq!(store.events_recorded(), 5);
    }

    #[test]
    fn snapshot_copies_only_events_in_retained_range() {
        let mut store = HistoryStore::new(cap(10), None);
        for i in 0..1000 {
            let t = i as f64;
            store.push_sample(&sample(t));
            store.record_event(CongestionEvent { t });
        }
        let snap = store.snapshot();
        assert_eq!(store.events().len(), 1000);
        assert_eq!(snap.events.len(), 10);
        assert_eq!(snap.events.first().map(|e| e.t), snap.time.first().copied());
        assert_eq!(snap.events.last().map(|e| e.t), Some(999.0));
        assert_eq!(snap.events_recorded, 1000);
    }

    #[test]
    fn empty_store_snapshot_has_no_events() {
        let mut store = HistoryStore::new(cap(3), None);
        store.record_event(CongestionEvent { t: 0.0 });
        let snap = store.snapshot();
        assert!(snap.is_empty());
        assert!(snap.events.is_empty());
        assert_eq!(snap.events_recorded, 1);
    }
}

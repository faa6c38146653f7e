//! Congestion scoring.
//!
//! The score combines two normalized signals with equal weight:
//!
//! - RTT pressure: `min(1, rtt / rtt_threshold)`, saturating once the RTT
//!   reaches the threshold.
//! - Window shrinkage: `1 - min(1, window / max_window_seen)`, i.e. how far the
//!   advertised window sits below the largest one seen so far.
//!
//! Both terms are clamped to `[0, 1]` before averaging, so the result is in
//! `[0, 1]` without further clamping.

use serde::Serialize;

/// The two normalized components of a congestion score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub norm_rtt: f64,
    pub norm_window: f64,
}

impl ScoreBreakdown {
    pub fn new(
        rtt_ms: f64,
        window_size: u64,
        max_window_size_seen: u64,
        rtt_threshold_ms: f64,
    ) -> Self {
        let norm_rtt = (rtt_ms / rtt_threshold_ms).min(1.0);
        let norm_window = if max_window_size_seen > 0 {
            1.0 - (window_size as f64 / max_window_size_seen as f64).min(1.0)
        } else {
            0.0
        };
        Self {
            norm_rtt,
            norm_window,
        }
    }

    pub fn score(&self) -> f64 {
        (self.norm_rtt + self.norm_window) / 2.0
    }
}

/// Computes the congestion score for the latest observation.
///
/// Returns `None` when either metric has not been observed.
pub fn congestion_score(
    rtt_ms: Option<f64>,
    window_size: Option<u64>,
    max_window_size_seen: u64,
    rtt_threshold_ms: f64,
) -> Option<f64> {
    let (rtt_ms, window_size) = (rtt_ms?, window_size?);
    Some(ScoreBreakdown::new(rtt_ms, window_size, max_window_size_seen, rtt_threshold_ms).score())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn half_rtt_half_window() {
        let b = ScoreBreakdown::new(50.0, 500, 1000, 100.0);
        assert!(approx_eq(b.norm_rtt, 0.5));
        assert!(approx_eq(b.norm_window, 0.5));
        assert!(approx_eq(b.score(), 0.5));
    }

    #[test]
    fn rtt_above_threshold_saturates() {
        let b = ScoreBreakdown::new(150.0, 100, 1000, 100.0);
        assert!(approx_eq(b.norm_rtt, 1.0));
        assert!(approx_eq(b.norm_window, 0.9));
        let score = congestion_score(Some(150.0), Some(100), 1000, 100.0).unwrap();
        assert!(approx_eq(score, 0.95));
    }

    #[test]
    fn missing_metric_has_no_score() {
        assert_eq!(congestion_score(None, Some(300), 1000, 100.0), None);
        assert_eq!(congestion_score(Some(20.0), None, 1000, 100.0), None);
        assert_eq!(congestion_score(None, None, 1000, 100.0), None);
    }

    #[test]
    fn zero_max_window_contributes_nothing() {
        let b = ScoreBreakdown::new(100.0, 10, 0, 100.0);
        assert_eq!(b.norm_window, 0.0);
        assert!(approx_eq(b.score(), 0.5));
    }

    #[test]
    fn window_above_max_is_clamped() {
        let b = ScoreBreakdown::new(0.0, 5000, 1000, 100.0);
        assert_eq!(b.norm_window, 0.0);
        assert_eq!(b.score(), 0.0);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let rtts = [0.0, 0.001, 1.0, 42.5, 99.9, 100.0, 100.1, 1e6];
        let windows = [0u64, 1, 500, 999, 1000, 1001, u32::MAX as u64];
        let maxes = [1u64, 10, 1000, 65_535];
        let thresholds = [0.5, 1.0, 100.0, 10_000.0];
        for &rtt in &rtts {
            for &w in &windows {
                for &max in &maxes {
                    for &th in &thresholds {
                        let s = congestion_score(Some(rtt), Some(w), max, th).unwrap();
                        assert!(
                            (0.0..=1.0).contains(&s),
                            "score {s} out of range for rtt={rtt} w={w} max={max} th={th}"
                        );
                    }
                }
            }
        }
    }
}

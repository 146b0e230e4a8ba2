//! Bounded per-outcome ask price history and dump detection.
//!
//! Each tracked outcome token keeps the last few observed ask prices. A
//! "dump" is a sharp one-sided drop: the most recent price sits at least
//! `threshold` below a reference price observed 1-5 seconds earlier. Slower
//! declines and sub-second jitter are both rejected.

use std::collections::VecDeque;

/// Maximum number of retained price points per outcome.
pub const HISTORY_CAPACITY: usize = 10;

/// Seconds the old reference must trail the current tick by.
const OLD_REFERENCE_LAG_SECS: i64 = 3;

/// A single observed ask price at whole-second resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

/// FIFO-bounded ask price series for one outcome token.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    points: VecDeque<PricePoint>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append an observation, evicting the oldest point past capacity.
    pub fn observe(&mut self, timestamp: i64, price: f64) {
        self.points.push_back(PricePoint { timestamp, price });
        if self.points.len() > HISTORY_CAPACITY {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series shows a qualifying dump as of `now`.
    ///
    /// The old reference is the freshest point at least 3 seconds stale
    /// (falling back to the earliest point when nothing is that old), the new
    /// reference is the freshest point overall. The pair must span 1-5
    /// seconds inclusive and the drop must be a fraction >= `threshold` of
    /// the old price.
    pub fn is_dump(&self, now: i64, threshold: f64) -> bool {
        if self.points.len() < 2 {
            return false;
        }

        let stale_cutoff = now - OLD_REFERENCE_LAG_SECS;

        let mut old: Option<PricePoint> = None;
        let mut new: Option<PricePoint> = None;
        for point in &self.points {
            if point.timestamp <= stale_cutoff
                && old.map_or(true, |o| point.timestamp > o.timestamp)
            {
                old = Some(*point);
            }
            if new.map_or(true, |n| point.timestamp > n.timestamp) {
                new = Some(*point);
            }
        }

        // No point is 3s old yet: measure from the earliest we have.
        if old.is_none() {
            old = self.points.front().copied();
        }

        let (old, new) = match (old, new) {
            (Some(o), Some(n)) => (o, n),
            _ => return false,
        };
        if old.price <= 0.0 {
            return false;
        }

        let span = new.timestamp - old.timestamp;
        if !(1..=5).contains(&span) {
            return false;
        }

        let drop = old.price - new.price;
        drop > 0.0 && drop / old.price >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_from(points: &[(i64, f64)]) -> PriceHistory {
        let mut h = PriceHistory::new();
        for &(ts, price) in points {
            h.observe(ts, price);
        }
        h
    }

    #[test]
    fn test_capacity_bounded_fifo() {
        let mut h = PriceHistory::new();
        for i in 0..25 {
            h.observe(i, 0.50);
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
        // Oldest evicted first: front should be observation 15.
        assert_eq!(h.points.front().map(|p| p.timestamp), Some(15));
        assert_eq!(h.points.back().map(|p| p.timestamp), Some(24));
    }

    #[test]
    fn test_detects_sharp_drop() {
        // 20% drop over 3 seconds.
        let h = history_from(&[(100, 0.50), (101, 0.50), (102, 0.49), (103, 0.40)]);
        assert!(h.is_dump(103, 0.15));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // Exactly 15%: 0.50 -> 0.425.
        let h = history_from(&[(100, 0.50), (103, 0.425)]);
        assert!(h.is_dump(103, 0.15));
    }

    #[test]
    fn test_rejects_slow_drift() {
        // Same 15% drop but spread over 6 seconds.
        let h = history_from(&[(100, 0.50), (106, 0.425)]);
        assert!(!h.is_dump(106, 0.15));
    }

    #[test]
    fn test_rejects_sub_second_jitter() {
        // Both points share a timestamp: span 0, outside [1, 5].
        let h = history_from(&[(100, 0.50), (100, 0.40)]);
        assert!(!h.is_dump(100, 0.15));
    }

    #[test]
    fn test_rejects_rise() {
        // 20% rise is not a dump.
        let h = history_from(&[(100, 0.50), (103, 0.60)]);
        assert!(!h.is_dump(103, 0.15));
    }

    #[test]
    fn test_rejects_small_drop() {
        // 10% drop under a 15% threshold.
        let h = history_from(&[(100, 0.50), (103, 0.45)]);
        assert!(!h.is_dump(103, 0.15));
    }

    #[test]
    fn test_rejects_zero_old_price() {
        let h = history_from(&[(100, 0.0), (103, 0.40)]);
        assert!(!h.is_dump(103, 0.15));
    }

    #[test]
    fn test_old_reference_prefers_freshest_stale_point() {
        // Points at 95 and 100 are both stale at now=103; the reference must
        // be 100 (0.50), so the drop is 20%, not measured from 95 (0.60).
        let h = history_from(&[(95, 0.60), (100, 0.50), (103, 0.40)]);
        assert!(h.is_dump(103, 0.18));
    }

    #[test]
    fn test_requires_two_points() {
        let h = history_from(&[(100, 0.50)]);
        assert!(!h.is_dump(100, 0.15));
        assert!(!PriceHistory::new().is_dump(100, 0.15));
    }
}

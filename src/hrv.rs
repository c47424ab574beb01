//! # Relaxation Metric
//!
//! Reduces a reconstructed RR sequence to one scalar through its Poincaré
//! plot: every interval is paired with its successor, `(RR[i], RR[i+1])`,
//! and the center of that scatter is estimated per axis.
//!
//! The center leaves out the one point on each axis that has no partner on
//! the other axis (the first `y` and the last `x`), then averages the rest.
//! The relaxation value is the distance of that center from the origin, in
//! seconds. Because the excluded values depend on position, the result is
//! sensitive to the order of the intervals.

use crate::timeseries::RrInterval;

/// Fewest intervals that yield two lag-1 pairs
pub const MIN_INTERVALS: usize = 3;

/// Center of the Poincaré scatter, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoincareCenter {
    pub x: f64,
    pub y: f64,
}

impl PoincareCenter {
    /// Euclidean distance from the origin
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

/// Poincaré center of `intervals`, or `None` when there are fewer than
/// [`MIN_INTERVALS`] of them.
pub fn poincare_center(intervals: &[RrInterval]) -> Option<PoincareCenter> {
    if intervals.len() < MIN_INTERVALS {
        return None;
    }

    let pairs: Vec<(f64, f64)> = intervals
        .windows(2)
        .map(|w| (w[0].value_ms, w[1].value_ms))
        .collect();
    let n = pairs.len();

    let duration_first = pairs[0].1;
    let duration_last = pairs[n - 1].0;
    let sum_x: f64 = pairs.iter().map(|p| p.0).sum();
    let sum_y: f64 = pairs.iter().map(|p| p.1).sum();

    // n >= 2 here, one value is removed from each sum
    let divisor = (n - 1) as f64;
    let center_x_ms = (sum_x - duration_last) / divisor;
    let center_y_ms = (sum_y - duration_first) / divisor;

    Some(PoincareCenter {
        x: center_x_ms / 1000.0,
        y: center_y_ms / 1000.0,
    })
}

/// Relaxation value in seconds, or `None` to skip this cycle
pub fn relaxation(intervals: &[RrInterval]) -> Option<f64> {
    let center = poincare_center(intervals)?;
    let relax = center.norm();
    log::debug!(
        "centerX (s): {:.4}, centerY (s): {:.4}, relax (s): {:.4}",
        center.x,
        center.y,
        relax
    );
    Some(relax)
}

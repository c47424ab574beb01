//! # RR Reconstruction Module
//!
//! Turns the sparse intraday heart-rate series into a dense sequence of
//! beat-to-beat (RR) intervals for the most recent window.
//!
//! ## Algorithm
//! 1. Keep the samples within `window_secs` of the latest one
//! 2. Convert each heart rate to a raw interval (`60000 / bpm` ms)
//! 3. Between two samples, emit as many copies of the previous interval as
//!    the previous heart rate predicts beats in the gap, then the current one
//! 4. Every emitted interval gets its own ±5% jitter to mimic natural
//!    beat-to-beat variability
//!
//! The random source is a parameter so a seeded `StdRng` reproduces a run.

use chrono::{NaiveDate, NaiveDateTime};
use rand::Rng;
use crate::error::ReconstructError;
use crate::timeseries::{RawSample, RrInterval, SampleSliceExt};

/// Relative jitter amplitude applied to every emitted interval
pub const JITTER: f64 = 0.05;

pub const DEFAULT_WINDOW_SECS: u32 = 60;

/// Number of beats the previous heart rate predicts inside `gap_secs`
pub fn expected_beats(gap_secs: f64, previous_bpm: f64) -> usize {
    (gap_secs * previous_bpm / 60.0).floor() as usize
}

fn jittered<R: Rng>(rr_ms: f64, rng: &mut R) -> f64 {
    rr_ms * (1.0 + rng.gen_range(-JITTER..=JITTER))
}

fn validate(window: &[RawSample]) -> Result<(), ReconstructError> {
    for sample in window {
        if !(sample.bpm.is_finite() && sample.bpm > 0.0) {
            return Err(ReconstructError::InvalidRate {
                time: sample.time,
                bpm: sample.bpm,
            });
        }
    }
    for pair in window.windows(2) {
        if pair[1].time < pair[0].time {
            return Err(ReconstructError::NegativeGap {
                previous: pair[0].time,
                current: pair[1].time,
            });
        }
    }
    Ok(())
}

/// Reconstruct the RR sequence for the last `window_secs` of `samples`.
///
/// Returns an empty sequence when fewer than two samples fall inside the
/// window. Fails without emitting anything when a sample in the window has a
/// non-positive heart rate or the window is not in chronological order.
pub fn reconstruct<R: Rng>(
    samples: &[RawSample],
    reference_date: NaiveDate,
    window_secs: u32,
    rng: &mut R,
) -> Result<Vec<RrInterval>, ReconstructError> {
    let window = samples.last_window(window_secs);
    if window.len() < 2 {
        return Ok(Vec::new());
    }
    validate(&window)?;

    let timestamp = |s: &RawSample| NaiveDateTime::new(reference_date, s.time);
    let mut intervals = Vec::with_capacity(window.len());
    let mut push = |value_ms: f64| {
        let index = intervals.len() + 1;
        intervals.push(RrInterval { index, value_ms });
    };

    push(jittered(window[0].rr_ms(), rng));

    for pair in window.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        let gap = timestamp(current) - timestamp(previous);
        let gap_secs = gap.num_milliseconds() as f64 / 1000.0;

        let previous_rr = previous.rr_ms();
        for _ in 0..expected_beats(gap_secs, previous.bpm) {
            push(jittered(previous_rr, rng));
        }
        push(jittered(current.rr_ms(), rng));
    }

    log::debug!(
        "Reconstructed {} RR intervals from {} samples",
        intervals.len(),
        window.len()
    );
    Ok(intervals)
}

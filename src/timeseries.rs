//! Sample and interval types shared by the fetcher, the reconstruction and
//! the metric calculator.

use chrono::NaiveTime;
use serde::Deserialize;

/// One point of the provider's intraday heart-rate dataset
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSample {
    /// Time of day on the fetch date
    pub time: NaiveTime,
    /// Beats per minute
    #[serde(rename = "value")]
    pub bpm: f64,
}

impl RawSample {
    #[cfg(test)]
    pub fn new(time: NaiveTime, bpm: f64) -> Self {
        Self { time, bpm }
    }

    /// Raw beat-to-beat interval in milliseconds implied by the heart rate
    pub fn rr_ms(&self) -> f64 {
        60_000.0 / self.bpm
    }
}

/// A reconstructed beat-to-beat interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrInterval {
    /// 1-based position in the reconstructed sequence
    pub index: usize,
    pub value_ms: f64,
}

pub trait SampleSliceExt {
    /// Samples whose distance to the last sample lies in `[0, window_secs]`
    fn last_window(&self, window_secs: u32) -> Vec<RawSample>;
}

impl SampleSliceExt for [RawSample] {
    fn last_window(&self, window_secs: u32) -> Vec<RawSample> {
        let Some(latest) = self.last() else {
            return Vec::new();
        };
        let window = chrono::Duration::seconds(i64::from(window_secs));

        self.iter()
            .filter(|s| {
                let age = latest.time - s.time;
                age >= chrono::Duration::zero() && age <= window
            })
            .cloned()
            .collect()
    }
}

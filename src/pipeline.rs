//! # Poll Cycle Module
//!
//! One cycle: read credentials → fetch today's samples → reconstruct RR
//! intervals → compute the relaxation value → append it to the record log.
//!
//! A cycle reads everything it needs fresh from the stores; nothing carries
//! over between cycles except the jitter generator.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use crate::credentials::CredentialStore;
use crate::error::CycleError;
use crate::fetcher::SampleFetcher;
use crate::hrv;
use crate::reconstruction;
use crate::records::{RecordLog, RelaxationRecord};

/// Why a cycle ended without writing a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than two samples in the window
    TooFewSamples,
    /// Fewer than three reconstructed intervals
    TooFewIntervals,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Recorded(RelaxationRecord),
    Skipped(SkipReason),
}

/// Something the scheduler can run once per tick
#[async_trait]
pub trait PollCycle: Send + Sync + 'static {
    async fn run_cycle(&self) -> Result<CycleOutcome, CycleError>;
}

/// Source of "today" for the data request
pub type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct Pipeline {
    credentials: Arc<dyn CredentialStore>,
    records: Arc<RecordLog>,
    fetcher: SampleFetcher,
    window_secs: u32,
    rng: Mutex<StdRng>,
    today: Clock,
}

impl Pipeline {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        records: Arc<RecordLog>,
        fetcher: SampleFetcher,
        window_secs: u32,
        jitter_seed: Option<u64>,
    ) -> Self {
        let rng = match jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            credentials,
            records,
            fetcher,
            window_secs,
            rng: Mutex::new(rng),
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the date source to pin the fetch date
    #[cfg(test)]
    pub fn with_clock(mut self, today: Clock) -> Self {
        self.today = today;
        self
    }

    async fn cycle(&self) -> Result<CycleOutcome, CycleError> {
        let credentials = self.credentials.read().await?;
        match self.records.latest().await {
            Ok(Some(previous)) => log::info!(
                "Latest stored relaxation: {} = {:.4} s at {}",
                previous.sequence_id,
                previous.value,
                previous.timestamp
            ),
            Ok(None) => log::info!("No relaxation records stored yet"),
            Err(e) => log::warn!("Could not read latest record: {}", e),
        }

        let date = (self.today)();
        let samples = self
            .fetcher
            .fetch_today(&credentials, self.credentials.as_ref(), date)
            .await?;

        let intervals = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            reconstruction::reconstruct(&samples, date, self.window_secs, &mut *rng)?
        };
        if intervals.is_empty() {
            return Ok(CycleOutcome::Skipped(SkipReason::TooFewSamples));
        }

        let Some(value) = hrv::relaxation(&intervals) else {
            return Ok(CycleOutcome::Skipped(SkipReason::TooFewIntervals));
        };

        let record = self.records.append(value).await?;
        Ok(CycleOutcome::Recorded(record))
    }
}

#[async_trait]
impl PollCycle for Pipeline {
    async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        self.cycle().await
    }
}

//! # Poll Scheduler Module
//!
//! Drives the poll cycle: once immediately, then on a fixed period, until the
//! cancellation token fires.
//!
//! ## Key Components
//! - `PollScheduler`: owns the timer loop and the in-flight cycle tasks
//! - `CycleMode`: whether overlapping cycles are allowed
//!
//! ## Overlap
//! A cycle that outlives the period would otherwise run alongside the next
//! one, racing on sequence ids and on token rotation. In `Serialized` mode a
//! one-permit semaphore gates cycles and a tick that finds a cycle running is
//! skipped. `Overlapping` mode starts a cycle on every tick regardless.
//!
//! Failures are logged and never stop the loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use crate::config::CycleMode;
use crate::error::CycleError;
use crate::pipeline::{CycleOutcome, PollCycle, SkipReason};

pub struct PollScheduler<C: PollCycle> {
    cycle: Arc<C>,
    period: Duration,
    mode: CycleMode,
    gate: Arc<Semaphore>,
}

impl<C: PollCycle> PollScheduler<C> {
    pub fn new(cycle: Arc<C>, period: Duration, mode: CycleMode) -> Self {
        Self {
            cycle,
            period,
            mode,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Run until `shutdown` is cancelled, then cancel and await in-flight cycles.
    ///
    /// Returns the number of cycles started.
    pub async fn run(self, shutdown: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks = JoinSet::new();
        let mut started = 0usize;

        log::info!(
            "Poll scheduler started: every {:?}, {:?} cycles",
            self.period,
            self.mode
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                // The first tick completes immediately
                _ = ticker.tick() => {
                    if self.spawn_cycle(&mut tasks, &shutdown, started + 1) {
                        started += 1;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("Poll cycle task failed: {}", e);
                    }
                }
            }
        }

        log::info!("Poll scheduler: shutdown requested, waiting for {} cycle(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Poll cycle task failed: {}", e);
            }
        }
        log::info!("Poll scheduler stopped after {} cycle(s)", started);
        started
    }

    fn spawn_cycle(
        &self,
        tasks: &mut JoinSet<()>,
        shutdown: &CancellationToken,
        number: usize,
    ) -> bool {
        let permit = match self.mode {
            CycleMode::Serialized => match self.gate.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    log::warn!("Previous poll cycle still running; skipping this tick");
                    return false;
                }
            },
            CycleMode::Overlapping => None,
        };

        let cycle = self.cycle.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                _ = shutdown.cancelled() => Err(CycleError::Cancelled),
                result = cycle.run_cycle() => result,
            };
            report(number, result);
        });
        true
    }
}

fn report(number: usize, result: Result<CycleOutcome, CycleError>) {
    match result {
        Ok(CycleOutcome::Recorded(record)) => log::info!(
            "Cycle {}: relaxation {:.4} s saved as {}",
            number,
            record.value,
            record.sequence_id
        ),
        Ok(CycleOutcome::Skipped(SkipReason::TooFewSamples)) => {
            log::info!("Cycle {}: fewer than two samples in window, skipping", number)
        }
        Ok(CycleOutcome::Skipped(SkipReason::TooFewIntervals)) => {
            log::info!("Cycle {}: not enough RR intervals, skipping", number)
        }
        Err(CycleError::Cancelled) => log::info!("Cycle {}: cancelled", number),
        Err(e) => log::error!("Cycle {}: {}", number, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cycle that sleeps and tracks how many runs overlap
    struct SlowCycle {
        duration: Duration,
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: bool,
    }

    impl SlowCycle {
        fn new(duration: Duration) -> Self {
            Self {
                duration,
                runs: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl PollCycle for SlowCycle {
        async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(CycleError::Fetch(crate::error::FetchError::Status(500)))
            } else {
                Ok(CycleOutcome::Skipped(SkipReason::TooFewSamples))
            }
        }
    }

    async fn run_for(
        cycle: Arc<SlowCycle>,
        period: Duration,
        mode: CycleMode,
        total: Duration,
    ) -> usize {
        let shutdown = CancellationToken::new();
        let scheduler = PollScheduler::new(cycle, period, mode);
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::time::sleep(total).await;
        shutdown.cancel();
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn test_first_cycle_runs_immediately() {
        let cycle = Arc::new(SlowCycle::new(Duration::from_millis(1)));
        let started = run_for(
            cycle.clone(),
            Duration::from_secs(3600),
            CycleMode::Serialized,
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(started, 1);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_serialized_mode_never_overlaps() {
        let cycle = Arc::new(SlowCycle::new(Duration::from_millis(50)));
        run_for(
            cycle.clone(),
            Duration::from_millis(10),
            CycleMode::Serialized,
            Duration::from_millis(300),
        )
        .await;

        assert!(cycle.runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(cycle.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlapping_mode_overlaps() {
        let cycle = Arc::new(SlowCycle::new(Duration::from_millis(100)));
        run_for(
            cycle.clone(),
            Duration::from_millis(10),
            CycleMode::Overlapping,
            Duration::from_millis(200),
        )
        .await;

        assert!(cycle.max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let mut slow = SlowCycle::new(Duration::from_millis(1));
        slow.fail = true;
        let cycle = Arc::new(slow);
        run_for(
            cycle.clone(),
            Duration::from_millis(20),
            CycleMode::Serialized,
            Duration::from_millis(150),
        )
        .await;

        assert!(cycle.runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_cycle() {
        let cycle = Arc::new(SlowCycle::new(Duration::from_secs(3600)));
        let started = tokio::time::timeout(
            Duration::from_secs(5),
            run_for(
                cycle.clone(),
                Duration::from_secs(3600),
                CycleMode::Serialized,
                Duration::from_millis(50),
            ),
        )
        .await
        .expect("scheduler should stop promptly");

        assert_eq!(started, 1);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    }
}

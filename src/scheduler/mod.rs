//! Decides which hours are due and drives the per-hour pipeline.

pub mod clock;

pub use clock::{Clock, SystemClock, WaitOutcome};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::ProcessingWindow;
use crate::processors::{HourProcessor, RangeSummary};
use crate::utils::constants::BACKFILL_HOURS;
use crate::utils::time::{available_at, last_complete_hour, one_hour};
use crate::utils::ProgressReporter;

/// The hourly scheduler.
///
/// One invocation runs in exactly one of three modes: an explicit range
/// (processed once, then `run` returns), a first run (one week of backfill
/// followed by the continuous loop), or the continuous loop alone. Hours are
/// never retried: a failed hour is logged and the pointer moves on.
pub struct CalculationEngine<P, C> {
    processor: P,
    clock: C,
    show_progress: bool,
}

impl<P: HourProcessor, C: Clock> CalculationEngine<P, C> {
    pub fn new(processor: P, clock: C) -> Self {
        Self {
            processor,
            clock,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub async fn run(
        &mut self,
        first_run: bool,
        explicit_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        station_filter: Option<&HashSet<String>>,
    ) -> Result<RangeSummary> {
        if let Some((start, end)) = explicit_range {
            if first_run {
                return Err(ProcessingError::InvalidConfig(
                    "An explicit range cannot be combined with a first run".to_string(),
                ));
            }
            return Ok(self.process_range(start, end, station_filter).await);
        }

        let mut summary = RangeSummary::default();
        let mut pointer = None;
        if first_run {
            let last = last_complete_hour(self.clock.now());
            let start = last - Duration::hours(BACKFILL_HOURS);
            info!(from = %start, to = %last, "First run: backfilling the last week");
            summary.merge(self.process_range(start, last, station_filter).await);
            if summary.interrupted {
                return Ok(summary);
            }
            // Continue from where the backfill stopped so hours that became
            // due during the backfill are not skipped.
            pointer = Some(last);
        }

        summary.merge(self.run_continuous(pointer, station_filter).await);
        Ok(summary)
    }

    /// Process `[start, end)` hour by hour.
    pub async fn process_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        station_filter: Option<&HashSet<String>>,
    ) -> RangeSummary {
        if start >= end {
            warn!(%start, %end, "Empty processing range");
            return RangeSummary::default();
        }
        let hours = ((end - start).num_minutes() + 59) / 60;
        info!(%start, %end, hours, "Processing range");
        let progress = ProgressReporter::new(hours.max(0) as u64, "Processing hours", !self.show_progress);
        let clock = &self.clock;
        let stop = || clock.shutdown_requested();
        self.processor
            .process_time_range_until(start, end, station_filter, &progress, &stop)
            .await
    }

    /// Process every due hour starting at `pointer` (or at the last complete
    /// hour), then keep following the clock until shutdown.
    pub async fn run_continuous(
        &mut self,
        pointer: Option<DateTime<Utc>>,
        station_filter: Option<&HashSet<String>>,
    ) -> RangeSummary {
        let mut summary = RangeSummary::default();
        let mut next_due = pointer.unwrap_or_else(|| last_complete_hour(self.clock.now()));

        loop {
            while next_due <= last_complete_hour(self.clock.now()) {
                let window = ProcessingWindow::starting_at(next_due);
                if self.clock.shutdown_requested() {
                    info!(next = %window.label(), "Shutdown requested during catch-up");
                    summary.interrupted = true;
                    return summary;
                }
                let result = self.processor.process_hour(window, station_filter).await;
                summary.record(&window, result);
                next_due += one_hour();
            }

            let wake_at = available_at(next_due);
            info!(next = %ProcessingWindow::starting_at(next_due).label(), %wake_at, "Caught up, waiting");
            if self.clock.sleep_until(wake_at).await == WaitOutcome::Shutdown {
                info!(
                    rendered = summary.rendered.len(),
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Scheduler stopped"
                );
                return summary;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RenderedMap;
    use crate::processors::HourOutcome;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct Recorder {
        seen: Vec<DateTime<Utc>>,
    }

    #[async_trait]
    impl HourProcessor for Recorder {
        async fn process_hour(
            &mut self,
            window: ProcessingWindow,
            _station_filter: Option<&HashSet<String>>,
        ) -> Result<HourOutcome> {
            self.seen.push(window.start());
            Ok(HourOutcome::Rendered(RenderedMap {
                path: PathBuf::from(window.label()),
                value_range: (0, 14),
            }))
        }
    }

    /// Each wait jumps to the deadline plus `overshoot`; shuts down after `waits` waits.
    struct SteppingClock {
        now: Mutex<DateTime<Utc>>,
        overshoot: Duration,
        waits: Mutex<usize>,
    }

    #[async_trait]
    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep_until(&self, deadline: DateTime<Utc>) -> WaitOutcome {
            let mut waits = self.waits.lock().unwrap();
            if *waits == 0 {
                return WaitOutcome::Shutdown;
            }
            *waits -= 1;
            let mut now = self.now.lock().unwrap();
            *now = (*now).max(deadline) + self.overshoot;
            WaitOutcome::Elapsed
        }
    }

    /// Fixed time; reports a shutdown once `checks_left` checks have passed.
    struct InterruptingClock {
        now: DateTime<Utc>,
        checks_left: Mutex<usize>,
        sleeps: Mutex<usize>,
    }

    impl InterruptingClock {
        fn new(now: DateTime<Utc>, checks_before_shutdown: usize) -> Self {
            Self {
                now,
                checks_left: Mutex::new(checks_before_shutdown),
                sleeps: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Clock for InterruptingClock {
        fn now(&self) -> DateTime<Utc> {
            self.now
        }

        fn shutdown_requested(&self) -> bool {
            let mut left = self.checks_left.lock().unwrap();
            if *left == 0 {
                return true;
            }
            *left -= 1;
            false
        }

        async fn sleep_until(&self, _deadline: DateTime<Utc>) -> WaitOutcome {
            *self.sleeps.lock().unwrap() += 1;
            WaitOutcome::Shutdown
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, minute, 0).unwrap()
    }

    fn engine(now: DateTime<Utc>, overshoot: Duration, waits: usize) -> CalculationEngine<Recorder, SteppingClock> {
        CalculationEngine::new(
            Recorder { seen: Vec::new() },
            SteppingClock {
                now: Mutex::new(now),
                overshoot,
                waits: Mutex::new(waits),
            },
        )
    }

    #[tokio::test]
    async fn test_explicit_range_is_terminal() {
        let mut engine = engine(at(10, 12, 0), Duration::zero(), 5);
        let summary = engine.run(false, Some((at(1, 0, 0), at(1, 3, 0))), None).await.unwrap();
        assert_eq!(engine.processor().seen, vec![at(1, 0, 0), at(1, 1, 0), at(1, 2, 0)]);
        assert_eq!(summary.rendered.len(), 3);
    }

    #[tokio::test]
    async fn test_continuous_processes_each_hour_once_in_order() {
        // Late start at 10:45; waits overshoot by 2h50m to simulate a stalled host.
        let mut engine = engine(at(1, 10, 45), Duration::minutes(170), 3);
        engine.run(false, None, None).await.unwrap();

        let seen = &engine.processor().seen;
        assert_eq!(seen.first(), Some(&at(1, 10, 0)));
        for pair in seen.windows(2) {
            assert_eq!(pair[1] - pair[0], one_hour());
        }
        // After three waits the clock reads 20:20, so 19:00 is the last due hour.
        assert_eq!(seen.last(), Some(&at(1, 19, 0)));
    }

    #[tokio::test]
    async fn test_availability_lag_before_half_past() {
        let mut before = engine(at(1, 10, 29), Duration::zero(), 0);
        let mut after = engine(at(1, 10, 30), Duration::zero(), 0);
        before.run(false, None, None).await.unwrap();
        after.run(false, None, None).await.unwrap();
        assert_eq!(before.processor().seen, vec![at(1, 9, 0)]);
        assert_eq!(after.processor().seen, vec![at(1, 10, 0)]);
    }

    #[tokio::test]
    async fn test_first_run_backfills_week_then_continues_without_gap() {
        let mut engine = engine(at(8, 12, 40), Duration::zero(), 1);
        engine.run(true, None, None).await.unwrap();

        let seen = &engine.processor().seen;
        assert_eq!(seen.len(), 168 + 2);
        assert_eq!(seen[0], at(1, 12, 0));
        assert_eq!(seen[167], at(8, 11, 0));
        assert_eq!(seen[168], at(8, 12, 0));
        assert_eq!(seen[169], at(8, 13, 0));
    }

    #[tokio::test]
    async fn test_range_and_first_run_conflict() {
        let mut engine = engine(at(1, 12, 0), Duration::zero(), 0);
        let result = engine.run(true, Some((at(1, 0, 0), at(1, 2, 0))), None).await;
        assert!(matches!(result, Err(ProcessingError::InvalidConfig(_))));
        assert!(engine.processor().seen.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_explicit_range_between_hours() {
        let mut engine = CalculationEngine::new(Recorder { seen: Vec::new() }, InterruptingClock::new(at(10, 12, 0), 3));
        let summary = engine.run(false, Some((at(1, 0, 0), at(1, 10, 0))), None).await.unwrap();

        assert_eq!(engine.processor().seen, vec![at(1, 0, 0), at(1, 1, 0), at(1, 2, 0)]);
        assert_eq!(summary.rendered.len(), 3);
        assert!(summary.interrupted);
    }

    #[tokio::test]
    async fn test_shutdown_during_backfill_skips_continuous_loop() {
        let mut engine = CalculationEngine::new(Recorder { seen: Vec::new() }, InterruptingClock::new(at(8, 12, 40), 5));
        let summary = engine.run(true, None, None).await.unwrap();

        assert_eq!(engine.processor().seen.len(), 5);
        assert_eq!(engine.processor().seen[0], at(1, 12, 0));
        assert!(summary.interrupted);
        assert_eq!(*engine.clock.sleeps.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_catch_up_burst() {
        let mut engine = CalculationEngine::new(Recorder { seen: Vec::new() }, InterruptingClock::new(at(1, 20, 40), 4));
        let summary = engine.run_continuous(Some(at(1, 6, 0)), None).await;

        assert_eq!(
            engine.processor().seen,
            vec![at(1, 6, 0), at(1, 7, 0), at(1, 8, 0), at(1, 9, 0)]
        );
        assert!(summary.interrupted);
        assert_eq!(*engine.clock.sleeps.lock().unwrap(), 0);
    }
}

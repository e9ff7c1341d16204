//! Volt Scheduler - fires the weekly maintenance jobs.
//!
//! Stock replenishment and volt decay run on independent calendar
//! schedules (default: Tuesday 00:00 UTC). The firing instant is computed
//! from "now" on every loop iteration, so a delayed or missed firing still
//! runs at the next wake-up; both jobs are idempotent, which makes the
//! at-least-once delivery safe. Batch jobs act with system-level authority
//! and do not consult access rules.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use volt_bazaar::BazaarEconomy;
use volt_ledger::PointsLedger;

/// Scheduler-related errors. Only surfaced while loading configuration.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Day of week for a job schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl ScheduleDay {
    fn to_chrono(self) -> Weekday {
        match self {
            ScheduleDay::Monday => Weekday::Mon,
            ScheduleDay::Tuesday => Weekday::Tue,
            ScheduleDay::Wednesday => Weekday::Wed,
            ScheduleDay::Thursday => Weekday::Thu,
            ScheduleDay::Friday => Weekday::Fri,
            ScheduleDay::Saturday => Weekday::Sat,
            ScheduleDay::Sunday => Weekday::Sun,
        }
    }
}

/// A weekly firing instant: day of week plus UTC time of day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawJobSchedule")]
pub struct JobSchedule {
    day: ScheduleDay,
    hour: u8,
    minute: u8,
}

#[derive(Deserialize)]
struct RawJobSchedule {
    day: ScheduleDay,
    #[serde(default)]
    hour: u8,
    #[serde(default)]
    minute: u8,
}

impl TryFrom<RawJobSchedule> for JobSchedule {
    type Error = SchedulerError;

    fn try_from(raw: RawJobSchedule) -> Result<Self, Self::Error> {
        JobSchedule::new(raw.day, raw.hour, raw.minute)
    }
}

impl JobSchedule {
    pub fn new(day: ScheduleDay, hour: u8, minute: u8) -> Result<Self, SchedulerError> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{hour:02}:{minute:02} is not a time of day"
            )));
        }
        Ok(Self { day, hour, minute })
    }

    /// The first firing instant strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .expect("constructor validated the time of day");

        let target = i64::from(self.day.to_chrono().num_days_from_monday());
        let current = i64::from(after.weekday().num_days_from_monday());
        let days_ahead = (target - current).rem_euclid(7);

        let candidate = (after.date_naive() + chrono::Duration::days(days_ahead))
            .and_time(time)
            .and_utc();
        if candidate <= after {
            candidate + chrono::Duration::days(7)
        } else {
            candidate
        }
    }
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            day: ScheduleDay::Tuesday,
            hour: 0,
            minute: 0,
        }
    }
}

/// Scheduler configuration: one schedule per maintenance job.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub replenish: JobSchedule,
    #[serde(default)]
    pub decay: JobSchedule,
}

/// Receivers for the manual trigger channels, handed to [`Scheduler::start`].
pub struct JobTriggers {
    replenish_rx: mpsc::Receiver<()>,
    decay_rx: mpsc::Receiver<()>,
}

/// The maintenance scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    bazaar: BazaarEconomy,
    ledger: PointsLedger,
    replenish_tx: mpsc::Sender<()>,
    decay_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        config: SchedulerConfig,
        bazaar: BazaarEconomy,
        ledger: PointsLedger,
    ) -> (Arc<Self>, JobTriggers) {
        let (replenish_tx, replenish_rx) = mpsc::channel(4);
        let (decay_tx, decay_rx) = mpsc::channel(4);

        let scheduler = Arc::new(Self {
            config,
            bazaar,
            ledger,
            replenish_tx,
            decay_tx,
            running: Arc::new(RwLock::new(false)),
        });

        (
            scheduler,
            JobTriggers {
                replenish_rx,
                decay_rx,
            },
        )
    }

    /// Request an immediate replenishment run.
    pub async fn trigger_replenishment(&self) {
        let _ = self.replenish_tx.send(()).await;
    }

    /// Request an immediate decay run.
    pub async fn trigger_decay(&self) {
        let _ = self.decay_tx.send(()).await;
    }

    /// Run both job loops until stopped.
    pub async fn start(self: Arc<Self>, triggers: JobTriggers) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        tracing::info!("scheduler started");

        let replenisher = self.clone();
        let mut replenish_rx = triggers.replenish_rx;
        let replenish_handle = tokio::spawn(async move {
            loop {
                let next = replenisher.config.replenish.next_fire(Utc::now());
                let delay = (next - Utc::now()).to_std().unwrap_or_default();

                tokio::select! {
                    _ = sleep(delay) => replenisher.run_replenishment().await,
                    Some(_) = replenish_rx.recv() => replenisher.run_replenishment().await,
                    else => break,
                }

                if !*replenisher.running.read().await {
                    break;
                }
            }
        });

        let decayer = self.clone();
        let mut decay_rx = triggers.decay_rx;
        let decay_handle = tokio::spawn(async move {
            loop {
                let next = decayer.config.decay.next_fire(Utc::now());
                let delay = (next - Utc::now()).to_std().unwrap_or_default();

                tokio::select! {
                    _ = sleep(delay) => decayer.run_decay().await,
                    Some(_) = decay_rx.recv() => decayer.run_decay().await,
                    else => break,
                }

                if !*decayer.running.read().await {
                    break;
                }
            }
        });

        tokio::select! {
            _ = replenish_handle => {}
            _ = decay_handle => {}
        }
        tracing::info!("scheduler stopped");
    }

    /// Stop the job loops after their current iteration.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    async fn run_replenishment(&self) {
        tracing::info!("starting stock replenishment");
        match self.bazaar.replenish_all().await {
            Ok(outcome) => tracing::info!(
                touched = outcome.touched,
                failed = outcome.failures.len(),
                "stock replenishment completed"
            ),
            Err(err) => tracing::error!(error = %err, "stock replenishment failed"),
        }
    }

    async fn run_decay(&self) {
        tracing::info!("starting volt decay");
        match self.ledger.decay_all().await {
            Ok(outcome) => tracing::info!(
                touched = outcome.touched,
                failed = outcome.failures.len(),
                "volt decay completed"
            ),
            Err(err) => tracing::error!(error = %err, "volt decay failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use volt_storage::memory::InMemoryVoltStore;
    use volt_storage::BazaarStore;
    use volt_types::BazaarItemRecord;

    fn tuesday_midnight() -> JobSchedule {
        JobSchedule::default()
    }

    #[test]
    fn next_fire_lands_on_the_coming_tuesday() {
        // Monday 2026-08-03 12:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let next = tuesday_midnight().next_fire(after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_same_day_before_the_time() {
        let schedule = JobSchedule::new(ScheduleDay::Tuesday, 12, 0).unwrap();
        // Tuesday 2026-08-04 10:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 8, 4, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_fire(after),
            Utc.with_ymd_and_hms(2026, 8, 4, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_fire_wraps_to_next_week() {
        let schedule = JobSchedule::new(ScheduleDay::Tuesday, 12, 0).unwrap();
        // Tuesday 2026-08-04 13:00 UTC, already past the firing time.
        let after = Utc.with_ymd_and_hms(2026, 8, 4, 13, 0, 0).unwrap();
        assert_eq!(
            schedule.next_fire(after),
            Utc.with_ymd_and_hms(2026, 8, 11, 12, 0, 0).unwrap()
        );

        // The exact instant fires next week, not twice.
        let at = Utc.with_ymd_and_hms(2026, 8, 4, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.next_fire(at),
            Utc.with_ymd_and_hms(2026, 8, 11, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn out_of_range_times_are_rejected() {
        assert!(JobSchedule::new(ScheduleDay::Monday, 24, 0).is_err());
        assert!(JobSchedule::new(ScheduleDay::Monday, 0, 60).is_err());
    }

    #[tokio::test]
    async fn manual_trigger_runs_the_job() {
        let store = Arc::new(InMemoryVoltStore::new());
        let item = store
            .insert_item(BazaarItemRecord::new("Late Bedtime", 40, 0, 7))
            .await
            .unwrap();

        let ledger = PointsLedger::new(store.clone());
        let bazaar = BazaarEconomy::new(store.clone(), ledger.clone());
        let (scheduler, triggers) = Scheduler::new(SchedulerConfig::default(), bazaar, ledger);

        tokio::spawn(scheduler.clone().start(triggers));
        scheduler.trigger_replenishment().await;

        let mut replenished = false;
        for _ in 0..100 {
            let current = store.get_item(&item.id).await.unwrap().unwrap();
            if current.stock == 7 {
                replenished = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(replenished, "trigger should have replenished the item");

        scheduler.stop().await;
    }
}

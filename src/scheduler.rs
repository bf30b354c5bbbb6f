//! Daily scheduled generation.
//!
//! One background task ticks every [`TICK`] and fires the first enabled
//! schedule whose local hour and minute match. A trigger key of date plus
//! minute-of-day stops the same minute from firing twice.

use crate::config::{ApiConfig, Schedule};
use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const TICK: Duration = Duration::from_secs(30);

/// `YYYY-M-D_minuteOfDay` for `now`.
pub fn trigger_key<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!(
        "{}-{}-{}_{}",
        now.year(),
        now.month(),
        now.day(),
        now.hour() * 60 + now.minute()
    )
}

/// First enabled schedule set for `now`'s hour and minute.
pub fn due_schedule<'a, Tz: TimeZone>(schedules: &'a [Schedule], now: &DateTime<Tz>) -> Option<&'a Schedule> {
    schedules
        .iter()
        .find(|s| s.enabled && s.hour == now.hour() && s.minute == now.minute())
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    Idle,
    /// Due, but a run is already in progress; the minute stays eligible.
    Busy,
    Fire(Schedule),
}

/// Pure per-tick decision; records the trigger key when firing.
#[derive(Debug, Default)]
pub struct Trigger {
    last_key: String,
}

impl Trigger {
    pub fn tick<Tz: TimeZone>(&mut self, schedules: &[Schedule], now: &DateTime<Tz>, running: bool) -> TickAction {
        let key = trigger_key(now);
        if key == self.last_key {
            return TickAction::Idle;
        }
        let Some(schedule) = due_schedule(schedules, now) else {
            return TickAction::Idle;
        };
        if running {
            return TickAction::Busy;
        }
        self.last_key = key;
        TickAction::Fire(schedule.clone())
    }
}

/// Owns the scheduling task; re-arming replaces it.
#[derive(Debug)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    config_path: PathBuf,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config_path: PathBuf) -> Self {
        Self {
            orchestrator,
            config_path,
            task: Mutex::new(None),
        }
    }

    /// Stop the current task and start one for `config`'s enabled schedules.
    pub fn arm(&self, config: &ApiConfig) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = task.take() {
            old.abort();
        }

        let schedules: Vec<Schedule> = config.schedules.iter().filter(|s| s.enabled).cloned().collect();
        if schedules.is_empty() {
            debug!("No enabled schedules");
            return;
        }
        for s in &schedules {
            info!(
                schedule = s.name(),
                at = %format!("{:02}:{:02}", s.hour, s.minute),
                hours = s.hours,
                top_n = s.top_n,
                "Daily schedule armed"
            );
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let config_path = self.config_path.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut trigger = Trigger::default();
            loop {
                ticker.tick().await;
                let now = Local::now();
                let running = orchestrator.generation().is_running();
                match trigger.tick(&schedules, &now, running) {
                    TickAction::Idle => {}
                    TickAction::Busy => debug!("Schedule due but a run is in progress; skipping"),
                    TickAction::Fire(schedule) => fire(&orchestrator, &config_path, &schedule),
                }
            }
        }));
    }
}

fn fire(orchestrator: &Arc<Orchestrator>, config_path: &std::path::Path, schedule: &Schedule) {
    // the key may have changed since arming
    let config = match ApiConfig::load(config_path) {
        Ok(Some(c)) if !c.api_key.trim().is_empty() => c,
        Ok(_) => {
            warn!(schedule = schedule.name(), "Schedule due but no API key is configured");
            return;
        }
        Err(e) => {
            error!(schedule = schedule.name(), error = %e, "Could not load config for schedule");
            return;
        }
    };
    info!(schedule = schedule.name(), "Triggering scheduled generation");
    let opts = config.schedule_options(schedule);
    match orchestrator.start_digest_generation(&config.api_key, &opts, schedule.hours, schedule.top_n) {
        Ok(handle) => {
            let name = schedule.name().to_string();
            tokio::spawn(async move {
                if let Ok(Err(e)) = handle.await {
                    warn!(schedule = %name, error = %e, "Scheduled generation failed");
                }
            });
        }
        Err(e) => warn!(schedule = schedule.name(), error = %e, "Scheduled generation not started"),
    }
}

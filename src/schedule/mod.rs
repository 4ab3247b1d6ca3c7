// Schedule module - cron-driven forced restarts

mod cron;

pub use cron::CronSchedule;

use crate::process::controller::ControllerMessage;
use crate::process::restart::RestartCause;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default polling interval of the trigger task
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Fires at most once per matching minute of a cron schedule
#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    schedule: CronSchedule,
    last_fired: Option<NaiveDateTime>,
}

impl ScheduleTrigger {
    pub fn new(schedule: CronSchedule) -> Self {
        Self {
            schedule,
            last_fired: None,
        }
    }

    /// Returns true when `now` falls in a matching minute that has not fired yet
    pub fn poll<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> bool {
        if !self.schedule.matches(now) {
            return false;
        }

        let naive = now.naive_local();
        let minute = naive
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(naive);

        if self.last_fired == Some(minute) {
            return false;
        }

        self.last_fired = Some(minute);
        true
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }
}

/// Spawn the ticking task that turns schedule matches into forced restarts
pub(crate) fn spawn_trigger(
    app: String,
    mut trigger: ScheduleTrigger,
    tick: Duration,
    events: mpsc::Sender<ControllerMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Cron restart enabled for '{}' ({})",
            app,
            trigger.schedule()
        );

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if trigger.poll(&chrono::Local::now()) {
                        info!("Cron schedule matched for '{}', requesting restart", app);
                        let msg = ControllerMessage::ForcedRestart(RestartCause::Schedule);
                        if events.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        debug!("Schedule trigger for '{}' stopped", app);
    })
}

//! Background delivery loop.
//!
//! One scheduler task serves every guild. Each pass drains the reminders
//! that have come due, then sleeps until the next one could: the wake
//! interval is the smallest whole-minute gap to any pending reminder,
//! floored at one minute so a burst of imminent reminders never busy-loops
//! the task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info};
use tokio::sync::watch;

use crate::guild::GuildRegistry;
use crate::platform::ChatPlatform;

const MIN_WAKE_MINUTES: i64 = 1;

pub struct ReminderScheduler {
    registry: Arc<GuildRegistry>,
    platform: Arc<dyn ChatPlatform>,
    shutdown: watch::Receiver<bool>,
}

impl ReminderScheduler {
    pub fn new(
        registry: Arc<GuildRegistry>,
        platform: Arc<dyn ChatPlatform>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ReminderScheduler {
            registry,
            platform,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("reminder scheduler started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            // The clock is read once per pass so every guild sees the
            // same notion of "now".
            let now = Local::now().naive_local();
            let wait = self.scan(now).await;
            debug!("scheduler sleeping for {wait} minute(s)");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait as u64 * 60)) => {}
                _ = self.shutdown.changed() => {}
            }
        }
        info!("reminder scheduler stopped");
    }

    /// Delivers everything due at `now` and returns the minutes to sleep
    /// before the next pass. A failed delivery is logged and dropped; it
    /// never stalls the pass or the other reminders.
    pub async fn scan(&self, now: chrono::NaiveDateTime) -> i64 {
        let mut next: Option<i64> = None;
        for state in self.registry.states() {
            for reminder in state.due_reminders(now).await {
                debug!(
                    "guild {}: delivering reminder for user {}",
                    state.guild(),
                    reminder.user
                );
                if let Err(e) = self
                    .platform
                    .send_message(reminder.channel, &reminder.delivery_text(), false)
                    .await
                {
                    error!(
                        "guild {}: failed to deliver reminder for user {}: {e:#}",
                        state.guild(),
                        reminder.user
                    );
                }
            }
            if let Some(minutes) = state.minutes_until_next(now).await {
                next = Some(next.map_or(minutes, |n| n.min(minutes)));
            }
        }
        next.unwrap_or(MIN_WAKE_MINUTES).max(MIN_WAKE_MINUTES)
    }
}

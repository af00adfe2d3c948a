use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity, ChannelId};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use super::TaskHandler;
use crate::{Data, Error};

const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Channels receiving maintenance announcements.
const MAINTENANCE_CHANNELS: &[ChannelId] = &[ChannelId::new(609074828707758150)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceEvent {
    Started,
    Ended { duration: chrono::Duration },
}

/// Turns a series of status codes into maintenance transitions.
#[derive(Debug, Default)]
pub struct MaintenanceTracker {
    since: Option<DateTime<Utc>>,
}

impl MaintenanceTracker {
    pub fn in_maintenance(&self) -> bool {
        self.since.is_some()
    }

    pub fn observe(&mut self, status: StatusCode, now: DateTime<Utc>) -> Option<MaintenanceEvent> {
        match (status, self.since) {
            (StatusCode::SERVICE_UNAVAILABLE, None) => {
                self.since = Some(now);
                Some(MaintenanceEvent::Started)
            }
            (StatusCode::OK, Some(since)) => {
                self.since = None;
                Some(MaintenanceEvent::Ended {
                    duration: now - since,
                })
            }
            _ => None,
        }
    }
}

pub fn format_duration(duration: chrono::Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    match (minutes / 60, minutes % 60) {
        (0, 0) => "less than a minute".to_string(),
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

impl MaintenanceEvent {
    pub fn message(&self) -> String {
        match self {
            Self::Started => "**Maintenance break has started!**".to_string(),
            Self::Ended { duration } => format!(
                "**Maintenance break is now over!** (lasted {})",
                format_duration(*duration)
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct MaintenanceTask {
    tracker: MaintenanceTracker,
}

impl MaintenanceTask {
    pub fn new() -> Self {
        Self::default()
    }

    async fn announce(&self, ctx: &serenity::Context, event: MaintenanceEvent) {
        let content = event.message();
        for channel in MAINTENANCE_CHANNELS {
            if let Err(e) = channel.say(&ctx.http, &content).await {
                error!("Failed to announce maintenance in {}: {}", channel, e);
            }
        }
    }
}

#[async_trait]
impl TaskHandler for MaintenanceTask {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn run(&mut self, ctx: &serenity::Context, data: Data) -> Result<(), Error> {
        let mut interval = time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let status = match data.coc.locations_status().await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Maintenance check failed (in maintenance: {}): {}",
                        self.tracker.in_maintenance(),
                        e
                    );
                    continue;
                }
            };

            let Some(event) = self.tracker.observe(status, Utc::now()) else {
                continue;
            };

            info!("Maintenance transition: {:?}", event);
            match data.cache.flush().await {
                Ok(count) => info!("Flushed {} cached entries", count),
                Err(e) => warn!("Failed to flush cache: {}", e),
            }
            self.announce(ctx, event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    #[test]
    fn announces_each_transition_once() {
        let mut tracker = MaintenanceTracker::default();
        let statuses = [
            StatusCode::OK,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::OK,
            StatusCode::OK,
        ];

        let events: Vec<_> = statuses
            .iter()
            .enumerate()
            .filter_map(|(i, &status)| tracker.observe(status, at(i as i64 * 30)))
            .collect();

        assert_eq!(
            events,
            [
                MaintenanceEvent::Started,
                MaintenanceEvent::Ended {
                    duration: chrono::Duration::minutes(90)
                },
            ]
        );
        assert!(!tracker.in_maintenance());
    }

    #[test]
    fn other_statuses_do_not_change_state() {
        let mut tracker = MaintenanceTracker::default();
        assert_eq!(tracker.observe(StatusCode::INTERNAL_SERVER_ERROR, at(0)), None);
        assert_eq!(tracker.observe(StatusCode::SERVICE_UNAVAILABLE, at(1)), Some(MaintenanceEvent::Started));
        assert_eq!(tracker.observe(StatusCode::FORBIDDEN, at(2)), None);
        assert!(tracker.in_maintenance());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(chrono::Duration::seconds(20)), "less than a minute");
        assert_eq!(format_duration(chrono::Duration::minutes(45)), "45m");
        assert_eq!(format_duration(chrono::Duration::minutes(120)), "2h");
        assert_eq!(format_duration(chrono::Duration::minutes(95)), "1h 35m");
        assert_eq!(
            MaintenanceEvent::Ended { duration: chrono::Duration::minutes(95) }.message(),
            "**Maintenance break is now over!** (lasted 1h 35m)"
        );
    }
}

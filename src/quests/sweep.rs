//! Periodic sweeps driven by the system clock.
//!
//! Two jobs run on fixed intervals outside request handling:
//! - event status transitions (started, ending soon, ended) for one-time announcements
//! - daily/weekly quest refresh at UTC period boundaries
//!
//! Both are best-effort: a delayed or skipped sweep loses nothing but the
//! notifications for transitions it never observed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration, Utc};
use log::{debug, info};

use crate::quests::catalog::EventCatalog;
use crate::quests::types::{EventStatus, QuestType};

/// Start of the recurrence period containing `now`: UTC midnight for daily quests,
/// Monday 00:00 UTC for weekly quests. Other classes do not recur.
pub fn period_start(class: QuestType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
    match class {
        QuestType::Daily => Some(midnight),
        QuestType::Weekly => {
            let days_since_monday = now.weekday().num_days_from_monday() as i64;
            Some(midnight - Duration::days(days_since_monday))
        }
        _ => None,
    }
}

/// Start of the period after the one containing `now`.
pub fn next_period_start(class: QuestType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = period_start(class, now)?;
    match class {
        QuestType::Daily => Some(start + Duration::days(1)),
        QuestType::Weekly => Some(start + Duration::days(7)),
        _ => None,
    }
}

/// One-time announcement produced by [`EventSweeper::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventNotification {
    Started { event_id: String, name: String },
    EndingSoon {
        event_id: String,
        name: String,
        ends_at: DateTime<Utc>,
    },
    Ended { event_id: String, name: String },
}

impl EventNotification {
    pub fn event_id(&self) -> &str {
        match self {
            EventNotification::Started { event_id, .. }
            | EventNotification::EndingSoon { event_id, .. }
            | EventNotification::Ended { event_id, .. } => event_id,
        }
    }

    pub fn message(&self) -> String {
        match self {
            EventNotification::Started { name, .. } => format!("{} has begun!", name),
            EventNotification::EndingSoon { name, ends_at, .. } => {
                format!("{} ends {}", name, ends_at.format("%Y-%m-%d %H:%M UTC"))
            }
            EventNotification::Ended { name, .. } => format!("{} has ended.", name),
        }
    }
}

/// Remembers the last observed status of each event and reports changes.
pub struct EventSweeper {
    last_seen: HashMap<String, EventStatus>,
    reminded: HashSet<String>,
    reminder_window: Duration,
    baseline_taken: bool,
}

impl EventSweeper {
    pub fn new(reminder_window: Duration) -> Self {
        Self {
            last_seen: HashMap::new(),
            reminded: HashSet::new(),
            reminder_window,
            baseline_taken: false,
        }
    }

    /// Compare every event's status at `now` with the previous sweep.
    ///
    /// The first sweep only records a baseline. Events that jump straight from
    /// upcoming to ended between sweeps report `Ended` alone.
    pub fn sweep(&mut self, catalog: &EventCatalog, now: DateTime<Utc>) -> Vec<EventNotification> {
        let mut notifications = Vec::new();
        let mut seen = HashMap::with_capacity(catalog.len());

        for event in catalog.iter() {
            let status = event.status_at(now);
            let previous = self.last_seen.get(&event.id).copied();
            seen.insert(event.id.clone(), status);

            let ending_soon =
                status == EventStatus::Active && event.end - now <= self.reminder_window;

            if !self.baseline_taken {
                if ending_soon {
                    self.reminded.insert(event.id.clone());
                }
                continue;
            }

            match (previous, status) {
                (Some(EventStatus::Upcoming) | None, EventStatus::Active) => {
                    notifications.push(EventNotification::Started {
                        event_id: event.id.clone(),
                        name: event.name.clone(),
                    });
                }
                (Some(EventStatus::Upcoming | EventStatus::Active), EventStatus::Ended) => {
                    notifications.push(EventNotification::Ended {
                        event_id: event.id.clone(),
                        name: event.name.clone(),
                    });
                }
                _ => {}
            }

            if ending_soon && self.reminded.insert(event.id.clone()) {
                notifications.push(EventNotification::EndingSoon {
                    event_id: event.id.clone(),
                    name: event.name.clone(),
                    ends_at: event.end,
                });
            }
        }

        self.reminded.retain(|id| seen.contains_key(id));
        self.last_seen = seen;
        if !self.baseline_taken {
            debug!("event sweep baseline recorded for {} event(s)", self.last_seen.len());
        }
        self.baseline_taken = true;
        notifications
    }
}

/// Tracks which daily/weekly boundaries have already triggered a refresh pass.
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    last_daily: Option<DateTime<Utc>>,
    last_weekly: Option<DateTime<Utc>>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recurrence classes whose period began since the last call. The first call
    /// reports both classes; per-user refresh is idempotent within a period.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<QuestType> {
        let mut due = Vec::new();
        for class in [QuestType::Daily, QuestType::Weekly] {
            let Some(boundary) = period_start(class, now) else {
                continue;
            };
            let slot = match class {
                QuestType::Daily => &mut self.last_daily,
                _ => &mut self.last_weekly,
            };
            if slot.map(|last| last < boundary).unwrap_or(true) {
                *slot = Some(boundary);
                info!("{} quest period started at {}", class, boundary);
                due.push(class);
            }
        }
        due
    }
}

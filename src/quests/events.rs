//! Time-bounded events and their community goals.
//!
//! Status is always derived from the clock and the definition's `[start, end)`
//! window; nothing about an event's lifecycle is stored. Contributions write the
//! ledger row and the running total in one store transaction under a per-event
//! lock, so concurrent contributors never lose an update.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use tokio::sync::RwLock;

use crate::metrics;
use crate::quests::catalog::EventCatalog;
use crate::quests::errors::QuestError;
use crate::quests::locks::KeyedLocks;
use crate::quests::storage::ProgressStore;
use crate::quests::types::{EventContribution, EventDefinition, EventStatus, RequirementKind};
use crate::validation::canonical_user_id;

/// Result of [`EventManager::contribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionOutcome {
    Recorded {
        /// Community total after this contribution.
        total: u64,
        target: u64,
        /// This contribution pushed the total across the target.
        goal_reached: bool,
    },
    EventNotFound,
    EventNotActive(EventStatus),
    NoCommunityGoal,
}

impl ContributionOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, ContributionOutcome::Recorded { .. })
    }
}

/// Snapshot of one event's community goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityProgress {
    pub event_id: String,
    pub kind: RequirementKind,
    pub current: u64,
    pub target: u64,
}

impl CommunityProgress {
    pub fn is_reached(&self) -> bool {
        self.current >= self.target
    }

    /// Whole percent towards the target, capped at 100.
    pub fn percent(&self) -> u8 {
        if self.target == 0 {
            return 100;
        }
        let pct = self.current.saturating_mul(100) / self.target;
        pct.min(100) as u8
    }
}

pub struct EventManager {
    catalog: RwLock<EventCatalog>,
    store: Arc<ProgressStore>,
    locks: KeyedLocks,
}

impl EventManager {
    pub fn new(catalog: EventCatalog, store: Arc<ProgressStore>) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn get(&self, event_id: &str) -> Option<EventDefinition> {
        self.catalog.read().await.get(event_id).cloned()
    }

    /// Clone of the current catalog, for sweeps that iterate without holding the lock.
    pub async fn catalog_snapshot(&self) -> EventCatalog {
        self.catalog.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.catalog.read().await.len()
    }

    pub async fn get_status(&self, event_id: &str) -> Option<EventStatus> {
        self.status_at(event_id, Utc::now()).await
    }

    pub async fn status_at(&self, event_id: &str, now: DateTime<Utc>) -> Option<EventStatus> {
        self.catalog
            .read()
            .await
            .get(event_id)
            .map(|event| event.status_at(now))
    }

    async fn filter_events<F>(&self, mut keep: F) -> Vec<EventDefinition>
    where
        F: FnMut(&EventDefinition) -> bool,
    {
        let catalog = self.catalog.read().await;
        let mut events: Vec<EventDefinition> =
            catalog.iter().filter(|e| keep(e)).cloned().collect();
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        events
    }

    pub async fn active_at(&self, now: DateTime<Utc>) -> Vec<EventDefinition> {
        self.filter_events(|e| e.status_at(now) == EventStatus::Active)
            .await
    }

    /// Ids of the events active at `now`.
    pub async fn running_ids_at(&self, now: DateTime<Utc>) -> HashSet<String> {
        self.catalog
            .read()
            .await
            .iter()
            .filter(|e| e.status_at(now) == EventStatus::Active)
            .map(|e| e.id.clone())
            .collect()
    }

    pub async fn upcoming_at(&self, now: DateTime<Utc>) -> Vec<EventDefinition> {
        self.filter_events(|e| e.status_at(now) == EventStatus::Upcoming)
            .await
    }

    /// Events that ended within `window` before `now`.
    pub async fn recently_ended_at(&self, window: Duration, now: DateTime<Utc>) -> Vec<EventDefinition> {
        self.filter_events(|e| e.status_at(now) == EventStatus::Ended && now - e.end <= window)
            .await
    }

    /// Active events that end within `window` after `now`.
    pub async fn ending_soon_at(&self, window: Duration, now: DateTime<Utc>) -> Vec<EventDefinition> {
        self.filter_events(|e| e.status_at(now) == EventStatus::Active && e.end - now <= window)
            .await
    }

    /// Ids of active events whose community goal counts `kind`.
    pub async fn active_goal_events_for(&self, kind: RequirementKind, now: DateTime<Utc>) -> Vec<String> {
        let catalog = self.catalog.read().await;
        catalog
            .iter()
            .filter(|e| e.status_at(now) == EventStatus::Active)
            .filter(|e| e.community_goal.as_ref().map(|g| g.kind) == Some(kind))
            .map(|e| e.id.clone())
            .collect()
    }

    pub async fn contribute(
        &self,
        user_id: &str,
        event_id: &str,
        amount: u64,
        kind: RequirementKind,
    ) -> Result<ContributionOutcome, QuestError> {
        self.contribute_at(user_id, event_id, amount, kind, Utc::now())
            .await
    }

    /// Record `amount` towards an active event's community goal.
    ///
    /// Rejected (without touching the store) when the event is unknown, outside
    /// its window, or has no community goal.
    pub async fn contribute_at(
        &self,
        user_id: &str,
        event_id: &str,
        amount: u64,
        kind: RequirementKind,
        now: DateTime<Utc>,
    ) -> Result<ContributionOutcome, QuestError> {
        let user_id = canonical_user_id(user_id)?;
        let target = {
            let catalog = self.catalog.read().await;
            let Some(event) = catalog.get(event_id) else {
                return Ok(ContributionOutcome::EventNotFound);
            };
            let status = event.status_at(now);
            if status != EventStatus::Active {
                return Ok(ContributionOutcome::EventNotActive(status));
            }
            match &event.community_goal {
                Some(goal) => goal.target,
                None => return Ok(ContributionOutcome::NoCommunityGoal),
            }
        };

        let _guard = self.locks.lock(event_id).await;
        let total = self
            .store
            .record_contribution(EventContribution::new(&user_id, event_id, amount, kind, now))?;
        let before = total.saturating_sub(amount);
        let goal_reached = before < target && total >= target;
        metrics::record_contribution(event_id, amount);

        if goal_reached {
            info!("community goal reached for event {} ({} / {})", event_id, total, target);
        } else {
            debug!(
                "contribution: user={} event={} amount={} total={}",
                user_id, event_id, amount, total
            );
        }
        Ok(ContributionOutcome::Recorded {
            total,
            target,
            goal_reached,
        })
    }

    pub async fn community_progress(&self, event_id: &str) -> Result<Option<CommunityProgress>, QuestError> {
        let goal = {
            let catalog = self.catalog.read().await;
            match catalog.get(event_id).and_then(|e| e.community_goal.clone()) {
                Some(goal) => goal,
                None => return Ok(None),
            }
        };
        Ok(Some(CommunityProgress {
            event_id: event_id.to_string(),
            kind: goal.kind,
            current: self.store.community_total(event_id)?,
            target: goal.target,
        }))
    }

    /// Everything `user_id` has contributed to `event_id`.
    pub async fn user_contribution(&self, user_id: &str, event_id: &str) -> Result<u64, QuestError> {
        self.store.user_contribution_total(event_id, user_id)
    }

    /// Contributors ordered by amount (highest first), ties broken by user id.
    pub async fn contributors(&self, event_id: &str) -> Result<Vec<(String, u64)>, QuestError> {
        let mut ranked: Vec<(String, u64)> = self
            .store
            .contribution_totals_by_user(event_id)?
            .into_iter()
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked)
    }

    pub async fn top_contributors(&self, event_id: &str, limit: usize) -> Result<Vec<(String, u64)>, QuestError> {
        let mut ranked = self.contributors(event_id).await?;
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// A user's share of the community total, in percent. `None` before anyone contributed.
    pub async fn user_share(&self, user_id: &str, event_id: &str) -> Result<Option<f64>, QuestError> {
        let total = self.store.community_total(event_id)?;
        if total == 0 {
            return Ok(None);
        }
        let mine = self.store.user_contribution_total(event_id, user_id)?;
        Ok(Some(mine as f64 * 100.0 / total as f64))
    }

    pub async fn reload(&self) -> Result<usize, QuestError> {
        self.catalog.write().await.reload()
    }

    pub async fn upsert(&self, event: EventDefinition) -> Result<(), QuestError> {
        if event.end <= event.start {
            return Err(QuestError::InvalidDefinition(format!(
                "event {} ends before it starts",
                event.id
            )));
        }
        self.catalog.write().await.upsert(event)?;
        Ok(())
    }

    pub async fn remove(&self, event_id: &str) -> Result<bool, QuestError> {
        self.catalog.write().await.remove(event_id)
    }
}

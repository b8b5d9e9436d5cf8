//! Gameplay event dispatch.
//!
//! One inbound action (a catch, a battle win, ...) fans out to every active quest
//! instance of the acting user whose requirements match, then to every active
//! event whose community goal counts the same kind of action.
//!
//! The user's record is loaded, updated and written back while holding that
//! user's lock, so two actions for the same user never lose an increment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::RwLock;

use crate::metrics;
use crate::quests::catalog::QuestCatalog;
use crate::quests::errors::QuestError;
use crate::quests::events::{ContributionOutcome, EventManager};
use crate::quests::locks::KeyedLocks;
use crate::quests::progress::UserQuestManager;
use crate::quests::storage::ProgressStore;
use crate::quests::types::{GameplayEvent, QuestStatus, RequirementCounter};
use crate::validation::canonical_user_id;

/// One quest instance touched by a gameplay event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub quest_id: String,
    pub title: String,
    pub counters: Vec<RequirementCounter>,
    /// The instance reached `Completed` on this event.
    pub completed: bool,
}

/// Everything one gameplay event changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub updates: Vec<ProgressUpdate>,
    pub contributions: Vec<(String, ContributionOutcome)>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.contributions.is_empty()
    }

    pub fn newly_completed(&self) -> impl Iterator<Item = &ProgressUpdate> {
        self.updates.iter().filter(|u| u.completed)
    }
}

/// Routes gameplay events to quest progress and community goals.
#[derive(Clone)]
pub struct ProgressDispatcher {
    store: Arc<ProgressStore>,
    quests: Arc<RwLock<QuestCatalog>>,
    events: Arc<EventManager>,
    user_locks: Arc<KeyedLocks>,
}

impl ProgressDispatcher {
    pub fn new(
        store: Arc<ProgressStore>,
        quests: Arc<RwLock<QuestCatalog>>,
        events: Arc<EventManager>,
        user_locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            quests,
            events,
            user_locks,
        }
    }

    pub async fn on_gameplay_event(&self, user_id: &str, event: GameplayEvent) -> Result<DispatchReport, QuestError> {
        self.on_gameplay_event_at(user_id, event, Utc::now()).await
    }

    pub async fn on_gameplay_event_at(
        &self,
        user_id: &str,
        event: GameplayEvent,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, QuestError> {
        metrics::inc_gameplay_events();
        let result = self.dispatch(user_id, &event, now).await;
        if result.is_err() {
            metrics::inc_dispatch_failures();
        }
        result
    }

    async fn dispatch(&self, user_id: &str, event: &GameplayEvent, now: DateTime<Utc>) -> Result<DispatchReport, QuestError> {
        let mut report = DispatchReport::default();
        if event.amount == 0 {
            return Ok(report);
        }
        let target = event.target.as_deref();
        let user_id = canonical_user_id(user_id)?;
        let user_id = user_id.as_str();
        let running = self.events.running_ids_at(now).await;

        {
            let _guard = self.user_locks.lock(user_id).await;
            let catalog = self.quests.read().await;
            let mut manager = UserQuestManager::new(self.store.load_or_new(user_id)?);
            let mut dirty = manager.maintain_at(&catalog, &running, now);

            for quest_id in manager.progress().active_ids() {
                let Some(definition) = catalog.get(&quest_id) else {
                    continue;
                };
                let was_completed = manager.status_of(&quest_id) == QuestStatus::Completed;
                if !manager.update_progress_at(definition, event.kind, event.amount, target, now) {
                    continue;
                }
                dirty = true;
                let counters = manager
                    .progress()
                    .instance(&quest_id)
                    .map(|i| i.counters.clone())
                    .unwrap_or_default();
                let completed = !was_completed && manager.status_of(&quest_id) == QuestStatus::Completed;
                if completed {
                    info!("quest completed: user={} quest={}", user_id, quest_id);
                }
                report.updates.push(ProgressUpdate {
                    quest_id,
                    title: definition.title.clone(),
                    counters,
                    completed,
                });
            }

            if dirty {
                self.store.put_progress(manager.into_progress())?;
            }
        }

        metrics::add_progress_updates(report.updates.len() as u64);
        metrics::add_quests_completed(report.newly_completed().count() as u64);

        for event_id in self.events.active_goal_events_for(event.kind, now).await {
            let outcome = self
                .events
                .contribute_at(user_id, &event_id, u64::from(event.amount), event.kind, now)
                .await?;
            report.contributions.push((event_id, outcome));
        }

        debug!(
            "dispatched {} x{} for user={}: {} quest update(s), {} contribution(s)",
            event.kind,
            event.amount,
            user_id,
            report.updates.len(),
            report.contributions.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quests::catalog::EventCatalog;
    use crate::quests::storage::ProgressStoreBuilder;
    use crate::quests::types::{
        EventDefinition, QuestDefinition, QuestInstance, QuestType, Requirement, RequirementKind,
        UserQuestProgress,
    };
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 20, 9, 0, 0).unwrap()
    }

    fn setup(dir: &TempDir) -> (Arc<ProgressStore>, ProgressDispatcher) {
        let store = Arc::new(
            ProgressStoreBuilder::new(dir.path().join("db"))
                .without_flush()
                .open()
                .expect("store"),
        );
        let mut quests = QuestCatalog::empty(dir.path().join("quests"));
        quests.insert(
            QuestDefinition::new("fire3", "Catch three fire types", QuestType::Story)
                .with_requirement(Requirement::new(RequirementKind::Catch, 3).with_target("fire")),
        );
        quests.insert(
            QuestDefinition::new("any2", "Catch two", QuestType::Story)
                .with_requirement(Requirement::new(RequirementKind::Catch, 2)),
        );
        let mut events = EventCatalog::empty(dir.path().join("events"));
        events.insert(
            EventDefinition::new("blaze", "Blaze Week", now() - Duration::days(1), now() + Duration::days(1))
                .with_community_goal(RequirementKind::Catch, 100),
        );
        let events = Arc::new(EventManager::new(events, store.clone()));
        let dispatcher = ProgressDispatcher::new(
            store.clone(),
            Arc::new(RwLock::new(quests)),
            events,
            Arc::new(KeyedLocks::new()),
        );
        (store, dispatcher)
    }

    fn seed_active(store: &ProgressStore, user: &str, quests: &[QuestDefinition]) {
        let mut progress = UserQuestProgress::new(user);
        progress.last_daily_refresh = Some(now());
        progress.last_weekly_refresh = Some(now());
        for quest in quests {
            progress
                .instances
                .insert(quest.id.clone(), QuestInstance::start(quest, now()));
        }
        store.put_progress(progress).unwrap();
    }

    #[tokio::test]
    async fn matching_instances_advance_and_goal_receives_contribution() {
        let dir = TempDir::new().unwrap();
        let (store, dispatcher) = setup(&dir);
        let fire = QuestDefinition::new("fire3", "", QuestType::Story)
            .with_requirement(Requirement::new(RequirementKind::Catch, 3).with_target("fire"));
        let any = QuestDefinition::new("any2", "", QuestType::Story)
            .with_requirement(Requirement::new(RequirementKind::Catch, 2));
        seed_active(&store, "ash", &[fire, any]);

        let report = dispatcher
            .on_gameplay_event_at("ash", GameplayEvent::new(RequirementKind::Catch).with_target("Fire"), now())
            .await
            .unwrap();
        assert_eq!(report.updates.len(), 2);
        assert_eq!(report.newly_completed().count(), 0);
        assert_eq!(report.contributions.len(), 1);

        let report = dispatcher
            .on_gameplay_event_at("ash", GameplayEvent::new(RequirementKind::Catch).with_target("water"), now())
            .await
            .unwrap();
        let ids: Vec<&str> = report.updates.iter().map(|u| u.quest_id.as_str()).collect();
        assert_eq!(ids, vec!["any2"]);
        assert!(report.updates[0].completed);

        let progress = store.get_progress("ash").unwrap().unwrap();
        assert_eq!(progress.instance("fire3").unwrap().counters[0].current, 1);
        assert_eq!(progress.status_of("any2"), QuestStatus::Completed);
        assert_eq!(store.community_total("blaze").unwrap(), 2);
    }

    #[tokio::test]
    async fn unmatched_kind_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (store, dispatcher) = setup(&dir);
        let any = QuestDefinition::new("any2", "", QuestType::Story)
            .with_requirement(Requirement::new(RequirementKind::Catch, 2));
        seed_active(&store, "misty", &[any]);

        let report = dispatcher
            .on_gameplay_event_at("misty", GameplayEvent::new(RequirementKind::Trade), now())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(store.community_total("blaze").unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_amount_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (store, dispatcher) = setup(&dir);
        let report = dispatcher
            .on_gameplay_event_at("brock", GameplayEvent::new(RequirementKind::Catch).with_amount(0), now())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(store.get_progress("brock").unwrap().is_none());
    }

    #[tokio::test]
    async fn padded_user_ids_share_one_record() {
        let dir = TempDir::new().unwrap();
        let (store, dispatcher) = setup(&dir);
        let any = QuestDefinition::new("any2", "", QuestType::Story)
            .with_requirement(Requirement::new(RequirementKind::Catch, 2));
        seed_active(&store, "gary", &[any]);

        for user in ["gary", " gary "] {
            dispatcher
                .on_gameplay_event_at(user, GameplayEvent::new(RequirementKind::Catch), now())
                .await
                .unwrap();
        }
        let progress = store.get_progress("gary").unwrap().unwrap();
        assert_eq!(progress.status_of("any2"), QuestStatus::Completed);
        assert_eq!(store.user_contribution_total("blaze", "gary").unwrap(), 2);
        assert_eq!(store.list_user_ids().unwrap(), vec!["gary".to_string()]);

        let err = dispatcher
            .on_gameplay_event_at("   ", GameplayEvent::new(RequirementKind::Catch), now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::InvalidUserId(_)));
    }
}

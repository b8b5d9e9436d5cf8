//! Outbound operations for the presentation layer.
//!
//! [`QuestService`] owns the store, both catalogs and the per-user locks, and
//! hands a [`ProgressDispatcher`] sharing the same state to whatever feeds in
//! gameplay events. Every per-user operation applies due clock transitions
//! (expiry, cooldown respawn, daily/weekly refresh) before doing its work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::metrics;
use crate::quests::catalog::{EventCatalog, QuestCatalog};
use crate::quests::dispatch::{DispatchReport, ProgressDispatcher};
use crate::quests::errors::QuestError;
use crate::quests::events::EventManager;
use crate::quests::locks::KeyedLocks;
use crate::quests::progress::{ClaimReceipt, UserQuestManager};
use crate::quests::storage::{ProgressStore, ProgressStoreBuilder};
use crate::quests::types::{
    EventStatus, GameplayEvent, QuestDefinition, QuestInstance, QuestStatus, QuestType,
    UserQuestProgress,
};
use crate::validation::canonical_user_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivateOutcome {
    Activated,
    QuestNotFound,
    /// The quest belongs to an event that is not running.
    EventNotActive,
    /// Already active, on cooldown, finished, unavailable, or missing prerequisites.
    Rejected(QuestStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(ClaimReceipt),
    QuestNotFound,
    NotCompleted(QuestStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonOutcome {
    Abandoned,
    QuestNotFound,
    NotActive(QuestStatus),
}

/// One user's view of a single quest.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestProgressView {
    pub definition: QuestDefinition,
    pub status: QuestStatus,
    pub instance: Option<QuestInstance>,
    pub completion_count: u32,
}

pub struct QuestService {
    store: Arc<ProgressStore>,
    quests: Arc<RwLock<QuestCatalog>>,
    events: Arc<EventManager>,
    user_locks: Arc<KeyedLocks>,
    dispatcher: ProgressDispatcher,
}

impl QuestService {
    pub fn new(store: Arc<ProgressStore>, quests: QuestCatalog, events: EventCatalog) -> Self {
        let quests = Arc::new(RwLock::new(quests));
        let events = Arc::new(EventManager::new(events, store.clone()));
        let user_locks = Arc::new(KeyedLocks::new());
        let dispatcher = ProgressDispatcher::new(
            store.clone(),
            quests.clone(),
            events.clone(),
            user_locks.clone(),
        );
        Self {
            store,
            quests,
            events,
            user_locks,
            dispatcher,
        }
    }

    /// Open the progress store and load both catalogs from the configured paths.
    pub fn open(config: &Config) -> Result<Self, QuestError> {
        let store = ProgressStoreBuilder::new(config.storage.progress_db_path()).open()?;
        let quests = QuestCatalog::load(&config.quests.definitions_dir)?;
        let events = EventCatalog::load(&config.events.definitions_dir)?;
        info!(
            "Loaded {} quest and {} event definition(s)",
            quests.len(),
            events.len()
        );
        Ok(Self::new(Arc::new(store), quests, events))
    }

    pub fn dispatcher(&self) -> &ProgressDispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub async fn on_gameplay_event(&self, user_id: &str, event: GameplayEvent) -> Result<DispatchReport, QuestError> {
        self.dispatcher.on_gameplay_event(user_id, event).await
    }

    pub async fn quest_definition(&self, quest_id: &str) -> Option<QuestDefinition> {
        self.quests.read().await.get(quest_id).cloned()
    }

    pub async fn quest_count(&self) -> usize {
        self.quests.read().await.len()
    }

    /// Clone of the quest catalog for read-only reporting.
    pub async fn quest_catalog_snapshot(&self) -> QuestCatalog {
        self.quests.read().await.clone()
    }

    /// Run `op` on the user's record under the user lock, after due maintenance,
    /// persisting when either step changed something.
    async fn with_user<R, F>(&self, user_id: &str, now: DateTime<Utc>, op: F) -> Result<R, QuestError>
    where
        F: FnOnce(&mut UserQuestManager, &QuestCatalog) -> (R, bool),
    {
        let running = self.events.running_ids_at(now).await;
        self.with_user_raw(user_id, |manager, catalog| {
            let maintained = manager.maintain_at(catalog, &running, now);
            let (result, changed) = op(manager, catalog);
            (result, maintained || changed)
        })
        .await
    }

    /// Like [`Self::with_user`] without the maintenance step.
    async fn with_user_raw<R, F>(&self, user_id: &str, op: F) -> Result<R, QuestError>
    where
        F: FnOnce(&mut UserQuestManager, &QuestCatalog) -> (R, bool),
    {
        let user_id = canonical_user_id(user_id)?;
        let _guard = self.user_locks.lock(&user_id).await;
        let catalog = self.quests.read().await;
        let mut manager = UserQuestManager::new(self.store.load_or_new(&user_id)?);
        let (result, changed) = op(&mut manager, &catalog);
        if changed {
            self.store.put_progress(manager.into_progress())?;
        }
        Ok(result)
    }

    pub async fn activate(&self, user_id: &str, quest_id: &str) -> Result<ActivateOutcome, QuestError> {
        self.activate_at(user_id, quest_id, Utc::now()).await
    }

    pub async fn activate_at(&self, user_id: &str, quest_id: &str, now: DateTime<Utc>) -> Result<ActivateOutcome, QuestError> {
        let Some(definition) = self.quest_definition(quest_id).await else {
            return Ok(ActivateOutcome::QuestNotFound);
        };
        if let Some(event_id) = &definition.event_id {
            if self.events.status_at(event_id, now).await != Some(EventStatus::Active) {
                return Ok(ActivateOutcome::EventNotActive);
            }
        }

        self.with_user(user_id, now, |manager, _| {
            if manager.activate_at(&definition, now) {
                info!("quest activated: user={} quest={}", user_id, quest_id);
                (ActivateOutcome::Activated, true)
            } else {
                (ActivateOutcome::Rejected(manager.status_of(quest_id)), false)
            }
        })
        .await
    }

    pub async fn claim(&self, user_id: &str, quest_id: &str) -> Result<ClaimOutcome, QuestError> {
        self.claim_at(user_id, quest_id, Utc::now()).await
    }

    pub async fn claim_at(&self, user_id: &str, quest_id: &str, now: DateTime<Utc>) -> Result<ClaimOutcome, QuestError> {
        let Some(definition) = self.quest_definition(quest_id).await else {
            return Ok(ClaimOutcome::QuestNotFound);
        };
        self.with_user(user_id, now, |manager, _| match manager.claim_at(&definition, now) {
            Some(receipt) => {
                metrics::inc_quests_claimed();
                info!(
                    "quest claimed: user={} quest={} completion={}",
                    user_id, quest_id, receipt.completion_number
                );
                (ClaimOutcome::Claimed(receipt), true)
            }
            None => (ClaimOutcome::NotCompleted(manager.status_of(quest_id)), false),
        })
        .await
    }

    pub async fn abandon(&self, user_id: &str, quest_id: &str) -> Result<AbandonOutcome, QuestError> {
        self.abandon_at(user_id, quest_id, Utc::now()).await
    }

    pub async fn abandon_at(&self, user_id: &str, quest_id: &str, now: DateTime<Utc>) -> Result<AbandonOutcome, QuestError> {
        if self.quest_definition(quest_id).await.is_none() {
            return Ok(AbandonOutcome::QuestNotFound);
        }
        self.with_user(user_id, now, |manager, _| {
            if manager.abandon_at(quest_id, now) {
                (AbandonOutcome::Abandoned, true)
            } else {
                (AbandonOutcome::NotActive(manager.status_of(quest_id)), false)
            }
        })
        .await
    }

    /// A user's full progress record after due maintenance.
    pub async fn user_progress(&self, user_id: &str) -> Result<UserQuestProgress, QuestError> {
        self.user_progress_at(user_id, Utc::now()).await
    }

    pub async fn user_progress_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<UserQuestProgress, QuestError> {
        self.with_user(user_id, now, |manager, _| (manager.progress().clone(), false))
            .await
    }

    /// Progress of one quest for one user; `None` when the quest id is unknown.
    pub async fn quest_progress_at(
        &self,
        user_id: &str,
        quest_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QuestProgressView>, QuestError> {
        let Some(definition) = self.quest_definition(quest_id).await else {
            return Ok(None);
        };
        let progress = self.user_progress_at(user_id, now).await?;
        Ok(Some(QuestProgressView {
            status: progress.status_of(quest_id),
            instance: progress.instance(quest_id).cloned(),
            completion_count: progress.completion_count(quest_id),
            definition,
        }))
    }

    /// Active (in-progress or completed-unclaimed) quests, in quest id order.
    pub async fn active_quests_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<QuestProgressView>, QuestError> {
        self.with_user(user_id, now, |manager, catalog| {
            let progress = manager.progress();
            let views = progress
                .active_ids()
                .into_iter()
                .filter_map(|id| {
                    let definition = catalog.get(&id)?.clone();
                    Some(QuestProgressView {
                        status: progress.status_of(&id),
                        instance: progress.instance(&id).cloned(),
                        completion_count: progress.completion_count(&id),
                        definition,
                    })
                })
                .collect();
            (views, false)
        })
        .await
    }

    /// Quests the user could activate right now.
    pub async fn available_quests_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<QuestDefinition>, QuestError> {
        let running = self.events.running_ids_at(now).await;
        self.with_user(user_id, now, |manager, catalog| {
            let available = catalog
                .iter()
                .filter(|d| match &d.event_id {
                    Some(event_id) => running.contains(event_id),
                    None => true,
                })
                .filter(|d| manager.can_activate_at(d, now))
                .cloned()
                .collect();
            (available, false)
        })
        .await
    }

    /// Apply the `class` refresh to every stored user. Returns how many were refreshed.
    pub async fn refresh_all_users(&self, class: QuestType, now: DateTime<Utc>) -> Result<usize, QuestError> {
        let running = self.events.running_ids_at(now).await;
        let mut refreshed = 0;
        for user_id in self.store.list_user_ids()? {
            let done = self
                .with_user_raw(&user_id, |manager, catalog| {
                    let due = manager.needs_refresh(class, now);
                    if due {
                        manager.refresh(class, catalog, &running, now);
                    }
                    (due, due)
                })
                .await;
            match done {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => warn!("{} refresh failed for user {}: {}", class, user_id, e),
            }
        }
        self.user_locks.prune();
        if refreshed > 0 {
            info!("{} refresh applied to {} user(s)", class, refreshed);
        }
        Ok(refreshed)
    }

    /// Expire overdue instances for every stored user. Returns how many instances
    /// expired. A user whose record cannot be read or written is logged and skipped.
    pub async fn expire_all_users(&self, now: DateTime<Utc>) -> Result<usize, QuestError> {
        let mut expired = 0;
        for user_id in self.store.list_user_ids()? {
            let count = self
                .with_user_raw(&user_id, |manager, _| {
                    let ids = manager.expire_overdue(now);
                    (ids.len(), !ids.is_empty())
                })
                .await;
            match count {
                Ok(count) => expired += count,
                Err(e) => warn!("expiry failed for user {}: {}", user_id, e),
            }
        }
        self.user_locks.prune();
        if expired > 0 {
            info!("expired {} quest instance(s)", expired);
        }
        Ok(expired)
    }

    /// Re-read both definition trees. Returns (quests, events) loaded.
    pub async fn reload_definitions(&self) -> Result<(usize, usize), QuestError> {
        let quests = self.quests.write().await.reload()?;
        let events = self.events.reload().await?;
        info!("Reloaded {} quest and {} event definition(s)", quests, events);
        Ok((quests, events))
    }

    pub async fn upsert_quest(&self, definition: QuestDefinition) -> Result<(), QuestError> {
        if let Some(event_id) = &definition.event_id {
            if self.events.get(event_id).await.is_none() {
                return Err(QuestError::InvalidDefinition(format!(
                    "quest {} references unknown event {}",
                    definition.id, event_id
                )));
            }
        }
        self.quests.write().await.upsert(definition)?;
        Ok(())
    }

    pub async fn remove_quest(&self, quest_id: &str) -> Result<bool, QuestError> {
        let removed = self.quests.write().await.remove(quest_id)?;
        if removed {
            info!("quest definition removed: {}", quest_id);
        }
        Ok(removed)
    }

    /// Drop an event definition. Refused while any quest still points at it.
    pub async fn remove_event(&self, event_id: &str) -> Result<bool, QuestError> {
        let users: Vec<String> = self
            .quests
            .read()
            .await
            .iter()
            .filter(|d| d.event_id.as_deref() == Some(event_id))
            .map(|d| d.id.clone())
            .collect();
        if !users.is_empty() {
            return Err(QuestError::InvalidDefinition(format!(
                "event {} is still used by quest(s) {}",
                event_id,
                users.join(", ")
            )));
        }
        self.events.remove(event_id).await
    }

    /// Forget a user's stored progress; the next touch starts them from scratch.
    /// Their ledger rows stay, so community totals are unaffected.
    pub async fn reset_user(&self, user_id: &str) -> Result<bool, QuestError> {
        let user_id = canonical_user_id(user_id)?;
        let _guard = self.user_locks.lock(&user_id).await;
        let removed = self.store.delete_progress(&user_id)?;
        if removed {
            info!("progress reset: user={}", user_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quests::types::{EventDefinition, Requirement, RequirementKind, Reward};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 10, 0, 0).unwrap()
    }

    fn service(dir: &TempDir) -> QuestService {
        let store = ProgressStoreBuilder::new(dir.path().join("db"))
            .without_flush()
            .open()
            .expect("store");
        let mut quests = QuestCatalog::empty(dir.path().join("quests"));
        quests.insert(
            QuestDefinition::new("story1", "First Steps", QuestType::Story)
                .with_requirement(Requirement::new(RequirementKind::Explore, 1))
                .with_reward(Reward::Xp { amount: 50 }),
        );
        quests.insert(
            QuestDefinition::new("spooky", "Spooky Catches", QuestType::Event)
                .with_requirement(Requirement::new(RequirementKind::Catch, 1))
                .for_event("harvest"),
        );
        quests.insert(
            QuestDefinition::new("daily_catch", "Daily Catch", QuestType::Daily)
                .with_requirement(Requirement::new(RequirementKind::Catch, 2)),
        );
        let mut events = EventCatalog::empty(dir.path().join("events"));
        events.insert(EventDefinition::new(
            "harvest",
            "Harvest Moon",
            t0() + Duration::days(1),
            t0() + Duration::days(3),
        ));
        QuestService::new(Arc::new(store), quests, events)
    }

    #[tokio::test]
    async fn first_touch_assigns_daily_quests() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let active = svc.active_quests_at("u1", t0()).await.unwrap();
        let ids: Vec<&str> = active.iter().map(|v| v.definition.id.as_str()).collect();
        assert_eq!(ids, vec!["daily_catch"]);
    }

    #[tokio::test]
    async fn event_quests_need_running_event() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert_eq!(
            svc.activate_at("u1", "spooky", t0()).await.unwrap(),
            ActivateOutcome::EventNotActive
        );
        let available: Vec<String> = svc
            .available_quests_at("u1", t0())
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(available, vec!["story1".to_string()]);

        let during = t0() + Duration::days(2);
        assert_eq!(
            svc.activate_at("u1", "spooky", during).await.unwrap(),
            ActivateOutcome::Activated
        );
    }

    #[tokio::test]
    async fn activate_claim_abandon_round() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert_eq!(svc.activate_at("u1", "nope", t0()).await.unwrap(), ActivateOutcome::QuestNotFound);
        assert_eq!(svc.activate_at("u1", "story1", t0()).await.unwrap(), ActivateOutcome::Activated);
        assert_eq!(
            svc.activate_at("u1", "story1", t0()).await.unwrap(),
            ActivateOutcome::Rejected(QuestStatus::InProgress)
        );
        assert_eq!(
            svc.claim_at("u1", "story1", t0()).await.unwrap(),
            ClaimOutcome::NotCompleted(QuestStatus::InProgress)
        );

        svc.dispatcher()
            .on_gameplay_event_at("u1", GameplayEvent::new(RequirementKind::Explore), t0())
            .await
            .unwrap();
        match svc.claim_at("u1", "story1", t0()).await.unwrap() {
            ClaimOutcome::Claimed(receipt) => assert_eq!(receipt.rewards, vec![Reward::Xp { amount: 50 }]),
            other => panic!("unexpected claim outcome: {:?}", other),
        }
        assert_eq!(
            svc.abandon_at("u1", "story1", t0()).await.unwrap(),
            AbandonOutcome::NotActive(QuestStatus::Claimed)
        );
        assert_eq!(
            svc.abandon_at("u1", "daily_catch", t0()).await.unwrap(),
            AbandonOutcome::Abandoned
        );
        let view = svc.quest_progress_at("u1", "story1", t0()).await.unwrap().unwrap();
        assert_eq!(view.status, QuestStatus::Claimed);
        assert_eq!(view.completion_count, 1);
    }

    #[tokio::test]
    async fn refresh_all_users_is_idempotent_per_period() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.user_progress_at("u1", t0()).await.unwrap();
        svc.user_progress_at("u2", t0()).await.unwrap();

        assert_eq!(svc.refresh_all_users(QuestType::Daily, t0()).await.unwrap(), 0);
        let tomorrow = t0() + Duration::days(1);
        assert_eq!(svc.refresh_all_users(QuestType::Daily, tomorrow).await.unwrap(), 2);
        assert_eq!(svc.refresh_all_users(QuestType::Daily, tomorrow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expiry_sweep_skips_unreadable_records() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let timed = QuestDefinition::new("timed", "Quick Catch", QuestType::Story)
            .with_requirement(Requirement::new(RequirementKind::Catch, 5))
            .with_time_limit_hours(1);
        svc.quests.write().await.insert(timed);

        svc.store.put_raw_progress("broken", b"not a record").unwrap();
        assert_eq!(svc.activate_at("u1", "timed", t0()).await.unwrap(), ActivateOutcome::Activated);

        let later = t0() + Duration::hours(2);
        assert_eq!(svc.expire_all_users(later).await.unwrap(), 1);
        let view = svc.quest_progress_at("u1", "timed", later).await.unwrap().unwrap();
        assert_eq!(view.status, QuestStatus::Expired);
    }

    #[tokio::test]
    async fn event_quest_stays_claimed_after_event_ends() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let again = QuestDefinition::new("spooky_again", "Spooky Again", QuestType::Event)
            .with_requirement(Requirement::new(RequirementKind::Catch, 1))
            .repeatable(Some(1), None)
            .for_event("harvest");
        svc.quests.write().await.insert(again);

        let during = t0() + Duration::days(2);
        assert_eq!(svc.activate_at("u1", "spooky_again", during).await.unwrap(), ActivateOutcome::Activated);
        svc.dispatcher()
            .on_gameplay_event_at("u1", GameplayEvent::new(RequirementKind::Catch), during)
            .await
            .unwrap();
        assert!(matches!(
            svc.claim_at("u1", "spooky_again", during).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));

        let weeks_later = t0() + Duration::days(17);
        let view = svc.quest_progress_at("u1", "spooky_again", weeks_later).await.unwrap().unwrap();
        assert_eq!(view.status, QuestStatus::Claimed);
        svc.dispatcher()
            .on_gameplay_event_at("u1", GameplayEvent::new(RequirementKind::Catch), weeks_later)
            .await
            .unwrap();
        let view = svc.quest_progress_at("u1", "spooky_again", weeks_later).await.unwrap().unwrap();
        assert_eq!(view.status, QuestStatus::Claimed);
    }

    #[tokio::test]
    async fn padded_user_id_reaches_the_same_record() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert_eq!(svc.activate_at(" u1 ", "story1", t0()).await.unwrap(), ActivateOutcome::Activated);
        assert_eq!(
            svc.activate_at("u1", "story1", t0()).await.unwrap(),
            ActivateOutcome::Rejected(QuestStatus::InProgress)
        );
        assert_eq!(svc.store().list_user_ids().unwrap(), vec!["u1".to_string()]);
        assert!(matches!(
            svc.activate_at("a:b", "story1", t0()).await,
            Err(QuestError::InvalidUserId(_))
        ));
    }

    #[tokio::test]
    async fn reset_user_starts_over() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.activate_at("u1", "story1", t0()).await.unwrap();
        assert!(svc.reset_user(" u1").await.unwrap());
        assert!(!svc.reset_user("u1").await.unwrap());
        assert!(svc.store().get_progress("u1").unwrap().is_none());

        let view = svc.quest_progress_at("u1", "story1", t0()).await.unwrap().unwrap();
        assert_eq!(view.status, QuestStatus::NotStarted);
    }

    #[tokio::test]
    async fn definitions_can_be_removed() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        assert!(svc.remove_event("harvest").await.is_err());
        assert!(svc.events().get("harvest").await.is_some());

        assert!(svc.remove_quest("spooky").await.unwrap());
        assert!(!svc.remove_quest("spooky").await.unwrap());
        assert!(svc.quest_definition("spooky").await.is_none());
        assert_eq!(svc.activate_at("u1", "spooky", t0()).await.unwrap(), ActivateOutcome::QuestNotFound);

        assert!(svc.remove_event("harvest").await.unwrap());
        assert_eq!(svc.events().len().await, 0);
    }
}

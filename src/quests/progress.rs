//! Per-user quest lifecycle: activation, requirement tracking, claiming,
//! abandoning, cooldowns, expiry and daily/weekly refresh.
//!
//! Every operation works on an in-memory [`UserQuestProgress`]; callers load the
//! record from the store, run operations through a manager, and write it back.
//! Rejected transitions return `false` / `None` and leave the record untouched.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::debug;

use crate::metrics;
use crate::quests::catalog::QuestCatalog;
use crate::quests::sweep::period_start;
use crate::quests::types::{
    HistoryOutcome, QuestDefinition, QuestInstance, QuestStatus, QuestType, Reward,
    RequirementKind, UserQuestProgress,
};

/// What a successful claim hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimReceipt {
    pub quest_id: String,
    pub rewards: Vec<Reward>,
    /// Number of times this user has now claimed the quest.
    pub completion_number: u32,
    /// Status the quest is left in: `Claimed` (finished or cooling down) or
    /// `InProgress` (repeatable, respawned immediately).
    pub next_status: QuestStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Wraps one user's progress record.
#[derive(Debug, Clone)]
pub struct UserQuestManager {
    progress: UserQuestProgress,
}

impl UserQuestManager {
    pub fn new(progress: UserQuestProgress) -> Self {
        Self { progress }
    }

    pub fn progress(&self) -> &UserQuestProgress {
        &self.progress
    }

    pub fn into_progress(self) -> UserQuestProgress {
        self.progress
    }

    pub fn user_id(&self) -> &str {
        &self.progress.user_id
    }

    pub fn status_of(&self, quest_id: &str) -> QuestStatus {
        self.progress.status_of(quest_id)
    }

    pub fn is_active(&self, quest_id: &str) -> bool {
        self.progress
            .instance(quest_id)
            .map(QuestInstance::is_active)
            .unwrap_or(false)
    }

    pub fn is_on_cooldown(&self, quest_id: &str) -> bool {
        self.is_on_cooldown_at(quest_id, Utc::now())
    }

    pub fn is_on_cooldown_at(&self, quest_id: &str, now: DateTime<Utc>) -> bool {
        self.progress
            .instance(quest_id)
            .map(|i| i.is_on_cooldown_at(now))
            .unwrap_or(false)
    }

    /// Check whether `definition` could be activated right now.
    pub fn can_activate_at(&self, definition: &QuestDefinition, now: DateTime<Utc>) -> bool {
        let id = definition.id.as_str();

        if let Some(instance) = self.progress.instance(id) {
            if instance.is_active() || instance.is_on_cooldown_at(now) {
                return false;
            }
        }
        if self.progress.has_completed(id) {
            // Finished for good: non-repeatable, or repeatable that hit its cap.
            return false;
        }
        if let Some(max) = definition.max_completions {
            if self.progress.completion_count(id) >= max {
                return false;
            }
        }
        if !definition.is_available_at(now) {
            return false;
        }
        definition
            .prerequisites
            .iter()
            .all(|prereq| self.progress.has_completed(prereq))
    }

    pub fn activate(&mut self, definition: &QuestDefinition) -> bool {
        self.activate_at(definition, Utc::now())
    }

    /// Start a fresh in-progress instance. Fails if the quest is already active, on
    /// cooldown, finished, outside its availability window, or missing prerequisites.
    pub fn activate_at(&mut self, definition: &QuestDefinition, now: DateTime<Utc>) -> bool {
        if !self.can_activate_at(definition, now) {
            debug!(
                "activate rejected: user={} quest={}",
                self.progress.user_id, definition.id
            );
            return false;
        }
        self.progress
            .instances
            .insert(definition.id.clone(), QuestInstance::start(definition, now));
        true
    }

    pub fn update_progress(
        &mut self,
        definition: &QuestDefinition,
        kind: RequirementKind,
        amount: u32,
        target: Option<&str>,
    ) -> bool {
        self.update_progress_at(definition, kind, amount, target, Utc::now())
    }

    /// Advance every matching requirement counter by `amount` (clamped at its goal).
    ///
    /// Returns true if the instance changed. Only in-progress instances are touched;
    /// a quest with no requirements completes on its first update.
    pub fn update_progress_at(
        &mut self,
        definition: &QuestDefinition,
        kind: RequirementKind,
        amount: u32,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(instance) = self.progress.instances.get_mut(&definition.id) else {
            return false;
        };
        if instance.status != QuestStatus::InProgress {
            return false;
        }
        if instance.expires_at.map(|at| now >= at).unwrap_or(false) {
            return false;
        }

        let mut changed = false;
        for counter in instance.counters.iter_mut() {
            if counter.matches(kind, target) && counter.advance(amount) {
                changed = true;
            }
        }

        if instance.all_requirements_met() {
            instance.status = QuestStatus::Completed;
            instance.completed_at = Some(now);
            changed = true;
        }
        changed
    }

    pub fn claim(&mut self, definition: &QuestDefinition) -> Option<ClaimReceipt> {
        self.claim_at(definition, Utc::now())
    }

    /// Claim a completed quest. Returns `None` unless the instance is completed.
    pub fn claim_at(&mut self, definition: &QuestDefinition, now: DateTime<Utc>) -> Option<ClaimReceipt> {
        let id = definition.id.clone();
        match self.progress.instance(&id) {
            Some(instance) if instance.status == QuestStatus::Completed => {}
            _ => return None,
        }

        let count = self.progress.completion_count(&id).saturating_add(1);
        self.progress.completion_counts.insert(id.clone(), count);
        self.progress.push_history(&id, HistoryOutcome::Claimed, now);

        let capped = definition.max_completions.map(|max| count >= max).unwrap_or(false);
        let mut cooldown_until = None;
        let next_status = if !definition.repeatable || capped {
            self.progress.instances.remove(&id);
            self.progress.mark_completed(&id);
            QuestStatus::Claimed
        } else if let Some(cooldown) = definition.cooldown() {
            let until = now + cooldown;
            cooldown_until = Some(until);
            if let Some(instance) = self.progress.instances.get_mut(&id) {
                instance.status = QuestStatus::Claimed;
                instance.claimed_at = Some(now);
                instance.cooldown_until = Some(until);
            }
            QuestStatus::Claimed
        } else {
            self.progress
                .instances
                .insert(id.clone(), QuestInstance::start(definition, now));
            QuestStatus::InProgress
        };

        Some(ClaimReceipt {
            quest_id: id,
            rewards: definition.rewards.clone(),
            completion_number: count,
            next_status,
            cooldown_until,
        })
    }

    pub fn abandon(&mut self, quest_id: &str) -> bool {
        self.abandon_at(quest_id, Utc::now())
    }

    /// Give up on an active quest. The instance is marked failed and may be
    /// activated again later.
    pub fn abandon_at(&mut self, quest_id: &str, now: DateTime<Utc>) -> bool {
        let Some(instance) = self.progress.instances.get_mut(quest_id) else {
            return false;
        };
        if !instance.is_active() {
            return false;
        }
        instance.status = QuestStatus::Failed;
        self.progress
            .push_history(quest_id, HistoryOutcome::Abandoned, now);
        true
    }

    /// Move in-progress instances past their deadline to `Expired`. Returns their ids.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for instance in self.progress.instances.values_mut() {
            let overdue = instance.expires_at.map(|at| now >= at).unwrap_or(false);
            if instance.status == QuestStatus::InProgress && overdue {
                instance.status = QuestStatus::Expired;
                expired.push(instance.quest_id.clone());
            }
        }
        for id in &expired {
            self.progress.push_history(id, HistoryOutcome::Expired, now);
        }
        metrics::add_quests_expired(expired.len() as u64);
        expired
    }

    /// Respawn repeatable quests whose cooldown has elapsed. Event quests only
    /// respawn while their event is in `running_events`. Returns their ids.
    pub fn respawn_cooled_down(
        &mut self,
        catalog: &QuestCatalog,
        running_events: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let ready: Vec<String> = self
            .progress
            .instances
            .values()
            .filter(|i| i.status == QuestStatus::Claimed && !i.is_on_cooldown_at(now))
            .map(|i| i.quest_id.clone())
            .collect();

        let mut respawned = Vec::new();
        for id in ready {
            if let Some(definition) = catalog.get(&id) {
                if event_running(definition, running_events) && self.activate_at(definition, now) {
                    respawned.push(id);
                }
            }
        }
        respawned
    }

    fn last_refresh(&self, class: QuestType) -> Option<DateTime<Utc>> {
        match class {
            QuestType::Daily => self.progress.last_daily_refresh,
            QuestType::Weekly => self.progress.last_weekly_refresh,
            _ => None,
        }
    }

    /// True when the current daily/weekly period started after the last refresh.
    pub fn needs_refresh(&self, class: QuestType, now: DateTime<Utc>) -> bool {
        let Some(boundary) = period_start(class, now) else {
            return false;
        };
        match self.last_refresh(class) {
            Some(last) => last < boundary,
            None => true,
        }
    }

    /// Reset every instance of a recurrence class and re-activate each definition of
    /// that class that is currently available. Event quests are skipped unless
    /// their event is in `running_events`. No-op until the period rolls over.
    ///
    /// Returns the ids activated.
    pub fn refresh(
        &mut self,
        class: QuestType,
        catalog: &QuestCatalog,
        running_events: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        if !class.is_recurring() || !self.needs_refresh(class, now) {
            return Vec::new();
        }

        let class_ids: Vec<String> = catalog
            .list_by_type(class)
            .iter()
            .map(|d| d.id.clone())
            .collect();
        self.progress
            .instances
            .retain(|id, _| !class_ids.contains(id));
        self.progress.completed.retain(|id| !class_ids.contains(id));
        self.progress
            .completion_counts
            .retain(|id, _| !class_ids.contains(id));

        let mut activated = Vec::new();
        for definition in catalog.list_by_type(class) {
            if event_running(definition, running_events) && self.activate_at(definition, now) {
                activated.push(definition.id.clone());
            }
        }

        match class {
            QuestType::Daily => self.progress.last_daily_refresh = Some(now),
            QuestType::Weekly => self.progress.last_weekly_refresh = Some(now),
            _ => {}
        }
        debug!(
            "refreshed {} quests for user={}: {} activated",
            class,
            self.progress.user_id,
            activated.len()
        );
        activated
    }

    /// Apply every clock-driven transition that is due: expiry, cooldown respawn,
    /// then daily and weekly refresh. Returns true if the record changed.
    pub fn maintain_at(
        &mut self,
        catalog: &QuestCatalog,
        running_events: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut changed = !self.expire_overdue(now).is_empty();
        changed |= !self.respawn_cooled_down(catalog, running_events, now).is_empty();
        for class in [QuestType::Daily, QuestType::Weekly] {
            if self.needs_refresh(class, now) {
                self.refresh(class, catalog, running_events, now);
                changed = true;
            }
        }
        changed
    }
}

fn event_running(definition: &QuestDefinition, running_events: &HashSet<String>) -> bool {
    match &definition.event_id {
        Some(event_id) => running_events.contains(event_id),
        None => true,
    }
}

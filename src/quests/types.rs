use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROGRESS_SCHEMA_VERSION: u8 = 1;
pub const CONTRIBUTION_SCHEMA_VERSION: u8 = 1;

/// Number of history rows retained per user; older rows are dropped first.
pub const HISTORY_LIMIT: usize = 200;

// ============================================================================
// Definitions
// ============================================================================

/// Recurrence class of a quest. Quest definition files are grouped into one
/// sub-directory per class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QuestType {
    Daily,
    Weekly,
    Story,
    Achievement,
    Event,
}

impl QuestType {
    pub const ALL: [QuestType; 5] = [
        QuestType::Daily,
        QuestType::Weekly,
        QuestType::Story,
        QuestType::Achievement,
        QuestType::Event,
    ];

    /// Directory name used for this class under the quests root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            QuestType::Daily => "daily",
            QuestType::Weekly => "weekly",
            QuestType::Story => "story",
            QuestType::Achievement => "achievement",
            QuestType::Event => "event",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        QuestType::ALL
            .into_iter()
            .find(|t| t.dir_name().eq_ignore_ascii_case(name))
    }

    /// Daily and weekly quests are reset wholesale when their period rolls over.
    pub fn is_recurring(&self) -> bool {
        matches!(self, QuestType::Daily | QuestType::Weekly)
    }
}

impl fmt::Display for QuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Countable gameplay actions a requirement (or community goal) can track.
///
/// Definition files may spell kinds in any case (`CATCH`, `catch`, `battle-win`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub enum RequirementKind {
    Catch,
    ShinyCatch,
    Battle,
    BattleWin,
    PvpWin,
    Explore,
    Evolve,
    Trade,
    LevelUp,
    Collect,
}

impl RequirementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Catch => "catch",
            RequirementKind::ShinyCatch => "shiny_catch",
            RequirementKind::Battle => "battle",
            RequirementKind::BattleWin => "battle_win",
            RequirementKind::PvpWin => "pvp_win",
            RequirementKind::Explore => "explore",
            RequirementKind::Evolve => "evolve",
            RequirementKind::Trade => "trade",
            RequirementKind::LevelUp => "level_up",
            RequirementKind::Collect => "collect",
        }
    }
}

impl FromStr for RequirementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "catch" => Ok(RequirementKind::Catch),
            "shiny_catch" | "catch_shiny" => Ok(RequirementKind::ShinyCatch),
            "battle" => Ok(RequirementKind::Battle),
            "battle_win" | "win_battle" | "win" => Ok(RequirementKind::BattleWin),
            "pvp_win" => Ok(RequirementKind::PvpWin),
            "explore" | "exploration" => Ok(RequirementKind::Explore),
            "evolve" => Ok(RequirementKind::Evolve),
            "trade" => Ok(RequirementKind::Trade),
            "level_up" | "levelup" => Ok(RequirementKind::LevelUp),
            "collect" => Ok(RequirementKind::Collect),
            _ => Err(format!("unknown requirement kind '{}'", s)),
        }
    }
}

impl TryFrom<String> for RequirementKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequirementKind> for String {
    fn from(kind: RequirementKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn targets_match(filter: Option<&str>, target: Option<&str>) -> bool {
    match (filter, target) {
        (None, _) => true,
        (Some(want), Some(got)) => want.eq_ignore_ascii_case(got),
        (Some(_), None) => false,
    }
}

/// One countable condition of a quest, e.g. "catch 3 fire-type creatures".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    #[serde(rename = "type", alias = "kind")]
    pub kind: RequirementKind,
    pub amount: u32,
    /// Creature, creature type or biome filter. Unset matches any target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Requirement {
    pub fn new(kind: RequirementKind, amount: u32) -> Self {
        Self {
            kind,
            amount,
            target: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn matches(&self, kind: RequirementKind, target: Option<&str>) -> bool {
        self.kind == kind && targets_match(self.target.as_deref(), target)
    }
}

fn default_quantity() -> u32 {
    1
}

/// Rewards granted by the caller when a quest is claimed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reward {
    Tokens {
        amount: u32,
    },
    Xp {
        amount: u32,
    },
    Item {
        item_id: String,
        #[serde(default = "default_quantity")]
        quantity: u32,
    },
    Creature {
        creature: String,
        #[serde(default)]
        shiny: bool,
    },
    Title {
        title: String,
    },
    Badge {
        badge: String,
    },
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reward::Tokens { amount } => write!(f, "{} tokens", amount),
            Reward::Xp { amount } => write!(f, "{} XP", amount),
            Reward::Item { item_id, quantity } => write!(f, "{}x {}", quantity, item_id),
            Reward::Creature { creature, shiny } => {
                if *shiny {
                    write!(f, "shiny {}", creature)
                } else {
                    write!(f, "{}", creature)
                }
            }
            Reward::Title { title } => write!(f, "title \"{}\"", title),
            Reward::Badge { badge } => write!(f, "{} badge", badge),
        }
    }
}

/// Immutable quest template loaded from the definition catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestDefinition {
    pub id: String,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub quest_type: QuestType,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub rewards: Vec<Reward>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_until: Option<DateTime<Utc>>,
    /// In-progress instances expire this many hours after activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_hours: Option<u32>,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completions: Option<u32>,
    /// Event that must be active for this quest to be activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl QuestDefinition {
    pub fn new(id: &str, title: &str, quest_type: QuestType) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            quest_type,
            requirements: Vec::new(),
            rewards: Vec::new(),
            prerequisites: Vec::new(),
            available_from: None,
            available_until: None,
            time_limit_hours: None,
            repeatable: false,
            cooldown_hours: None,
            max_completions: None,
            event_id: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_reward(mut self, reward: Reward) -> Self {
        self.rewards.push(reward);
        self
    }

    pub fn with_prerequisite(mut self, quest_id: &str) -> Self {
        self.prerequisites.push(quest_id.to_string());
        self
    }

    pub fn with_window(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.available_from = from;
        self.available_until = until;
        self
    }

    pub fn with_time_limit_hours(mut self, hours: u32) -> Self {
        self.time_limit_hours = Some(hours);
        self
    }

    pub fn repeatable(mut self, cooldown_hours: Option<u32>, max_completions: Option<u32>) -> Self {
        self.repeatable = true;
        self.cooldown_hours = cooldown_hours;
        self.max_completions = max_completions;
        self
    }

    pub fn for_event(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_hours
            .filter(|h| *h > 0)
            .map(|h| Duration::hours(h as i64))
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_hours.map(|h| Duration::hours(h as i64))
    }

    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.available_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.available_until {
            if now >= until {
                return false;
            }
        }
        true
    }

    pub fn has_requirement_for(&self, kind: RequirementKind, target: Option<&str>) -> bool {
        self.requirements.iter().any(|r| r.matches(kind, target))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Seasonal,
    Holiday,
    Community,
    Special,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Special
    }
}

/// Lifecycle position of an event relative to its `[start, end)` window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Active,
    Ended,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Upcoming => f.write_str("upcoming"),
            EventStatus::Active => f.write_str("active"),
            EventStatus::Ended => f.write_str("ended"),
        }
    }
}

fn default_spawn_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialEncounter {
    pub creature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biome: Option<String>,
    #[serde(default = "default_spawn_weight")]
    pub spawn_weight: f32,
}

/// Shared goal every player contributes to. The running total is kept in the
/// store, never in the definition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityGoal {
    #[serde(rename = "type", alias = "kind")]
    pub kind: RequirementKind,
    pub target: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<Reward>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    #[serde(alias = "start_date")]
    pub start: DateTime<Utc>,
    #[serde(alias = "end_date")]
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub special_encounters: Vec<SpecialEncounter>,
    #[serde(default)]
    pub special_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_goal: Option<CommunityGoal>,
    #[serde(default)]
    pub quests: Vec<String>,
}

impl EventDefinition {
    pub fn new(id: &str, name: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            event_type: EventType::Special,
            start,
            end,
            special_encounters: Vec::new(),
            special_items: Vec::new(),
            community_goal: None,
            quests: Vec::new(),
        }
    }

    pub fn with_community_goal(mut self, kind: RequirementKind, target: u64) -> Self {
        self.community_goal = Some(CommunityGoal {
            kind,
            target,
            description: String::new(),
            reward: None,
        });
        self
    }

    pub fn with_quest(mut self, quest_id: &str) -> Self {
        self.quests.push(quest_id.to_string());
        self
    }

    /// Upcoming before `start`, active inside `[start, end)`, ended at or after `end`.
    pub fn status_at(&self, now: DateTime<Utc>) -> EventStatus {
        if now < self.start {
            EventStatus::Upcoming
        } else if now < self.end {
            EventStatus::Active
        } else {
            EventStatus::Ended
        }
    }
}

// ============================================================================
// Player progress
// ============================================================================

/// Status of one (user, quest) instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    NotStarted,
    InProgress,
    Completed,
    Claimed,
    Failed,
    Expired,
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QuestStatus::NotStarted => "not started",
            QuestStatus::InProgress => "in progress",
            QuestStatus::Completed => "completed",
            QuestStatus::Claimed => "claimed",
            QuestStatus::Failed => "failed",
            QuestStatus::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// Per-requirement counter snapshot taken at activation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementCounter {
    pub kind: RequirementKind,
    pub target: Option<String>,
    pub current: u32,
    pub goal: u32,
}

impl RequirementCounter {
    pub fn from_requirement(requirement: &Requirement) -> Self {
        Self {
            kind: requirement.kind,
            target: requirement.target.clone(),
            current: 0,
            goal: requirement.amount,
        }
    }

    pub fn matches(&self, kind: RequirementKind, target: Option<&str>) -> bool {
        self.kind == kind && targets_match(self.target.as_deref(), target)
    }

    pub fn is_met(&self) -> bool {
        self.current >= self.goal
    }

    /// Add `amount`, saturating at the goal. Returns true if the counter moved.
    pub fn advance(&mut self, amount: u32) -> bool {
        let next = self.current.saturating_add(amount).min(self.goal);
        let moved = next > self.current;
        if moved {
            self.current = next;
        }
        moved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestInstance {
    pub quest_id: String,
    pub status: QuestStatus,
    pub counters: Vec<RequirementCounter>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl QuestInstance {
    /// Fresh in-progress instance with zeroed counters.
    pub fn start(definition: &QuestDefinition, now: DateTime<Utc>) -> Self {
        Self {
            quest_id: definition.id.clone(),
            status: QuestStatus::InProgress,
            counters: definition
                .requirements
                .iter()
                .map(RequirementCounter::from_requirement)
                .collect(),
            started_at: now,
            completed_at: None,
            claimed_at: None,
            cooldown_until: None,
            expires_at: definition.time_limit().map(|limit| now + limit),
        }
    }

    /// In progress or completed but not yet claimed.
    pub fn is_active(&self) -> bool {
        matches!(self.status, QuestStatus::InProgress | QuestStatus::Completed)
    }

    pub fn all_requirements_met(&self) -> bool {
        self.counters.iter().all(RequirementCounter::is_met)
    }

    pub fn is_on_cooldown_at(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Claimed,
    Abandoned,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestHistoryEntry {
    pub quest_id: String,
    pub outcome: HistoryOutcome,
    pub at: DateTime<Utc>,
}

/// Everything persisted about one user's quests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserQuestProgress {
    pub user_id: String,
    pub instances: BTreeMap<String, QuestInstance>,
    /// Quest ids that are finished for good, in completion order, without duplicates.
    pub completed: Vec<String>,
    pub completion_counts: BTreeMap<String, u32>,
    pub history: Vec<QuestHistoryEntry>,
    pub last_daily_refresh: Option<DateTime<Utc>>,
    pub last_weekly_refresh: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl UserQuestProgress {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            instances: BTreeMap::new(),
            completed: Vec::new(),
            completion_counts: BTreeMap::new(),
            history: Vec::new(),
            last_daily_refresh: None,
            last_weekly_refresh: None,
            created_at: now,
            updated_at: now,
            schema_version: PROGRESS_SCHEMA_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn instance(&self, quest_id: &str) -> Option<&QuestInstance> {
        self.instances.get(quest_id)
    }

    pub fn has_completed(&self, quest_id: &str) -> bool {
        self.completed.iter().any(|id| id == quest_id)
    }

    pub fn completion_count(&self, quest_id: &str) -> u32 {
        self.completion_counts.get(quest_id).copied().unwrap_or(0)
    }

    /// Current status of a quest for this user; `NotStarted` when nothing is recorded.
    pub fn status_of(&self, quest_id: &str) -> QuestStatus {
        match self.instances.get(quest_id) {
            Some(instance) => instance.status,
            None if self.has_completed(quest_id) => QuestStatus::Claimed,
            None => QuestStatus::NotStarted,
        }
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.instances
            .values()
            .filter(|i| i.is_active())
            .map(|i| i.quest_id.clone())
            .collect()
    }

    pub(crate) fn mark_completed(&mut self, quest_id: &str) {
        if !self.has_completed(quest_id) {
            self.completed.push(quest_id.to_string());
        }
    }

    pub(crate) fn push_history(&mut self, quest_id: &str, outcome: HistoryOutcome, at: DateTime<Utc>) {
        self.history.push(QuestHistoryEntry {
            quest_id: quest_id.to_string(),
            outcome,
            at,
        });
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}

/// One inbound gameplay action, e.g. a resolved catch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameplayEvent {
    pub kind: RequirementKind,
    pub amount: u32,
    pub target: Option<String>,
}

impl GameplayEvent {
    pub fn new(kind: RequirementKind) -> Self {
        Self {
            kind,
            amount: 1,
            target: None,
        }
    }

    pub fn with_amount(mut self, amount: u32) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }
}

/// Append-only ledger row recording one contribution to an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventContribution {
    pub id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub amount: u64,
    pub kind: RequirementKind,
    pub at: DateTime<Utc>,
    pub schema_version: u8,
}

impl EventContribution {
    pub fn new(user_id: &str, event_id: &str, amount: u64, kind: RequirementKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            amount,
            kind,
            at,
            schema_version: CONTRIBUTION_SCHEMA_VERSION,
        }
    }
}

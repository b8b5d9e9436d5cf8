//! Quest and event progress engine.
//! Definitions come from JSON files on disk; per-user progress, the event
//! contribution ledger and community totals live in sled.

pub mod catalog;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod format;
pub mod locks;
pub mod progress;
pub mod service;
pub mod storage;
pub mod sweep;
pub mod types;

pub use catalog::{cross_reference_problems, Definition, DefinitionCatalog, EventCatalog, QuestCatalog};
pub use dispatch::{DispatchReport, ProgressDispatcher, ProgressUpdate};
pub use errors::QuestError;
pub use events::{CommunityProgress, ContributionOutcome, EventManager};
pub use format::{
    format_claim, format_community_progress, format_dispatch_report, format_event_line,
    format_quest_list, format_quest_progress,
};
pub use locks::KeyedLocks;
pub use progress::{ClaimReceipt, UserQuestManager};
pub use service::{AbandonOutcome, ActivateOutcome, ClaimOutcome, QuestProgressView, QuestService};
pub use storage::{ProgressStore, ProgressStoreBuilder};
pub use sweep::{next_period_start, period_start, EventNotification, EventSweeper, RefreshScheduler};
pub use types::*;

//! # Veramon - Quest and Event Progress Engine
//!
//! The progress-tracking core of the Veramon Reunited creature-collecting chat game.
//! Gameplay actions reported by the chat layer (catches, battle wins, trades, ...)
//! advance per-user quest counters and feed community goals of running events.
//!
//! ## Features
//!
//! - **Quest lifecycle**: activate, track, complete, claim, abandon; repeatable quests with
//!   cooldowns and completion caps; prerequisites, availability windows and time limits.
//! - **Daily/weekly rotation**: recurring quests reset lazily at UTC midnight and Monday 00:00 UTC.
//! - **Events**: time-bounded events with community goals, a contribution ledger and
//!   start/end/ending-soon announcements.
//! - **Definitions on disk**: quests and events are JSON files, hot-reloadable, with an admin
//!   edit path that rewrites files under a lock.
//! - **Safe under concurrency**: per-user and per-event async locks around every
//!   read-modify-write of persisted state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veramon::config::Config;
//! use veramon::quests::{GameplayEvent, QuestService, RequirementKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let service = QuestService::open(&config)?;
//!
//!     let event = GameplayEvent::new(RequirementKind::Catch).with_target("fire");
//!     let report = service.on_gameplay_event("123456789", event).await?;
//!     for update in report.newly_completed() {
//!         println!("completed {}", update.title);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`quests`] - Definitions, progress store, lifecycle, dispatch, events and sweeps
//! - [`config`] - Configuration management
//! - [`validation`] - Id validation for the definition edit path
//! - [`metrics`] - Process-wide counters

pub mod config;
pub mod metrics;
pub mod quests;
pub mod validation;

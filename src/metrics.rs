//! Process-wide counters for the quest engine.
//! Read by the `status` command and logged by the sweep loop.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

static GAMEPLAY_EVENTS: AtomicU64 = AtomicU64::new(0);
static PROGRESS_UPDATES: AtomicU64 = AtomicU64::new(0);
static QUESTS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static QUESTS_CLAIMED: AtomicU64 = AtomicU64::new(0);
static QUESTS_EXPIRED: AtomicU64 = AtomicU64::new(0);
static DISPATCH_FAILURES: AtomicU64 = AtomicU64::new(0);

static EVENT_COUNTERS: OnceLock<Mutex<HashMap<String, EventCounter>>> = OnceLock::new();

pub fn inc_gameplay_events() {
    GAMEPLAY_EVENTS.fetch_add(1, Ordering::Relaxed);
}

pub fn add_progress_updates(count: u64) {
    PROGRESS_UPDATES.fetch_add(count, Ordering::Relaxed);
}

pub fn add_quests_completed(count: u64) {
    QUESTS_COMPLETED.fetch_add(count, Ordering::Relaxed);
}

pub fn inc_quests_claimed() {
    QUESTS_CLAIMED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_quests_expired(count: u64) {
    QUESTS_EXPIRED.fetch_add(count, Ordering::Relaxed);
}

pub fn inc_dispatch_failures() {
    DISPATCH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

/// Contribution activity for one event since process start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventCounter {
    pub contributions: u64,
    pub amount: u64,
}

fn event_counter_lock() -> &'static Mutex<HashMap<String, EventCounter>> {
    EVENT_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn record_contribution(event_id: &str, amount: u64) -> EventCounter {
    let mut guard = event_counter_lock()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let counter = guard.entry(event_id.to_string()).or_default();
    counter.contributions = counter.contributions.saturating_add(1);
    counter.amount = counter.amount.saturating_add(amount);
    *counter
}

pub fn event_counters_snapshot() -> HashMap<String, EventCounter> {
    event_counter_lock()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub gameplay_events: u64,
    pub progress_updates: u64,
    pub quests_completed: u64,
    pub quests_claimed: u64,
    pub quests_expired: u64,
    pub dispatch_failures: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        gameplay_events: GAMEPLAY_EVENTS.load(Ordering::Relaxed),
        progress_updates: PROGRESS_UPDATES.load(Ordering::Relaxed),
        quests_completed: QUESTS_COMPLETED.load(Ordering::Relaxed),
        quests_claimed: QUESTS_CLAIMED.load(Ordering::Relaxed),
        quests_expired: QUESTS_EXPIRED.load(Ordering::Relaxed),
        dispatch_failures: DISPATCH_FAILURES.load(Ordering::Relaxed),
    }
}

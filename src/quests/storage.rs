use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Transactional};

use crate::quests::errors::QuestError;
use crate::quests::types::{
    EventContribution, UserQuestProgress, CONTRIBUTION_SCHEMA_VERSION, PROGRESS_SCHEMA_VERSION,
};
use crate::validation::canonical_user_id;

const TREE_PROGRESS: &str = "quest_progress";
const TREE_LEDGER: &str = "event_ledger";
const TREE_TOTALS: &str = "event_totals";

fn next_timestamp_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000)
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct ProgressStoreBuilder {
    path: PathBuf,
    flush_on_write: bool,
}

impl ProgressStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_on_write: true,
        }
    }

    /// Skip the explicit flush after each write and rely on sled's background flushing.
    pub fn without_flush(mut self) -> Self {
        self.flush_on_write = false;
        self
    }

    pub fn open(self) -> Result<ProgressStore, QuestError> {
        ProgressStore::open_with_options(self.path, self.flush_on_write)
    }
}

/// Sled-backed persistence for per-user quest progress, the event contribution
/// ledger, and community-goal running totals.
pub struct ProgressStore {
    _db: sled::Db,
    progress: sled::Tree,
    ledger: sled::Tree,
    totals: sled::Tree,
    flush_on_write: bool,
}

impl ProgressStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QuestError> {
        Self::open_with_options(path, true)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, flush_on_write: bool) -> Result<Self, QuestError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let progress = db.open_tree(TREE_PROGRESS)?;
        let ledger = db.open_tree(TREE_LEDGER)?;
        let totals = db.open_tree(TREE_TOTALS)?;
        Ok(Self {
            _db: db,
            progress,
            ledger,
            totals,
            flush_on_write,
        })
    }

    fn progress_key(user_id: &str) -> Vec<u8> {
        format!("progress:{}", user_id.trim()).into_bytes()
    }

    // Ledger key segments carry their byte length, so no event or user id can
    // reach into another id's prefix: `ledger:<len>:<event>:<len>:<user>:<ts>:<uuid>`.
    fn ledger_event_prefix(event_id: &str) -> Vec<u8> {
        format!("ledger:{}:{}:", event_id.len(), event_id).into_bytes()
    }

    fn ledger_user_prefix(event_id: &str, user_id: &str) -> Vec<u8> {
        let mut key = Self::ledger_event_prefix(event_id);
        key.extend_from_slice(format!("{}:{}:", user_id.len(), user_id).as_bytes());
        key
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, QuestError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, QuestError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    fn decode_total(bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        if bytes.len() == 8 {
            buf.copy_from_slice(bytes);
        }
        u64::from_be_bytes(buf)
    }

    fn maybe_flush(&self, tree: &sled::Tree) -> Result<(), QuestError> {
        if self.flush_on_write {
            tree.flush()?;
        }
        Ok(())
    }

    /// Insert or update a user's progress record.
    pub fn put_progress(&self, mut progress: UserQuestProgress) -> Result<(), QuestError> {
        progress.user_id = canonical_user_id(&progress.user_id)?;
        progress.schema_version = PROGRESS_SCHEMA_VERSION;
        progress.touch();
        let key = Self::progress_key(&progress.user_id);
        let bytes = Self::serialize(&progress)?;
        self.progress.insert(key, bytes)?;
        self.maybe_flush(&self.progress)
    }

    /// Fetch a user's progress record, if one has been written.
    pub fn get_progress(&self, user_id: &str) -> Result<Option<UserQuestProgress>, QuestError> {
        let key = Self::progress_key(user_id);
        let Some(bytes) = self.progress.get(&key)? else {
            return Ok(None);
        };
        let record: UserQuestProgress = Self::deserialize(bytes)?;
        if record.schema_version != PROGRESS_SCHEMA_VERSION {
            return Err(QuestError::SchemaMismatch {
                entity: "progress",
                expected: PROGRESS_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    /// Fetch a user's progress record, starting an empty one for first-time players.
    pub fn load_or_new(&self, user_id: &str) -> Result<UserQuestProgress, QuestError> {
        let user_id = canonical_user_id(user_id)?;
        Ok(self
            .get_progress(&user_id)?
            .unwrap_or_else(|| UserQuestProgress::new(&user_id)))
    }

    /// Drop a user's record entirely; the next touch starts them from scratch.
    pub fn delete_progress(&self, user_id: &str) -> Result<bool, QuestError> {
        let removed = self.progress.remove(Self::progress_key(user_id))?.is_some();
        self.maybe_flush(&self.progress)?;
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn put_raw_progress(&self, user_id: &str, bytes: &[u8]) -> Result<(), QuestError> {
        self.progress.insert(Self::progress_key(user_id), bytes)?;
        Ok(())
    }

    /// List all user ids with a stored progress record.
    pub fn list_user_ids(&self) -> Result<Vec<String>, QuestError> {
        let mut ids = Vec::new();
        for entry in self.progress.scan_prefix(b"progress:") {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(user_id) = text.strip_prefix("progress:") {
                ids.push(user_id.to_string());
            }
        }
        Ok(ids)
    }

    /// Append one row to the contribution ledger and add its amount to the event's
    /// running total, both in one transaction. Returns the new total.
    pub fn record_contribution(&self, mut contribution: EventContribution) -> Result<u64, QuestError> {
        contribution.user_id = canonical_user_id(&contribution.user_id)?;
        contribution.schema_version = CONTRIBUTION_SCHEMA_VERSION;
        let mut key = Self::ledger_user_prefix(&contribution.event_id, &contribution.user_id);
        key.extend_from_slice(format!("{:020}:{}", next_timestamp_nanos(), contribution.id).as_bytes());
        let row = Self::serialize(&contribution)?;
        let total_key = contribution.event_id.as_bytes();
        let amount = contribution.amount;

        let total = (&self.ledger, &self.totals)
            .transaction(|(ledger, totals)| {
                ledger.insert(key.as_slice(), row.as_slice())?;
                let current = totals
                    .get(total_key)?
                    .map(|bytes| Self::decode_total(&bytes))
                    .unwrap_or(0);
                let next = current.saturating_add(amount);
                totals.insert(total_key, next.to_be_bytes().to_vec())?;
                Ok::<u64, ConflictableTransactionError<()>>(next)
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => QuestError::Sled(e),
                TransactionError::Abort(()) => QuestError::TransactionAborted,
            })?;
        self.maybe_flush(&self.ledger)?;
        self.maybe_flush(&self.totals)?;
        Ok(total)
    }

    /// All ledger rows for an event, grouped by contributor and in time order within each.
    pub fn list_contributions(&self, event_id: &str) -> Result<Vec<EventContribution>, QuestError> {
        self.ledger
            .scan_prefix(Self::ledger_event_prefix(event_id))
            .map(|result| {
                result
                    .map_err(QuestError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect()
    }

    /// Sum of one user's ledger rows for an event.
    pub fn user_contribution_total(&self, event_id: &str, user_id: &str) -> Result<u64, QuestError> {
        let mut total = 0u64;
        for entry in self.ledger.scan_prefix(Self::ledger_user_prefix(event_id, user_id.trim())) {
            let (_key, value) = entry?;
            let row: EventContribution = Self::deserialize(value)?;
            total = total.saturating_add(row.amount);
        }
        Ok(total)
    }

    /// Per-user sums for an event.
    pub fn contribution_totals_by_user(&self, event_id: &str) -> Result<BTreeMap<String, u64>, QuestError> {
        let mut totals = BTreeMap::new();
        for row in self.list_contributions(event_id)? {
            let entry = totals.entry(row.user_id).or_insert(0u64);
            *entry = entry.saturating_add(row.amount);
        }
        Ok(totals)
    }

    /// Current community-goal running total for an event (0 when never contributed to).
    pub fn community_total(&self, event_id: &str) -> Result<u64, QuestError> {
        Ok(self
            .totals
            .get(event_id.as_bytes())?
            .map(|bytes| Self::decode_total(&bytes))
            .unwrap_or(0))
    }
}

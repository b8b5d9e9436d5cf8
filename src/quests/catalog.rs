//! Definition catalogs loaded from JSON files on disk.
//!
//! Quest definitions live in one sub-directory per recurrence class
//! (`daily/`, `weekly/`, `story/`, `achievement/`, `event/`); event definitions
//! may be laid out freely under their root. Every `.json` file holds either a
//! single definition object or a list of them. Broken files and entries are
//! logged and skipped so one bad edit never takes the catalog down.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::quests::errors::QuestError;
use crate::quests::types::{EventDefinition, EventType, QuestDefinition, QuestType};
use crate::validation::validate_definition_id;

/// A definition type that can be served from a [`DefinitionCatalog`].
pub trait Definition: Serialize + DeserializeOwned + Clone {
    type Category: Copy + Eq + Debug;

    /// Used in log lines ("quest", "event").
    const LABEL: &'static str;

    fn id(&self) -> &str;

    fn category(&self) -> Self::Category;

    /// Sub-directory new definitions of `category` are written to; `None` means the root.
    fn category_dir(category: Self::Category) -> Option<&'static str>;

    /// Value for a missing `type` field, inferred from the directory the file sits in.
    fn type_for_dir(_dir: &str) -> Option<&'static str> {
        None
    }
}

impl Definition for QuestDefinition {
    type Category = QuestType;
    const LABEL: &'static str = "quest";

    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> QuestType {
        self.quest_type
    }

    fn category_dir(category: QuestType) -> Option<&'static str> {
        Some(category.dir_name())
    }

    fn type_for_dir(dir: &str) -> Option<&'static str> {
        QuestType::from_dir_name(dir).map(|t| t.dir_name())
    }
}

impl Definition for EventDefinition {
    type Category = EventType;
    const LABEL: &'static str = "event";

    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> EventType {
        self.event_type
    }

    fn category_dir(_category: EventType) -> Option<&'static str> {
        None
    }
}

pub type QuestCatalog = DefinitionCatalog<QuestDefinition>;
pub type EventCatalog = DefinitionCatalog<EventDefinition>;

/// In-memory id → definition map plus the file each definition came from.
#[derive(Debug, Clone)]
pub struct DefinitionCatalog<T: Definition> {
    root: PathBuf,
    entries: BTreeMap<String, T>,
    sources: HashMap<String, PathBuf>,
}

impl<T: Definition> DefinitionCatalog<T> {
    /// Catalog with no definitions; `upsert` writes below `root`.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: BTreeMap::new(),
            sources: HashMap::new(),
        }
    }

    /// Load every definition under `root`. A missing root yields an empty catalog.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, QuestError> {
        let mut catalog = Self::empty(root);
        catalog.reload()?;
        Ok(catalog)
    }

    /// Replace the in-memory contents with a fresh read of the directory tree.
    pub fn reload(&mut self) -> Result<usize, QuestError> {
        let mut entries = BTreeMap::new();
        let mut sources: HashMap<String, PathBuf> = HashMap::new();

        if !self.root.exists() {
            warn!(
                "{} definition directory {} does not exist; catalog is empty",
                T::LABEL,
                self.root.display()
            );
        } else {
            let mut files = Vec::new();
            collect_json_files(&self.root, &mut files)?;
            files.sort();
            for path in files {
                for definition in parse_definition_file::<T>(&path) {
                    let id = definition.id().to_string();
                    if let Some(previous) = sources.get(&id) {
                        warn!(
                            "duplicate {} id '{}': {} overrides {}",
                            T::LABEL,
                            id,
                            path.display(),
                            previous.display()
                        );
                    }
                    sources.insert(id.clone(), path.clone());
                    entries.insert(id, definition);
                }
            }
        }

        self.entries = entries;
        self.sources = sources;
        info!(
            "Loaded {} {} definition(s) from {}",
            self.entries.len(),
            T::LABEL,
            self.root.display()
        );
        Ok(self.entries.len())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Definitions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn list_by_type(&self, category: T::Category) -> Vec<&T> {
        self.entries
            .values()
            .filter(|d| d.category() == category)
            .collect()
    }

    /// File the definition was loaded from or last written to.
    pub fn source_of(&self, id: &str) -> Option<&Path> {
        self.sources.get(id).map(PathBuf::as_path)
    }

    /// Insert without touching disk.
    pub fn insert(&mut self, definition: T) {
        self.entries.insert(definition.id().to_string(), definition);
    }

    /// Admin edit path: write `definition` to its backing file, then update the map.
    ///
    /// Existing definitions are rewritten in place (inside list files too); new ones
    /// go to `<root>/<category>/<id>.json`.
    pub fn upsert(&mut self, definition: T) -> Result<PathBuf, QuestError> {
        let id = definition.id().to_string();
        validate_definition_id(&id)
            .map_err(|e| QuestError::InvalidDefinition(format!("{}: {}", id, e)))?;

        let path = match self.sources.get(&id) {
            Some(existing) => existing.clone(),
            None => {
                let mut dir = self.root.clone();
                if let Some(sub) = T::category_dir(definition.category()) {
                    dir.push(sub);
                }
                fs::create_dir_all(&dir)?;
                dir.join(format!("{}.json", id))
            }
        };

        let value = serde_json::to_value(&definition)?;
        rewrite_file_locked(&path, |existing| {
            let updated = match existing {
                None => value.clone(),
                Some(Value::Array(mut items)) => {
                    match items.iter().position(|v| entry_id(v) == Some(id.as_str())) {
                        Some(pos) => items[pos] = value.clone(),
                        None => items.push(value.clone()),
                    }
                    Value::Array(items)
                }
                Some(other) if entry_id(&other) == Some(id.as_str()) => value.clone(),
                Some(other) => Value::Array(vec![other, value.clone()]),
            };
            Ok(Some(updated))
        })?;

        info!("Wrote {} '{}' to {}", T::LABEL, id, path.display());
        self.sources.insert(id.clone(), path.clone());
        self.entries.insert(id, definition);
        Ok(path)
    }

    /// Admin edit path: drop a definition from its backing file and from the map.
    pub fn remove(&mut self, id: &str) -> Result<bool, QuestError> {
        let Some(path) = self.sources.get(id).cloned() else {
            return Ok(self.entries.remove(id).is_some());
        };

        rewrite_file_locked(&path, |existing| match existing {
            Some(Value::Array(mut items)) => {
                items.retain(|v| entry_id(v) != Some(id));
                if items.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Value::Array(items)))
                }
            }
            Some(other) if entry_id(&other) != Some(id) => {
                warn!(
                    "{} no longer holds {} '{}'; left untouched",
                    path.display(),
                    T::LABEL,
                    id
                );
                Ok(Some(other))
            }
            _ => Ok(None),
        })?;

        info!("Removed {} '{}' from {}", T::LABEL, id, path.display());
        self.sources.remove(id);
        Ok(self.entries.remove(id).is_some())
    }
}

fn entry_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), QuestError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Parse one file into definitions, logging and skipping anything unusable.
fn parse_definition_file<T: Definition>(path: &Path) -> Vec<T> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let document: Value = match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let raw_entries = match document {
        Value::Array(items) => items,
        Value::Object(_) => vec![document],
        _ => {
            warn!(
                "{} is neither a {} object nor a list; skipped",
                path.display(),
                T::LABEL
            );
            return Vec::new();
        }
    };

    let inferred_type = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(T::type_for_dir);

    let mut definitions = Vec::with_capacity(raw_entries.len());
    for (index, mut raw) in raw_entries.into_iter().enumerate() {
        let Some(id) = entry_id(&raw).map(str::to_string) else {
            warn!(
                "{} entry #{} in {} has no id; skipped",
                T::LABEL,
                index,
                path.display()
            );
            continue;
        };
        if let Err(e) = validate_definition_id(&id) {
            warn!(
                "{} id '{}' in {} is not usable: {}; skipped",
                T::LABEL,
                id,
                path.display(),
                e
            );
            continue;
        }
        if let (Some(default_type), Value::Object(map)) = (inferred_type, &mut raw) {
            map.entry("type")
                .or_insert_with(|| Value::String(default_type.to_string()));
        }
        match serde_json::from_value::<T>(raw) {
            Ok(definition) => {
                debug!("Parsed {} '{}' from {}", T::LABEL, id, path.display());
                definitions.push(definition);
            }
            Err(e) => warn!(
                "Invalid {} '{}' in {}: {}; skipped",
                T::LABEL,
                id,
                path.display(),
                e
            ),
        }
    }
    definitions
}

/// Rewrite a JSON file while holding an exclusive lock on its `.<name>.lock` sidecar.
/// `edit` receives the current document (`None` when the file is missing or empty)
/// and returns the replacement; returning `None` deletes the file.
///
/// The sidecar stays in place: the definition file itself is replaced by rename, so
/// it cannot carry the lock.
fn rewrite_file_locked<F>(path: &Path, edit: F) -> Result<(), QuestError>
where
    F: FnOnce(Option<Value>) -> Result<Option<Value>, QuestError>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("definition.json");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(dir.join(format!(".{}.lock", base)))?;
    lock_file.lock_exclusive()?;

    let current = match fs::read_to_string(path) {
        Ok(existing) if existing.trim().is_empty() => None,
        Ok(existing) => Some(serde_json::from_str::<Value>(&existing)?),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let Some(updated) = edit(current)? else {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        drop(lock_file);
        return Ok(());
    };
    let content = serde_json::to_string_pretty(&updated)?;

    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e.into()),
        }
    };

    fs::rename(&tmp_path, path)?;
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}

/// Dangling references and impossible values across the two catalogs, one line each.
/// Loading never fails on these; `veramon validate` reports them.
pub fn cross_reference_problems(quests: &QuestCatalog, events: &EventCatalog) -> Vec<String> {
    let mut problems = Vec::new();
    for quest in quests.iter() {
        for prereq in &quest.prerequisites {
            if !quests.contains(prereq) {
                problems.push(format!("quest {}: unknown prerequisite {}", quest.id, prereq));
            }
        }
        if let Some(event_id) = &quest.event_id {
            if !events.contains(event_id) {
                problems.push(format!("quest {}: unknown event {}", quest.id, event_id));
            }
        }
        if quest.quest_type == QuestType::Event && quest.event_id.is_none() {
            problems.push(format!("quest {}: event quest without event_id", quest.id));
        }
        for requirement in &quest.requirements {
            if requirement.amount == 0 {
                problems.push(format!("quest {}: {} requirement with amount 0", quest.id, requirement.kind));
            }
        }
    }
    for event in events.iter() {
        if event.end <= event.start {
            problems.push(format!("event {}: ends before it starts", event.id));
        }
        for quest_id in &event.quests {
            if !quests.contains(quest_id) {
                problems.push(format!("event {}: unknown quest {}", event.id, quest_id));
            }
        }
        if let Some(goal) = &event.community_goal {
            if goal.target == 0 {
                problems.push(format!("event {}: community goal target is 0", event.id));
            }
        }
    }
    problems
}

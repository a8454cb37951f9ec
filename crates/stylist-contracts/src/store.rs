use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

pub const GENERATION_COUNT_KEY: &str = "generationCount";
pub const MAX_GENERATIONS_KEY: &str = "maxGenerations";
pub const IS_PRO_KEY: &str = "isPro";
pub const GENERATION_HISTORY_KEY: &str = "generationHistory";

/// Keys written together. A later `put` of the same key replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBatch {
    entries: Vec<(String, Value)>,
}

impl StateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: Value) -> &mut Self {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for StateBatch {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Per-device key/value capability the studio persists through.
///
/// Reads never fail: an absent or unreadable backing store reads as empty and
/// callers apply their own defaults. A committed batch lands whole or not at
/// all.
pub trait KeyValueStore: Send {
    fn get(&mut self, key: &str) -> Option<Value>;

    fn commit(&mut self, batch: StateBatch) -> anyhow::Result<()>;

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut batch = StateBatch::new();
        batch.put(key, value);
        self.commit(batch)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn commit(&mut self, batch: StateBatch) -> anyhow::Result<()> {
        self.values.extend(batch);
        Ok(())
    }
}

/// Studio state as one JSON object on disk.
///
/// Every read goes to disk. A commit merges its keys into whatever is on disk
/// at that moment, so handles sharing a file keep each other's keys, and then
/// replaces the file through a sibling temp file and a rename. A crash mid
/// write leaves the previous state in place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&mut self, key: &str) -> Option<Value> {
        load_state(&self.path)?.remove(key)
    }

    fn commit(&mut self, batch: StateBatch) -> anyhow::Result<()> {
        let mut state = load_state(&self.path).unwrap_or_default();
        let mut changed = false;
        for (key, value) in batch {
            if state.get(&key) != Some(&value) {
                state.insert(key, value);
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
        replace_state(&self.path, &state)
    }
}

/// Non-negative integer under `key`, or `default` when absent or malformed.
pub fn read_count(store: &mut dyn KeyValueStore, key: &str, default: u64) -> u64 {
    store
        .get(key)
        .and_then(|value| value.as_u64())
        .unwrap_or(default)
}

pub fn read_flag(store: &mut dyn KeyValueStore, key: &str, default: bool) -> bool {
    store
        .get(key)
        .and_then(|value| value.as_bool())
        .unwrap_or(default)
}

/// String list under `key`; non-string rows are dropped.
pub fn read_string_list(store: &mut dyn KeyValueStore, key: &str) -> Vec<String> {
    store
        .get(key)
        .and_then(|value| value.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| row.as_str().map(str::to_string))
        .collect()
}

fn load_state(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read(path).ok()?;
    match serde_json::from_slice(&raw).ok()? {
        Value::Object(state) => Some(state),
        _ => None,
    }
}

fn replace_state(path: &Path, state: &Map<String, Value>) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state directory {}", dir.display()))?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage state in {}", dir.display()))?;
    serde_json::to_writer(staged.as_file_mut(), state)?;
    staged.as_file_mut().flush()?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

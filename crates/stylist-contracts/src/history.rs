use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::store::{read_string_list, KeyValueStore, StateBatch, GENERATION_HISTORY_KEY};

pub const HISTORY_CAPACITY: usize = 20;
pub const EXPORT_FILE_PREFIX: &str = "miss-slivki-ai-style";

/// A finished, watermarked image as a data URL. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationResult(String);

impl GenerationResult {
    pub fn new(data_url: impl Into<String>) -> Self {
        Self(data_url.into())
    }

    pub fn data_url(&self) -> &str {
        &self.0
    }

    fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for GenerationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local save capability used by batch export.
pub trait SaveTarget {
    fn save(&mut self, data_url: &str, filename: &str) -> anyhow::Result<PathBuf>;
}

/// Most-recent-first result history plus the batch-export selection.
///
/// The selection is keyed by the content digest of each result, so two
/// entries holding identical bytes are selected together. Every selected key
/// always belongs to a current entry.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<GenerationResult>,
    selection: IndexMap<String, GenerationResult>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = GenerationResult>) -> Self {
        let mut entries: Vec<GenerationResult> = entries.into_iter().collect();
        entries.truncate(HISTORY_CAPACITY);
        Self {
            entries,
            selection: IndexMap::new(),
        }
    }

    pub fn load(store: &mut dyn KeyValueStore) -> Self {
        Self::from_entries(
            read_string_list(store, GENERATION_HISTORY_KEY)
                .into_iter()
                .map(GenerationResult::new),
        )
    }

    pub fn stage(&self, batch: &mut StateBatch) {
        let rows = self
            .entries
            .iter()
            .map(|entry| Value::String(entry.data_url().to_string()))
            .collect();
        batch.put(GENERATION_HISTORY_KEY, Value::Array(rows));
    }

    pub fn persist(&self, store: &mut dyn KeyValueStore) -> anyhow::Result<()> {
        let mut batch = StateBatch::new();
        self.stage(&mut batch);
        store.commit(batch)
    }

    pub fn record(&mut self, result: GenerationResult) {
        self.entries.insert(0, result);
        if self.entries.len() <= HISTORY_CAPACITY {
            return;
        }
        self.entries.truncate(HISTORY_CAPACITY);
        let live: Vec<String> = self.entries.iter().map(GenerationResult::digest).collect();
        self.selection.retain(|key, _| live.contains(key));
    }

    pub fn entries(&self) -> &[GenerationResult] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&GenerationResult> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flips membership of `result` and returns the new state. Results that
    /// are not in the history are ignored.
    pub fn toggle_selection(&mut self, result: &GenerationResult) -> bool {
        let key = result.digest();
        if self.selection.shift_remove(&key).is_some() {
            return false;
        }
        if !self.entries.contains(result) {
            return false;
        }
        self.selection.insert(key, result.clone());
        true
    }

    /// Adds `result` to the selection unless it is already there. Returns
    /// whether the selection grew; results outside the history are ignored.
    pub fn select(&mut self, result: &GenerationResult) -> bool {
        let key = result.digest();
        if self.selection.contains_key(&key) || !self.entries.contains(result) {
            return false;
        }
        self.selection.insert(key, result.clone());
        true
    }

    pub fn is_selected(&self, result: &GenerationResult) -> bool {
        self.selection.contains_key(&result.digest())
    }

    pub fn selected(&self) -> impl Iterator<Item = &GenerationResult> {
        self.selection.values()
    }

    pub fn selected_count(&self) -> usize {
        self.selection.len()
    }

    /// Saves every selected result in selection order. Filenames share the
    /// `stamp_ms` and carry a 1-based ordinal.
    pub fn export_selected(
        &self,
        target: &mut dyn SaveTarget,
        stamp_ms: i64,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let mut saved = Vec::with_capacity(self.selection.len());
        for (idx, result) in self.selection.values().enumerate() {
            let filename = export_filename(stamp_ms, idx + 1);
            saved.push(target.save(result.data_url(), &filename)?);
        }
        Ok(saved)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.selection.clear();
    }
}

pub fn export_filename(stamp_ms: i64, ordinal: usize) -> String {
    format!("{EXPORT_FILE_PREFIX}-{stamp_ms}-{ordinal}.png")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::store::MemoryStore;

    use super::*;

    fn result(label: &str) -> GenerationResult {
        GenerationResult::new(format!("data:image/png;base64,{label}"))
    }

    #[derive(Default)]
    struct RecordingTarget {
        saved: Vec<(String, String)>,
    }

    impl SaveTarget for RecordingTarget {
        fn save(&mut self, data_url: &str, filename: &str) -> anyhow::Result<PathBuf> {
            self.saved.push((data_url.to_string(), filename.to_string()));
            Ok(PathBuf::from(filename))
        }
    }

    #[test]
    fn record_keeps_newest_first_and_caps_length() {
        let mut history = HistoryStore::new();
        for idx in 0..45 {
            history.record(result(&idx.to_string()));
            assert!(history.len() <= HISTORY_CAPACITY);
            assert_eq!(history.get(0), Some(&result(&idx.to_string())));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.get(19), Some(&result("25")));
    }

    #[test]
    fn record_on_full_history_drops_the_oldest() {
        let mut history = HistoryStore::from_entries((0..20).map(|idx| result(&idx.to_string())));
        let oldest = result("19");
        assert!(history.toggle_selection(&oldest));

        history.record(result("new"));

        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.get(0), Some(&result("new")));
        assert!(!history.entries().contains(&oldest));
        assert_eq!(history.selected_count(), 0);
    }

    #[test]
    fn toggle_is_symmetric_and_ignores_strangers() {
        let mut history = HistoryStore::from_entries([result("a"), result("b")]);
        assert!(history.toggle_selection(&result("b")));
        assert!(history.is_selected(&result("b")));
        assert!(!history.toggle_selection(&result("b")));
        assert!(!history.is_selected(&result("b")));

        assert!(!history.toggle_selection(&result("zzz")));
        assert_eq!(history.selected_count(), 0);
    }

    #[test]
    fn select_is_idempotent_where_toggle_is_not() {
        let mut history = HistoryStore::from_entries([result("a"), result("a"), result("b")]);
        assert!(history.select(&result("a")));
        assert!(!history.select(&result("a")));
        assert!(history.is_selected(&result("a")));
        assert_eq!(history.selected_count(), 1);

        assert!(!history.select(&result("zzz")));
        assert_eq!(history.selected_count(), 1);
    }

    #[test]
    fn identical_entries_share_selection() {
        let mut history = HistoryStore::from_entries([result("same"), result("same")]);
        history.toggle_selection(&result("same"));
        assert!(history.entries().iter().all(|entry| history.is_selected(entry)));
        assert_eq!(history.selected_count(), 1);
    }

    #[test]
    fn export_uses_selection_order_and_unique_names() -> anyhow::Result<()> {
        let mut history = HistoryStore::from_entries([result("a"), result("b"), result("c")]);
        history.toggle_selection(&result("c"));
        history.toggle_selection(&result("a"));

        let mut target = RecordingTarget::default();
        let saved = history.export_selected(&mut target, 1_700_000_000_000)?;

        assert_eq!(saved.len(), 2);
        assert_eq!(
            target.saved,
            vec![
                (
                    result("c").data_url().to_string(),
                    "miss-slivki-ai-style-1700000000000-1.png".to_string()
                ),
                (
                    result("a").data_url().to_string(),
                    "miss-slivki-ai-style-1700000000000-2.png".to_string()
                ),
            ]
        );
        Ok(())
    }

    #[test]
    fn export_with_empty_selection_is_a_noop() -> anyhow::Result<()> {
        let history = HistoryStore::from_entries([result("a")]);
        let mut target = RecordingTarget::default();
        assert!(history.export_selected(&mut target, 1)?.is_empty());
        assert!(target.saved.is_empty());
        Ok(())
    }

    #[test]
    fn clear_empties_entries_and_selection_together() {
        let mut history = HistoryStore::from_entries([result("a"), result("b")]);
        history.toggle_selection(&result("a"));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.selected_count(), 0);
    }

    #[test]
    fn load_truncates_and_skips_malformed_rows() -> anyhow::Result<()> {
        let rows: Vec<Value> = (0..25).map(|idx| json!(format!("img-{idx}"))).collect();
        let mut store = MemoryStore::with_values([(
            GENERATION_HISTORY_KEY.to_string(),
            Value::Array(rows),
        )]);
        let history = HistoryStore::load(&mut store);
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.get(0).map(GenerationResult::data_url), Some("img-0"));

        history.persist(&mut store)?;
        assert_eq!(
            store
                .get(GENERATION_HISTORY_KEY)
                .and_then(|value| value.as_array().map(Vec::len)),
            Some(HISTORY_CAPACITY)
        );

        let mut broken = MemoryStore::with_values([(
            GENERATION_HISTORY_KEY.to_string(),
            json!({"not": "a list"}),
        )]);
        assert!(HistoryStore::load(&mut broken).is_empty());
        Ok(())
    }
}

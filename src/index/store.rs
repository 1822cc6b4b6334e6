//! Embedded document store for run snapshots
//!
//! Holds one flat [`Document`] per run id plus the table of every field ever
//! seen. Searchable keys get an equality index so that `==`, `in` and their
//! conjunctions/disjunctions are answered without scanning every run. The whole
//! store persists as a single pretty-printed JSON file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::query::{is_searchable, CompareOp, Predicate};
use crate::record::{ARTIFACT_MARKER, METRIC_MARKER};
use crate::value::Value;
use crate::{Error, Result};

/// Flat key → value view of one run.
pub type Document = BTreeMap<String, Value>;

/// Kind of a field as recorded in the field table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Value present in the snapshot, with its type name (`int`, `str`, ...)
    Resolved(String),
    /// Metric series loaded on first read
    LazyMetric,
    /// Artifact group loaded on first read
    LazyArtifact,
}

impl FieldKind {
    /// Kind of `value` stored under `key`.
    #[must_use]
    pub fn of(key: &str, value: &Value) -> Self {
        match value.as_str() {
            Some(ARTIFACT_MARKER) if key.starts_with("artifact.") => Self::LazyArtifact,
            Some(METRIC_MARKER) if !is_searchable(key) => Self::LazyMetric,
            _ => Self::Resolved(value.type_name().to_string()),
        }
    }

    /// Returns true for lazily loaded kinds.
    #[must_use]
    pub const fn is_lazy(&self) -> bool {
        matches!(self, Self::LazyMetric | Self::LazyArtifact)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(type_name) => f.write_str(type_name),
            Self::LazyMetric => f.write_str("lazy metric"),
            Self::LazyArtifact => f.write_str("lazy artifact"),
        }
    }
}

impl FromStr for FieldKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "lazy metric" => Self::LazyMetric,
            "lazy artifact" => Self::LazyArtifact,
            other => Self::Resolved(other.to_string()),
        })
    }
}

/// Provenance of a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// When the snapshot was built
    pub created_at: DateTime<Utc>,
    /// Directory that was scanned
    pub src_dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    header: SnapshotHeader,
    runs: BTreeMap<u64, BTreeMap<String, serde_json::Value>>,
    fields: BTreeMap<String, String>,
}

/// In-memory run documents with a per-field equality index.
#[derive(Debug)]
pub struct DocumentStore {
    header: SnapshotHeader,
    runs: BTreeMap<u64, Document>,
    fields: BTreeMap<String, FieldKind>,
    index: FxHashMap<String, FxHashMap<Value, BTreeSet<u64>>>,
}

impl DocumentStore {
    /// Empty store for runs scanned from `src_dir`.
    #[must_use]
    pub fn new(src_dir: impl Into<PathBuf>) -> Self {
        Self {
            header: SnapshotHeader {
                created_at: Utc::now(),
                src_dir: src_dir.into(),
            },
            runs: BTreeMap::new(),
            fields: BTreeMap::new(),
            index: FxHashMap::default(),
        }
    }

    /// Snapshot provenance.
    #[must_use]
    pub const fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// Number of runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if the store holds no run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Insert (or replace) a run document and record its fields.
    pub fn insert(&mut self, id: u64, document: Document) {
        self.unindex(id);
        for (key, value) in &document {
            self.fields.insert(key.clone(), FieldKind::of(key, value));
            if is_searchable(key) {
                self.index
                    .entry(key.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(id);
            }
        }
        self.runs.insert(id, document);
    }

    fn unindex(&mut self, id: u64) {
        let Some(old) = self.runs.get(&id) else {
            return;
        };
        for (key, value) in old {
            if let Some(ids) = self.index.get_mut(key).and_then(|v| v.get_mut(value)) {
                ids.remove(&id);
            }
        }
    }

    /// Document of one run.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&Document> {
        self.runs.get(&id)
    }

    /// All runs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Document)> {
        self.runs.iter().map(|(id, doc)| (*id, doc))
    }

    /// Every field ever inserted, with its kind.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, FieldKind> {
        &self.fields
    }

    /// Drop every run and field (the header is renewed).
    pub fn clear(&mut self) {
        self.runs.clear();
        self.fields.clear();
        self.index.clear();
        self.header.created_at = Utc::now();
    }

    /// Runs matching `predicate`, in ascending id order.
    #[must_use]
    pub fn search(&self, predicate: &Predicate) -> Vec<(u64, &Document)> {
        match self.candidates(predicate) {
            Some(ids) => {
                tracing::trace!(candidates = ids.len(), %predicate, "index lookup");
                ids.into_iter()
                    .filter_map(|id| self.runs.get(&id).map(|doc| (id, doc)))
                    .filter(|(_, doc)| predicate.matches(doc))
                    .collect()
            }
            None => {
                tracing::trace!(runs = self.runs.len(), %predicate, "full scan");
                self.iter().filter(|(_, doc)| predicate.matches(doc)).collect()
            }
        }
    }

    /// Superset of the matching ids, or `None` when the index cannot help.
    fn candidates(&self, predicate: &Predicate) -> Option<BTreeSet<u64>> {
        match predicate {
            Predicate::Compare {
                key,
                op: CompareOp::Eq,
                value,
            } => self.lookup(key, std::slice::from_ref(value)),
            Predicate::OneOf { key, values } => self.lookup(key, values),
            Predicate::And(left, right) => match (self.candidates(left), self.candidates(right)) {
                (Some(a), Some(b)) => Some(a.intersection(&b).copied().collect()),
                (Some(ids), None) | (None, Some(ids)) => Some(ids),
                (None, None) => None,
            },
            Predicate::Or(left, right) => {
                let mut ids = self.candidates(left)?;
                ids.extend(self.candidates(right)?);
                Some(ids)
            }
            _ => None,
        }
    }

    fn lookup(&self, key: &str, values: &[Value]) -> Option<BTreeSet<u64>> {
        if !is_searchable(key) {
            return None;
        }
        let Some(by_value) = self.index.get(key) else {
            return Some(BTreeSet::new());
        };
        Some(
            values
                .iter()
                .filter_map(|v| by_value.get(v))
                .flatten()
                .copied()
                .collect(),
        )
    }

    /// Persist the store as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = SnapshotFile {
            header: self.header.clone(),
            runs: self
                .runs
                .iter()
                .map(|(id, doc)| {
                    let doc = doc.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                    (*id, doc)
                })
                .collect(),
            fields: self
                .fields
                .iter()
                .map(|(k, kind)| (k.clone(), kind.to_string()))
                .collect(),
        };
        let raw = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, raw).map_err(|e| {
            Error::Storage(format!("Failed to write snapshot {}: {e}", path.display()))
        })
    }

    /// Load a store written by [`DocumentStore::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Storage(format!("Failed to read snapshot {}: {e}", path.display()))
        })?;
        let snapshot: SnapshotFile = serde_json::from_str(&raw).map_err(|e| {
            Error::Storage(format!("Corrupt snapshot {}: {e}", path.display()))
        })?;

        let mut store = Self {
            header: snapshot.header,
            runs: BTreeMap::new(),
            fields: BTreeMap::new(),
            index: FxHashMap::default(),
        };
        for (id, doc) in snapshot.runs {
            let doc = doc.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect();
            store.insert(id, doc);
        }
        // the field table outlives individual runs
        for (key, kind) in snapshot.fields {
            store.fields.insert(key, kind.parse()?);
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn store() -> DocumentStore {
        let mut store = DocumentStore::new("/runs");
        for (id, seed, status) in [(3, 1, "COMPLETE"), (1, 0, "COMPLETE"), (2, 1, "RUNNING")] {
            store.insert(
                id,
                doc(&[
                    ("config.seed", Value::Int(seed)),
                    ("info.status", Value::from(status)),
                    ("train.loss", Value::from(METRIC_MARKER)),
                ]),
            );
        }
        store
    }

    fn ids(hits: &[(u64, &Document)]) -> Vec<u64> {
        hits.iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn test_field_kinds() {
        let store = store();
        assert_eq!(store.fields()["config.seed"], FieldKind::Resolved("int".into()));
        assert_eq!(store.fields()["train.loss"], FieldKind::LazyMetric);
        assert_eq!(FieldKind::LazyArtifact.to_string(), "lazy artifact");
    }

    #[test]
    fn test_indexed_search_in_id_order() {
        let store = store();
        let p = Predicate::compare("info.status", CompareOp::Eq, "COMPLETE");
        assert_eq!(ids(&store.search(&p)), vec![1, 3]);

        let p = Predicate::one_of("config.seed", vec![Value::Float(1.0)]);
        assert_eq!(ids(&store.search(&p)), vec![2, 3]);
    }

    #[test]
    fn test_planner_matches_scan() {
        let store = store();
        let seed = Predicate::compare("config.seed", CompareOp::Eq, 1);
        let status = Predicate::compare("info.status", CompareOp::Eq, "COMPLETE");
        let ge = Predicate::compare("config.seed", CompareOp::Ge, 1);
        for p in [
            seed.clone() & status.clone(),
            seed.clone() | status.clone(),
            !seed.clone(),
            ge & !status,
            Predicate::compare("config.missing", CompareOp::Eq, 1),
        ] {
            let scanned: Vec<u64> = store
                .iter()
                .filter(|(_, d)| p.matches(d))
                .map(|(id, _)| id)
                .collect();
            assert_eq!(ids(&store.search(&p)), scanned, "{p}");
        }
    }

    #[test]
    fn test_replace_reindexes() {
        let mut store = store();
        store.insert(1, doc(&[("config.seed", Value::Int(9))]));
        let p = Predicate::compare("config.seed", CompareOp::Eq, 0);
        assert!(store.search(&p).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        let original = store();
        original.save(&path).unwrap();

        let loaded = DocumentStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.header(), original.header());
        assert_eq!(loaded.fields(), original.fields());
        assert_eq!(loaded.get(2), original.get(2));
    }

    #[test]
    fn test_load_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(DocumentStore::load(&path), Err(Error::Storage(_))));
    }
}

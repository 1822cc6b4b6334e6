//! Record index
//!
//! Scans a parent directory of numbered run directories, flattens each run's
//! metadata into dot-separated keys, registers lazy metric and artifact keys from
//! the producer's key registries, and persists the result as a snapshot.
//!
//! ## Layout read per run
//!
//! ```text
//! <src_dir>/<id>/metadata/config.yaml       → config.*
//! <src_dir>/<id>/metadata/info.yaml         → info.*
//! <src_dir>/<id>/metrics/.keys/<log>.yaml   → <log>.<field> = METRIC
//! <src_dir>/<id>/artifacts/.keys/artifacts.yaml → artifact.<type>.<dir> = ARTIFACT
//! ```
//!
//! Runs missing either metadata file are skipped and reported through
//! [`RecordIndex::skipped`]. Refreshing drops the snapshot and rebuilds it.

mod store;

pub use store::{Document, DocumentStore, FieldKind, SnapshotHeader};

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::query::{is_searchable, Predicate};
use crate::record::{
    parse_artifact_registry, ARTIFACTS_DIR, ARTIFACT_MARKER, ARTIFACT_REGISTRY_FILE, KEYS_DIR,
    METRICS_DIR, METRIC_MARKER,
};
use crate::value::Value;
use crate::Result;

/// Directory holding the eager metadata groups of a run.
pub const METADATA_DIR: &str = "metadata";

/// Metadata groups read for every run (`<group>.yaml`).
pub const METADATA_GROUPS: [&str; 2] = ["config", "info"];

/// Searchable snapshot of a run directory tree.
#[derive(Debug)]
pub struct RecordIndex {
    src_dir: PathBuf,
    snapshot_path: PathBuf,
    store: DocumentStore,
    skipped: Vec<PathBuf>,
}

impl RecordIndex {
    /// Scan `src_dir` and write a fresh snapshot to `snapshot_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source directory cannot be listed, a registry file
    /// is malformed, or the snapshot cannot be written.
    pub fn build(src_dir: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let src_dir = src_dir.into();
        let mut index = Self {
            store: DocumentStore::new(src_dir.clone()),
            src_dir,
            snapshot_path: snapshot_path.into(),
            skipped: Vec::new(),
        };
        index.refresh()?;
        Ok(index)
    }

    /// Load the snapshot at `snapshot_path`, building it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is unreadable or the build fails.
    pub fn open(src_dir: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let src_dir = src_dir.into();
        let snapshot_path = snapshot_path.into();
        if !snapshot_path.exists() {
            return Self::build(src_dir, snapshot_path);
        }
        let store = DocumentStore::load(&snapshot_path)?;
        tracing::info!(
            runs = store.len(),
            snapshot = %snapshot_path.display(),
            "loaded run snapshot"
        );
        Ok(Self {
            src_dir,
            snapshot_path,
            store,
            skipped: Vec::new(),
        })
    }

    /// Drop the snapshot and rebuild it from the source directory.
    ///
    /// # Errors
    ///
    /// Same as [`RecordIndex::build`].
    pub fn refresh(&mut self) -> Result<()> {
        self.store.clear();
        self.skipped.clear();

        for (id, run_dir) in list_runs(&self.src_dir)? {
            match scan_run(&run_dir)? {
                Some(document) => self.store.insert(id, document),
                None => {
                    tracing::warn!(run = %run_dir.display(), "metadata not found, skipping run");
                    self.skipped.push(run_dir);
                }
            }
        }

        self.store.save(&self.snapshot_path)?;
        tracing::info!(
            runs = self.store.len(),
            skipped = self.skipped.len(),
            snapshot = %self.snapshot_path.display(),
            "built run snapshot"
        );
        Ok(())
    }

    /// Run directories skipped by the most recent build.
    #[must_use]
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Scanned source directory.
    #[must_use]
    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    /// Location of the persisted snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Directory of one run.
    #[must_use]
    pub fn run_dir(&self, id: u64) -> PathBuf {
        self.src_dir.join(id.to_string())
    }

    /// Underlying document store.
    #[must_use]
    pub const fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Number of indexed runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if no run is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Runs matching `predicate`, in ascending id order.
    #[must_use]
    pub fn search(&self, predicate: &Predicate) -> Vec<(u64, &Document)> {
        self.store.search(predicate)
    }

    /// Every run, in ascending id order.
    #[must_use]
    pub fn all(&self) -> Vec<(u64, &Document)> {
        self.store.iter().collect()
    }

    /// Every field ever seen with its kind.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, FieldKind> {
        self.store.fields()
    }

    /// Queryable subset of [`RecordIndex::fields`].
    #[must_use]
    pub fn searchable(&self) -> BTreeMap<&str, &FieldKind> {
        self.fields()
            .iter()
            .filter(|(key, _)| is_searchable(key))
            .map(|(key, kind)| (key.as_str(), kind))
            .collect()
    }
}

/// Numeric subdirectories of `src_dir`, sorted by id.
fn list_runs(src_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut runs = Vec::new();
    for entry in fs::read_dir(src_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(id) = name
            .to_str()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        runs.push((id, entry.path()));
    }
    runs.sort_unstable_by_key(|(id, _)| *id);
    Ok(runs)
}

/// Flat document of one run, or `None` if its metadata is missing.
///
/// # Errors
///
/// Returns an error if a metadata or registry file exists but cannot be parsed.
pub fn scan_run(run_dir: &Path) -> Result<Option<Document>> {
    let mut document = Document::new();

    for group in METADATA_GROUPS {
        let path = run_dir.join(METADATA_DIR).join(format!("{group}.yaml"));
        let Some(value) = read_yaml(&path)? else {
            return Ok(None);
        };
        flatten_into(group, value, &mut document);
    }

    let metric_keys = run_dir.join(METRICS_DIR).join(KEYS_DIR);
    if metric_keys.is_dir() {
        let mut registries: Vec<PathBuf> = fs::read_dir(&metric_keys)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        registries.sort();
        for path in registries {
            let Some(log_name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(Value::Map(fields)) = read_yaml(&path)? {
                for field in fields.into_keys() {
                    document.insert(format!("{log_name}.{field}"), Value::from(METRIC_MARKER));
                }
            }
        }
    }

    let artifact_registry = run_dir
        .join(ARTIFACTS_DIR)
        .join(KEYS_DIR)
        .join(ARTIFACT_REGISTRY_FILE);
    if artifact_registry.is_file() {
        let raw = fs::read_to_string(&artifact_registry)?;
        for (artifact_type, dirs) in parse_artifact_registry(&raw)? {
            for dir in dirs.into_keys() {
                document.insert(
                    format!("artifact.{artifact_type}.{dir}"),
                    Value::from(ARTIFACT_MARKER),
                );
            }
        }
    }

    Ok(Some(document))
}

/// Parsed YAML file; `None` if it does not exist. An empty file is an empty map.
fn read_yaml(path: &Path) -> Result<Option<Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let parsed: serde_yaml::Value = serde_yaml::from_str(&raw)?;
    Ok(Some(match Value::from_yaml(parsed) {
        Value::Null => Value::Map(BTreeMap::new()),
        other => other,
    }))
}

/// Flatten nested maps into `prefix.a.b` keys. Lists are kept as values.
pub(crate) fn flatten_into(prefix: &str, value: Value, out: &mut Document) {
    match value {
        Value::Map(map) => {
            for (key, child) in map {
                flatten_into(&format!("{prefix}.{key}"), child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn write_run(src: &Path, id: u64, seed: i64) -> PathBuf {
        let run = src.join(id.to_string());
        write(
            &run.join("metadata/config.yaml"),
            &format!("seed: {seed}\noptimizer:\n  lr: 0.1\n  name: sgd\n"),
        );
        write(&run.join("metadata/info.yaml"), "status: COMPLETE\n");
        write(&run.join("metrics/.keys/train.yaml"), "loss: ''\nepoch: ''\n");
        write(
            &run.join("artifacts/.keys/artifacts.yaml"),
            "text:\n  '':\n    notes.txt: ''\n",
        );
        run
    }

    #[test]
    fn test_scan_run_flattens_and_registers() {
        let src = tempfile::tempdir().unwrap();
        let run = write_run(src.path(), 1, 4);
        let doc = scan_run(&run).unwrap().unwrap();

        assert_eq!(doc["config.seed"], Value::Int(4));
        assert_eq!(doc["config.optimizer.lr"], Value::Float(0.1));
        assert_eq!(doc["info.status"], Value::from("COMPLETE"));
        assert_eq!(doc["train.loss"], Value::from(METRIC_MARKER));
        assert_eq!(doc["artifact.text."], Value::from(ARTIFACT_MARKER));
    }

    #[test]
    fn test_build_skips_incomplete_runs() {
        let src = tempfile::tempdir().unwrap();
        write_run(src.path(), 2, 0);
        write_run(src.path(), 10, 1);
        write(&src.path().join("3/metadata/config.yaml"), "seed: 3\n");
        fs::create_dir_all(src.path().join("notes")).unwrap();

        let index = RecordIndex::build(src.path(), src.path().join("database.json")).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.skipped(), &[src.path().join("3")]);
        let ids: Vec<u64> = index.all().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 10]);
        assert!(src.path().join("database.json").exists());
    }

    #[test]
    fn test_searchable_fields() {
        let src = tempfile::tempdir().unwrap();
        write_run(src.path(), 1, 0);
        let index = RecordIndex::build(src.path(), src.path().join("database.json")).unwrap();

        assert_eq!(index.fields()["train.epoch"], FieldKind::LazyMetric);
        assert_eq!(index.fields()["artifact.text."], FieldKind::LazyArtifact);
        let searchable: Vec<&str> = index.searchable().into_keys().collect();
        assert_eq!(
            searchable,
            vec!["config.optimizer.lr", "config.optimizer.name", "config.seed", "info.status"]
        );
    }

    #[test]
    fn test_open_reuses_snapshot_until_refresh() {
        let src = tempfile::tempdir().unwrap();
        let snapshot = src.path().join("database.json");
        write_run(src.path(), 1, 0);
        RecordIndex::build(src.path(), &snapshot).unwrap();

        write_run(src.path(), 2, 1);
        let mut index = RecordIndex::open(src.path(), &snapshot).unwrap();
        assert_eq!(index.len(), 1);
        index.refresh().unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_metadata_file() {
        let src = tempfile::tempdir().unwrap();
        let run = src.path().join("1");
        write(&run.join("metadata/config.yaml"), "");
        write(&run.join("metadata/info.yaml"), "status: RUNNING\n");
        let doc = scan_run(&run).unwrap().unwrap();
        assert_eq!(doc.len(), 1);
    }
}

//! Lazy loaders for metric logs and artifact groups
//!
//! One loader exists per metric log (or artifact type) per run. The first read of
//! any key parses the whole on-disk group, so sibling keys are served from the
//! cache afterwards. [`MetricLoader::free_unused`] trims the cache to the keys that
//! were actually requested, and drops it entirely if the loader was not touched
//! since the previous call.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::artifact::{Artifact, ArtifactCodec};
use crate::value::Value;
use crate::{Error, Result};

/// Snapshot marker for keys backed by a metric log.
pub const METRIC_MARKER: &str = "METRIC";

/// Snapshot marker for keys backed by an artifact group.
pub const ARTIFACT_MARKER: &str = "ARTIFACT";

pub(crate) const METRICS_DIR: &str = "metrics";
pub(crate) const ARTIFACTS_DIR: &str = "artifacts";
pub(crate) const KEYS_DIR: &str = ".keys";
pub(crate) const ARTIFACT_REGISTRY_FILE: &str = "artifacts.yaml";

/// Loads `<run>/metrics/<log>.json` on demand.
#[derive(Debug)]
pub(crate) struct MetricLoader {
    log_name: String,
    path: PathBuf,
    cache: RefCell<Option<FxHashMap<String, Value>>>,
    used: RefCell<BTreeSet<String>>,
    complete: Cell<bool>,
    touched: Cell<bool>,
    loads: Cell<usize>,
}

impl MetricLoader {
    pub(crate) fn new(run_dir: &Path, log_name: &str) -> Self {
        Self {
            log_name: log_name.to_string(),
            path: run_dir.join(METRICS_DIR).join(format!("{log_name}.json")),
            cache: RefCell::new(None),
            used: RefCell::new(BTreeSet::new()),
            complete: Cell::new(false),
            touched: Cell::new(false),
            loads: Cell::new(0),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Result<Value> {
        self.touched.set(true);
        self.used.borrow_mut().insert(key.to_string());

        let cached = self.cache.borrow().as_ref().map(|c| c.contains_key(key));
        let reload = match cached {
            None => true,
            Some(found) => !found && !self.complete.get(),
        };
        if reload {
            let data = load_metric_log(&self.path, &self.log_name)?;
            self.loads.set(self.loads.get() + 1);
            self.complete.set(true);
            *self.cache.borrow_mut() = Some(data);
        }

        self.cache
            .borrow()
            .as_ref()
            .and_then(|c| c.get(key).cloned())
            .ok_or_else(|| {
                Error::MissingField(format!(
                    "{key} is registered but absent from {}",
                    self.path.display()
                ))
            })
    }

    pub(crate) fn free_unused(&self) {
        let mut cache = self.cache.borrow_mut();
        if cache.is_none() {
            return;
        }
        if !self.touched.get() {
            tracing::debug!(log = %self.log_name, "evicting untouched metric log");
            *cache = None;
            self.complete.set(false);
            return;
        }
        if let Some(data) = cache.as_mut() {
            let used = self.used.borrow();
            let before = data.len();
            data.retain(|key, _| used.contains(key));
            if data.len() < before {
                self.complete.set(false);
            }
        }
        self.touched.set(false);
    }

    /// Number of times the log file has been parsed.
    #[cfg(test)]
    pub(crate) fn loads(&self) -> usize {
        self.loads.get()
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self) -> bool {
        self.cache.borrow().is_some()
    }
}

/// Parse a newline-delimited metric log, accumulating each field into a list.
///
/// Keys are prefixed with the log name (`train.loss`). A missing file yields an
/// empty group.
pub(crate) fn load_metric_log(path: &Path, log_name: &str) -> Result<FxHashMap<String, Value>> {
    let mut columns: FxHashMap<String, Vec<Value>> = FxHashMap::default();
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "metric log not written yet");
            return Ok(FxHashMap::default());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(path = %path.display(), "loading metric log");

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)
            .map_err(|e| {
                Error::Storage(format!(
                    "Malformed metric log {} at line {}: {e}",
                    path.display(),
                    line_no + 1
                ))
            })?;
        for (field, value) in entry {
            columns
                .entry(format!("{log_name}.{field}"))
                .or_default()
                .push(Value::from_json(value));
        }
    }

    Ok(columns
        .into_iter()
        .map(|(k, v)| (k, Value::List(v)))
        .collect())
}

/// Resolves `artifact.<type>.<dir>` keys into maps of item name → [`Artifact`].
pub(crate) struct ArtifactLoader {
    artifact_type: String,
    type_dir: PathBuf,
    registry_path: PathBuf,
    codec: Option<Rc<dyn ArtifactCodec>>,
    cache: RefCell<Option<BTreeMap<String, Value>>>,
    used: RefCell<BTreeSet<String>>,
    touched: Cell<bool>,
}

impl ArtifactLoader {
    pub(crate) fn new(
        run_dir: &Path,
        artifact_type: &str,
        codec: Option<Rc<dyn ArtifactCodec>>,
    ) -> Self {
        let artifacts_dir = run_dir.join(ARTIFACTS_DIR);
        Self {
            artifact_type: artifact_type.to_string(),
            type_dir: artifacts_dir.join(artifact_type),
            registry_path: artifacts_dir.join(KEYS_DIR).join(ARTIFACT_REGISTRY_FILE),
            codec,
            cache: RefCell::new(None),
            used: RefCell::new(BTreeSet::new()),
            touched: Cell::new(false),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Result<Value> {
        let Some(codec) = self.codec.clone() else {
            return Err(Error::InvalidArtifact(format!(
                "No loader registered for artifact type '{}' (field {key})",
                self.artifact_type
            )));
        };
        self.touched.set(true);
        let dir = artifact_dir_of(key, &self.artifact_type);
        self.used.borrow_mut().insert(dir.clone());

        let missing = self
            .cache
            .borrow()
            .as_ref()
            .map_or(true, |c| !c.contains_key(&dir));
        if missing {
            let groups = self.read_registry(&codec)?;
            *self.cache.borrow_mut() = Some(groups);
        }

        self.cache
            .borrow()
            .as_ref()
            .and_then(|c| c.get(&dir).cloned())
            .ok_or_else(|| {
                Error::MissingField(format!(
                    "{key} is not listed in {}",
                    self.registry_path.display()
                ))
            })
    }

    fn read_registry(&self, codec: &Rc<dyn ArtifactCodec>) -> Result<BTreeMap<String, Value>> {
        tracing::debug!(path = %self.registry_path.display(), "loading artifact registry");
        let raw = fs::read_to_string(&self.registry_path).map_err(|e| {
            Error::InvalidArtifact(format!(
                "Cannot read artifact registry {}: {e}",
                self.registry_path.display()
            ))
        })?;
        let registry = parse_artifact_registry(&raw)?;
        let Some(dirs) = registry.get(&self.artifact_type) else {
            return Ok(BTreeMap::new());
        };

        let mut groups = BTreeMap::new();
        for (dir, names) in dirs {
            let mut parent = self.type_dir.clone();
            parent.extend(dir.split('.').filter(|s| !s.is_empty()));
            let items = names
                .iter()
                .map(|name| {
                    let artifact = Artifact::new(
                        name.clone(),
                        self.artifact_type.clone(),
                        parent.join(name),
                        Rc::clone(codec),
                    );
                    (name.clone(), Value::Artifact(artifact))
                })
                .collect();
            groups.insert(dir.clone(), Value::Map(items));
        }
        Ok(groups)
    }

    pub(crate) fn free_unused(&self) {
        let mut cache = self.cache.borrow_mut();
        if !self.touched.get() {
            *cache = None;
            return;
        }
        if let Some(groups) = cache.as_mut() {
            let used = self.used.borrow();
            groups.retain(|dir, _| used.contains(dir));
        }
        self.touched.set(false);
    }
}

impl std::fmt::Debug for ArtifactLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactLoader")
            .field("artifact_type", &self.artifact_type)
            .field("type_dir", &self.type_dir)
            .field("has_codec", &self.codec.is_some())
            .finish_non_exhaustive()
    }
}

/// `artifact.<type>.<dir>` → `<dir>`
fn artifact_dir_of(key: &str, artifact_type: &str) -> String {
    let prefix = format!("artifact.{artifact_type}.");
    key.strip_prefix(&prefix).unwrap_or_default().to_string()
}

/// Parse `artifacts.yaml`: type → directory key → item names.
///
/// Directory keys are normalised by stripping the producer's leading dot, so the
/// type root is `""` and `a/b` is `"a.b"`.
pub(crate) fn parse_artifact_registry(raw: &str) -> Result<BTreeMap<String, BTreeMap<String, Vec<String>>>> {
    let parsed: serde_yaml::Value = serde_yaml::from_str(raw)?;
    let Value::Map(types) = Value::from_yaml(parsed) else {
        return Ok(BTreeMap::new());
    };

    let mut registry = BTreeMap::new();
    for (artifact_type, dirs) in types {
        let mut entries = BTreeMap::new();
        if let Value::Map(dirs) = dirs {
            for (dir, names) in dirs {
                let names = match names {
                    Value::Map(items) => items.into_keys().collect(),
                    Value::List(items) => items.iter().map(ToString::to_string).collect(),
                    _ => Vec::new(),
                };
                entries.insert(dir.trim_start_matches('.').to_string(), names);
            }
        }
        registry.insert(artifact_type, entries);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::artifact::TextCodec;
    use std::io::Write;

    fn write_log(dir: &Path, log: &str, lines: &[&str]) {
        let metrics = dir.join(METRICS_DIR);
        fs::create_dir_all(&metrics).unwrap();
        let mut file = fs::File::create(metrics.join(format!("{log}.json"))).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn test_metric_log_accumulates_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "train",
            &[r#"{"loss": 1.0, "epoch": 0}"#, r#"{"loss": 0.5, "epoch": 1}"#],
        );
        let data = load_metric_log(&dir.path().join("metrics/train.json"), "train").unwrap();
        assert_eq!(data["train.loss"], Value::from(vec![1.0, 0.5]));
        assert_eq!(data["train.epoch"], Value::from(vec![0, 1]));
    }

    #[test]
    fn test_metric_loader_reads_once_for_siblings() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "train", &[r#"{"loss": 1.0, "epoch": 0}"#]);
        let loader = MetricLoader::new(dir.path(), "train");

        loader.get("train.loss").unwrap();
        fs::remove_file(dir.path().join("metrics/train.json")).unwrap();
        assert_eq!(loader.get("train.epoch").unwrap(), Value::from(vec![0]));
        assert_eq!(loader.loads(), 1);
    }

    #[test]
    fn test_free_unused_keeps_requested_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "train", &[r#"{"loss": 1.0, "epoch": 0}"#]);
        let loader = MetricLoader::new(dir.path(), "train");

        loader.get("train.loss").unwrap();
        loader.free_unused();
        assert!(loader.is_cached());
        loader.get("train.loss").unwrap();
        assert_eq!(loader.loads(), 1);

        // evicted sibling forces a reload
        loader.get("train.epoch").unwrap();
        assert_eq!(loader.loads(), 2);
    }

    #[test]
    fn test_free_unused_drops_untouched_loader() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "train", &[r#"{"loss": 1.0}"#]);
        let loader = MetricLoader::new(dir.path(), "train");

        loader.get("train.loss").unwrap();
        loader.free_unused();
        loader.free_unused();
        assert!(!loader.is_cached());
    }

    #[test]
    fn test_registered_but_unwritten_field() {
        let dir = tempfile::tempdir().unwrap();
        let loader = MetricLoader::new(dir.path(), "test");
        assert!(matches!(loader.get("test.loss"), Err(Error::MissingField(_))));
    }

    #[test]
    fn test_malformed_metric_line() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "train", &["{not json"]);
        let loader = MetricLoader::new(dir.path(), "train");
        let err = loader.get("train.loss").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_artifact_registry() {
        let raw = "text:\n  '':\n    notes.txt: ''\n  .ckpt.best:\n    model.txt: ''\n";
        let registry = parse_artifact_registry(raw).unwrap();
        assert_eq!(registry["text"][""], vec!["notes.txt".to_string()]);
        assert_eq!(registry["text"]["ckpt.best"], vec!["model.txt".to_string()]);
    }

    #[test]
    fn test_artifact_loader_without_codec() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ArtifactLoader::new(dir.path(), "pickle", None);
        assert!(matches!(
            loader.get("artifact.pickle."),
            Err(Error::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_artifact_loader_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join(ARTIFACTS_DIR).join(KEYS_DIR);
        fs::create_dir_all(&keys).unwrap();
        fs::write(
            keys.join(ARTIFACT_REGISTRY_FILE),
            "text:\n  .ckpt:\n    last.txt: ''\n",
        )
        .unwrap();
        let codec: Rc<dyn ArtifactCodec> = Rc::new(TextCodec);
        let loader = ArtifactLoader::new(dir.path(), "text", Some(codec));

        let group = loader.get("artifact.text.ckpt").unwrap();
        let artifact = group.as_map().unwrap()["last.txt"].as_artifact().unwrap().clone();
        assert_eq!(
            artifact.path(),
            dir.path().join("artifacts/text/ckpt/last.txt")
        );
    }
}

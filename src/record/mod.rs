//! Lazy per-run records
//!
//! A [`Record`] maps field keys to values. Configuration and run metadata are
//! present eagerly; metric series and artifact groups are represented by pending
//! slots that share one loader per metric log (or artifact type) and are parsed on
//! first read.
//!
//! ```text
//!  config.seed ───────────► Resolved(0)
//!  info.status ───────────► Resolved("COMPLETE")
//!  train.loss  ──┐
//!  train.epoch ──┴────────► MetricLoader(metrics/train.json)
//!  artifact.text.ckpt ────► ArtifactLoader(artifacts/text/...)
//! ```

mod artifact;
mod loader;

pub use artifact::{Artifact, ArtifactCodec, ArtifactRegistry, JsonCodec, TextCodec};
pub use loader::{ARTIFACT_MARKER, METRIC_MARKER};

pub(crate) use loader::{
    parse_artifact_registry, ARTIFACTS_DIR, ARTIFACT_REGISTRY_FILE, KEYS_DIR, METRICS_DIR,
};

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use loader::{ArtifactLoader, MetricLoader};

use crate::query::is_searchable;
use crate::value::Value;
use crate::Result;

/// Marker shown in the lazy view for virtual fields that were never read.
pub const VIRTUAL_MARKER: &str = "VIRTUAL";

/// Computes a virtual field from its key.
pub type VirtualFn = Rc<dyn Fn(&str) -> Result<Value>>;

/// A value passed to [`Record::insert`] or [`Record::update`].
#[derive(Clone)]
pub enum FieldValue {
    /// Plain value
    Value(Value),
    /// Computed on first read, then cached
    Virtual(VirtualFn),
}

impl FieldValue {
    /// Wrap a closure as a virtual field.
    pub fn virtual_field(f: impl Fn(&str) -> Result<Value> + 'static) -> Self {
        Self::Virtual(Rc::new(f))
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

#[derive(Clone)]
enum Slot {
    Resolved(Value),
    Metric(Rc<MetricLoader>),
    Artifact(Rc<ArtifactLoader>),
    Virtual {
        compute: VirtualFn,
        cached: OnceCell<Value>,
    },
}

impl From<FieldValue> for Slot {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Value(v) => Self::Resolved(v),
            FieldValue::Virtual(compute) => Self::Virtual {
                compute,
                cached: OnceCell::new(),
            },
        }
    }
}

/// One run's fields.
///
/// Reads take `&self`; loader caches use interior mutability, so a record is
/// neither `Send` nor `Sync`. Clones share their loaders.
#[derive(Clone, Default)]
pub struct Record {
    id: Option<u64>,
    slots: BTreeMap<String, Slot>,
    metric_loaders: Vec<Rc<MetricLoader>>,
    artifact_loaders: Vec<Rc<ArtifactLoader>>,
}

impl Record {
    /// Record with eager values only and no run id.
    #[must_use]
    pub fn new<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            id: None,
            slots: fields
                .into_iter()
                .map(|(k, v)| (k.into(), Slot::Resolved(v.into())))
                .collect(),
            metric_loaders: Vec::new(),
            artifact_loaders: Vec::new(),
        }
    }

    /// Record produced by a transform of run `id`.
    pub(crate) fn derived(id: Option<u64>, fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            id,
            ..Self::new(fields)
        }
    }

    /// Hydrate a snapshot document.
    ///
    /// Non-searchable keys holding [`METRIC_MARKER`] become pending metric slots
    /// grouped by log name; `artifact.*` keys holding [`ARTIFACT_MARKER`] become
    /// pending artifact slots grouped by type. Everything else is resolved.
    #[must_use]
    pub fn from_document(
        id: u64,
        fields: &BTreeMap<String, Value>,
        run_dir: &Path,
        codecs: &ArtifactRegistry,
    ) -> Self {
        let mut metrics: BTreeMap<&str, Rc<MetricLoader>> = BTreeMap::new();
        let mut artifacts: BTreeMap<&str, Rc<ArtifactLoader>> = BTreeMap::new();
        let mut slots = BTreeMap::new();

        for (key, value) in fields {
            let slot = match (value.as_str(), artifact_type_of(key)) {
                (Some(ARTIFACT_MARKER), Some(artifact_type)) => {
                    let loader = artifacts.entry(artifact_type).or_insert_with(|| {
                        Rc::new(ArtifactLoader::new(
                            run_dir,
                            artifact_type,
                            codecs.get(artifact_type),
                        ))
                    });
                    Slot::Artifact(Rc::clone(loader))
                }
                (Some(METRIC_MARKER), None) if !is_searchable(key) => {
                    let log_name = key.split('.').next().unwrap_or(key);
                    let loader = metrics
                        .entry(log_name)
                        .or_insert_with(|| Rc::new(MetricLoader::new(run_dir, log_name)));
                    Slot::Metric(Rc::clone(loader))
                }
                _ => Slot::Resolved(value.clone()),
            };
            slots.insert(key.clone(), slot);
        }

        Self {
            id: Some(id),
            slots,
            metric_loaders: metrics.into_values().collect(),
            artifact_loaders: artifacts.into_values().collect(),
        }
    }

    /// Run id, if the record comes from the index.
    #[must_use]
    pub const fn id(&self) -> Option<u64> {
        self.id
    }

    /// Read a field, resolving it if it is lazy.
    ///
    /// Returns `Ok(None)` when the record has no such key.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy field fails to load.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(slot) = self.slots.get(key) else {
            return Ok(None);
        };
        let value = match slot {
            Slot::Resolved(value) => value.clone(),
            Slot::Metric(loader) => loader.get(key)?,
            Slot::Artifact(loader) => loader.get(key)?,
            Slot::Virtual { compute, cached } => {
                if let Some(value) = cached.get() {
                    value.clone()
                } else {
                    let value = compute(key)?;
                    cached.get_or_init(|| value).clone()
                }
            }
        };
        Ok(Some(value))
    }

    /// Returns true if the record has `key` (resolved or not).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Every key, including unresolved ones, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the record has no field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns true if reading `key` may touch the disk.
    #[must_use]
    pub fn is_lazy(&self, key: &str) -> bool {
        matches!(
            self.slots.get(key),
            Some(Slot::Metric(_) | Slot::Artifact(_) | Slot::Virtual { .. })
        )
    }

    /// Insert or replace one field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.slots.insert(key.into(), value.into().into());
    }

    /// Merge fields into the record, replacing existing keys.
    pub fn update<K, V>(&mut self, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        for (key, value) in fields {
            self.insert(key, value);
        }
    }

    /// Drop loader caches that were not touched since the previous call.
    ///
    /// Loaders that were touched keep only the fields that were ever requested.
    pub fn free_unused(&self) {
        for loader in &self.metric_loaders {
            loader.free_unused();
        }
        for loader in &self.artifact_loaders {
            loader.free_unused();
        }
    }

    /// Lazy view: pending fields are rendered as their marker, nothing is loaded.
    #[must_use]
    pub fn flattened(&self) -> BTreeMap<String, Value> {
        self.slots
            .iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Resolved(value) => value.clone(),
                    Slot::Metric(_) => Value::from(METRIC_MARKER),
                    Slot::Artifact(_) => Value::from(ARTIFACT_MARKER),
                    Slot::Virtual { cached, .. } => cached
                        .get()
                        .cloned()
                        .unwrap_or_else(|| Value::from(VIRTUAL_MARKER)),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Resolve every field.
    ///
    /// # Errors
    ///
    /// Returns the first load failure.
    pub fn materialize(&self) -> Result<BTreeMap<String, Value>> {
        let mut fields = BTreeMap::new();
        for key in self.slots.keys() {
            if let Some(value) = self.get(key)? {
                fields.insert(key.clone(), value);
            }
        }
        Ok(fields)
    }
}

/// `artifact.<type>.<dir>` → `<type>`
fn artifact_type_of(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("artifact.")?;
    rest.split_once('.').map(|(artifact_type, _)| artifact_type)
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("fields", &self.flattened())
            .finish()
    }
}

impl PartialEq for Record {
    /// Records are equal when their ids and lazy views agree.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.flattened() == other.flattened()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;

    fn lazy_record(dir: &Path) -> Record {
        let metrics = dir.join(METRICS_DIR);
        fs::create_dir_all(&metrics).unwrap();
        fs::write(
            metrics.join("train.json"),
            "{\"loss\": 1.0, \"epoch\": 0}\n{\"loss\": 0.25, \"epoch\": 1}\n",
        )
        .unwrap();

        let fields: BTreeMap<String, Value> = [
            ("config.seed", Value::Int(0)),
            ("info.status", Value::from("COMPLETE")),
            ("train.loss", Value::from(METRIC_MARKER)),
            ("train.epoch", Value::from(METRIC_MARKER)),
            ("config.note", Value::from(METRIC_MARKER)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Record::from_document(7, &fields, dir, &ArtifactRegistry::new())
    }

    #[test]
    fn test_hydration_respects_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let record = lazy_record(dir.path());
        assert_eq!(record.id(), Some(7));
        assert!(record.is_lazy("train.loss"));
        // searchable keys are never sentinels
        assert!(!record.is_lazy("config.note"));
        assert_eq!(
            record.get("config.note").unwrap(),
            Some(Value::from(METRIC_MARKER))
        );
    }

    #[test]
    fn test_lazy_read_resolves_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let record = lazy_record(dir.path());
        assert_eq!(record.flattened()["train.loss"], Value::from(METRIC_MARKER));

        let loss = record.get("train.loss").unwrap().unwrap();
        assert_eq!(loss, Value::from(vec![1.0, 0.25]));
        assert_eq!(record.metric_loaders.len(), 1);
        assert_eq!(record.metric_loaders[0].loads(), 1);
        record.get("train.epoch").unwrap();
        assert_eq!(record.metric_loaders[0].loads(), 1);
    }

    #[test]
    fn test_missing_key_is_none() {
        let record = Record::new([("config.seed", 1)]);
        assert_eq!(record.get("config.lr").unwrap(), None);
        assert!(!record.contains_key("config.lr"));
    }

    #[test]
    fn test_virtual_field_is_computed_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut record = Record::new([("config.seed", 3)]);
        record.insert(
            "info.label",
            FieldValue::virtual_field(move |key| {
                counter.set(counter.get() + 1);
                Ok(Value::from(format!("{key}!")))
            }),
        );

        assert_eq!(record.flattened()["info.label"], Value::from(VIRTUAL_MARKER));
        assert_eq!(record.get("info.label").unwrap(), Some(Value::from("info.label!")));
        record.get("info.label").unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_update_merges() {
        let mut record = Record::new([("config.seed", 1)]);
        record.update([("config.seed", Value::Int(2)), ("config.lr", Value::Int(3))]);
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["config.lr", "config.seed"]);
        assert_eq!(record.get("config.seed").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_materialize_loads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let record = lazy_record(dir.path());
        let fields = record.materialize().unwrap();
        assert_eq!(fields["train.epoch"], Value::from(vec![0, 1]));
        assert_eq!(fields["info.status"], Value::from("COMPLETE"));
    }

    #[test]
    fn test_artifact_type_of() {
        assert_eq!(artifact_type_of("artifact.text."), Some("text"));
        assert_eq!(artifact_type_of("artifact.text.ckpt.best"), Some("text"));
        assert_eq!(artifact_type_of("train.loss"), None);
    }
}

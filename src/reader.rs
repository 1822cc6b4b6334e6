//! Reader facade
//!
//! A [`Reader`] owns the [`RecordIndex`] of one source directory, parses query
//! strings, and hands back matching runs as a [`RecordSet`] of lazy records or as
//! an Arrow table.
//!
//! ```rust,no_run
//! use runlog::{Reader, ResultFormat};
//!
//! # fn main() -> runlog::Result<()> {
//! let reader = Reader::builder("logs/")
//!     .dst_dir("analysis/")
//!     .refresh(true)
//!     .build()?;
//!
//! let runs = reader.filter("info.status == 'COMPLETE' & config.optimizer.lr >= 0.1")?;
//! let table = reader.filter_as("", ResultFormat::Table)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::collection::RecordSet;
use crate::index::{FieldKind, RecordIndex};
use crate::query::{DefaultParser, QueryParser};
use crate::record::{ArtifactCodec, ArtifactRegistry, Record};
use crate::{Error, Result};

/// Default snapshot file stem (`<dst_dir>/database.json`).
pub const DEFAULT_DATABASE_NAME: &str = "database";

fn default_database_name() -> String {
    DEFAULT_DATABASE_NAME.to_string()
}

/// Serializable reader settings.
///
/// ```
/// use runlog::ReaderConfig;
///
/// # fn main() -> runlog::Result<()> {
/// let config = ReaderConfig::from_yaml_str("src_dir: logs\nrefresh: true\n")?;
/// assert_eq!(config.database_name, "database");
/// assert!(config.dst_dir.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    /// Parent directory of the run directories
    pub src_dir: PathBuf,
    /// Where the snapshot is written (defaults to `src_dir`)
    #[serde(default)]
    pub dst_dir: Option<PathBuf>,
    /// Rebuild the snapshot even if one exists
    #[serde(default)]
    pub refresh: bool,
    /// Snapshot file stem
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

impl ReaderConfig {
    /// Default settings for `src_dir`.
    #[must_use]
    pub fn new(src_dir: impl Into<PathBuf>) -> Self {
        Self {
            src_dir: src_dir.into(),
            dst_dir: None,
            refresh: false,
            database_name: default_database_name(),
        }
    }

    /// Parse settings from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Yaml`] for malformed input or unknown keys.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Parse settings from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed input or unknown keys.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Builder seeded with these settings.
    #[must_use]
    pub fn into_builder(self) -> ReaderBuilder {
        ReaderBuilder::from_config(self)
    }
}

/// Shape of a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultFormat {
    /// [`RecordSet`] of lazy records
    #[default]
    Records,
    /// Arrow [`RecordBatch`] with every field loaded
    Table,
}

impl ResultFormat {
    /// Accepted format strings.
    pub const VALID: [&'static str; 2] = ["records", "table"];
}

impl FromStr for ResultFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "records" => Ok(Self::Records),
            "table" => Ok(Self::Table),
            other => Err(Error::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Records => f.write_str("records"),
            Self::Table => f.write_str("table"),
        }
    }
}

/// Output of [`Reader::filter_as`].
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Lazy records
    Records(RecordSet),
    /// Flattened, fully loaded table
    Table(RecordBatch),
}

impl QueryResult {
    /// The records, if this is a records result.
    #[must_use]
    pub fn into_records(self) -> Option<RecordSet> {
        match self {
            Self::Records(records) => Some(records),
            Self::Table(_) => None,
        }
    }

    /// The table, if this is a table result.
    #[must_use]
    pub fn into_table(self) -> Option<RecordBatch> {
        match self {
            Self::Table(table) => Some(table),
            Self::Records(_) => None,
        }
    }
}

/// Builder for [`Reader`].
pub struct ReaderBuilder {
    config: ReaderConfig,
    parser: Box<dyn QueryParser>,
    codecs: ArtifactRegistry,
}

impl ReaderBuilder {
    fn from_config(config: ReaderConfig) -> Self {
        Self {
            config,
            parser: Box::new(DefaultParser::new()),
            codecs: ArtifactRegistry::new(),
        }
    }

    /// Write the snapshot under `dst_dir` instead of the source directory.
    #[must_use]
    pub fn dst_dir(mut self, dst_dir: impl Into<PathBuf>) -> Self {
        self.config.dst_dir = Some(dst_dir.into());
        self
    }

    /// Rebuild the snapshot even if one exists.
    #[must_use]
    pub const fn refresh(mut self, refresh: bool) -> Self {
        self.config.refresh = refresh;
        self
    }

    /// Snapshot file stem.
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.config.database_name = name.into();
        self
    }

    /// Replace the query parser.
    #[must_use]
    pub fn parser(mut self, parser: impl QueryParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Register (or replace) the codec used to load artifacts of `artifact_type`.
    #[must_use]
    pub fn artifact_codec(
        mut self,
        artifact_type: impl Into<String>,
        codec: impl ArtifactCodec + 'static,
    ) -> Self {
        self.codecs.register(artifact_type, codec);
        self
    }

    /// Open (or build) the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if the destination directory cannot be
    /// created or written, and any scan or snapshot error.
    pub fn build(self) -> Result<Reader> {
        let Self {
            config,
            parser,
            codecs,
        } = self;
        let src_dir = fs::canonicalize(&config.src_dir).unwrap_or(config.src_dir);
        let dst_dir = config.dst_dir.unwrap_or_else(|| src_dir.clone());
        ensure_writable(&dst_dir)?;

        let snapshot = dst_dir.join(format!("{}.json", config.database_name));
        let index = if config.refresh {
            RecordIndex::build(src_dir.clone(), snapshot)?
        } else {
            RecordIndex::open(src_dir.clone(), snapshot)?
        };

        Ok(Reader {
            src_dir,
            dst_dir,
            parser,
            codecs,
            index,
        })
    }
}

impl fmt::Debug for ReaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderBuilder")
            .field("config", &self.config)
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}

fn ensure_writable(dst_dir: &Path) -> Result<()> {
    let denied = |e: &std::io::Error| e.kind() == ErrorKind::PermissionDenied;
    if let Err(e) = fs::create_dir_all(dst_dir) {
        return Err(if denied(&e) || dst_dir.is_file() {
            Error::Permission {
                path: dst_dir.to_path_buf(),
            }
        } else {
            e.into()
        });
    }
    let probe = dst_dir.join(".runlog-write-check");
    match fs::write(&probe, b"") {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&probe) {
                tracing::warn!(path = %probe.display(), error = %e, "Could not remove write check file");
            }
            Ok(())
        }
        Err(e) if denied(&e) => Err(Error::Permission {
            path: dst_dir.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Query facade over a run directory.
pub struct Reader {
    src_dir: PathBuf,
    dst_dir: PathBuf,
    parser: Box<dyn QueryParser>,
    codecs: ArtifactRegistry,
    index: RecordIndex,
}

impl Reader {
    /// Reader with default settings for `src_dir`.
    ///
    /// # Errors
    ///
    /// Same as [`ReaderBuilder::build`].
    pub fn open(src_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(src_dir).build()
    }

    /// Builder with default settings for `src_dir`.
    #[must_use]
    pub fn builder(src_dir: impl Into<PathBuf>) -> ReaderBuilder {
        ReaderBuilder::from_config(ReaderConfig::new(src_dir))
    }

    /// Runs matching `query`, in ascending id order. An empty query matches all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] or [`Error::InvalidKey`] for a bad query.
    pub fn filter(&self, query: &str) -> Result<RecordSet> {
        let hits = if query.trim().is_empty() {
            self.index.all()
        } else {
            let predicate = self.parser.parse(query)?;
            self.index.search(&predicate)
        };
        tracing::debug!(query, matches = hits.len(), "filtered runs");
        Ok(hits
            .into_iter()
            .map(|(id, doc)| Record::from_document(id, doc, &self.index.run_dir(id), &self.codecs))
            .collect())
    }

    /// [`Reader::filter`] with an explicit result format.
    ///
    /// The table format loads every lazy field.
    ///
    /// # Errors
    ///
    /// Query errors, plus load errors for the table format.
    pub fn filter_as(&self, query: &str, format: ResultFormat) -> Result<QueryResult> {
        let records = self.filter(query)?;
        match format {
            ResultFormat::Records => Ok(QueryResult::Records(records)),
            ResultFormat::Table => Ok(QueryResult::Table(records.to_record_batch(false)?)),
        }
    }

    /// Every field ever seen with its kind.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldKind> {
        self.index.fields()
    }

    /// Queryable (`config.` / `info.`) subset of [`Reader::fields`].
    #[must_use]
    pub fn searchable(&self) -> BTreeMap<&str, &FieldKind> {
        self.index.searchable()
    }

    /// Rebuild the snapshot from the source directory.
    ///
    /// # Errors
    ///
    /// Any scan or snapshot error.
    pub fn refresh(&mut self) -> Result<()> {
        self.index.refresh()
    }

    /// Number of indexed runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if no run is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Source directory.
    #[must_use]
    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    /// Directory holding the snapshot.
    #[must_use]
    pub fn dst_dir(&self) -> &Path {
        &self.dst_dir
    }

    /// Snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        self.index.snapshot_path()
    }

    /// Run directories skipped by the most recent build (empty when the snapshot
    /// was loaded from disk).
    #[must_use]
    pub fn skipped(&self) -> &[PathBuf] {
        self.index.skipped()
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("src_dir", &self.src_dir)
            .field("dst_dir", &self.dst_dir)
            .field("runs", &self.index.len())
            .finish_non_exhaustive()
    }
}

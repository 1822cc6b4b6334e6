//! # runlog: Lazy Query and Analysis over Experiment Runs
//!
//! **Version**: 0.1.0
//!
//! runlog indexes a directory of recorded experiment runs (one numbered
//! subdirectory per run holding YAML metadata, JSON-lines metric logs and
//! registered artifacts) and lets you select, group and summarise those runs
//! without loading their metrics up front.
//!
//! ## Design Principles
//!
//! - **Lazy by default**: metric series and artifacts are read on first access
//!   and released again with [`Record::free_unused`]
//! - **Searchable namespaces only**: queries address `config.*` and `info.*`
//!   keys, which are served from an equality index in the snapshot
//! - **Fail loudly**: shape mismatches in maps, unknown keys and malformed
//!   queries are errors, never silent coercions
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use runlog::collection::aggregations;
//! use runlog::Reader;
//!
//! let reader = Reader::open("logs/")?;
//! let runs = reader.filter("info.status == 'COMPLETE'")?;
//!
//! let summary = runs
//!     .groupby(&["config.optimizer.lr"])?
//!     .aggregate(&[aggregations::avg_std("train.loss")])?;
//! println!("{summary}");
//! # Ok::<(), runlog::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod collection;
pub mod error;
pub mod index;
pub mod query;
pub mod reader;
pub mod record;
pub mod table;
pub mod value;

pub use collection::{Group, GroupKey, GroupedRecords, Map, MapFn, MapMode, RecordSet};
pub use error::{Error, Result};
pub use query::{CompareOp, DefaultParser, Predicate, QueryParser};
pub use reader::{QueryResult, Reader, ReaderBuilder, ReaderConfig, ResultFormat};
pub use record::{Artifact, ArtifactCodec, ArtifactRegistry, FieldValue, Record};
pub use value::Value;

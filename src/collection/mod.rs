//! Record collections
//!
//! A [`RecordSet`] is an ordered list of [`Record`]s viewed as a table whose
//! columns are the union of the records' keys. Every operation returns a new
//! collection (or grouped collection) and leaves the receiver untouched.
//!
//! ```text
//! RecordSet ──groupby──► GroupedRecords ──ungroup──► RecordSet
//!     │                        │
//!     ├─ filter / sort         ├─ filter(bygroups) / sort / select
//!     └─ map / transform /     └─ map / transform / aggregate / apply
//!        aggregate / apply
//! ```

pub mod aggregations;
mod grouped;
mod map;

pub use grouped::{Group, GroupKey, GroupedRecords};
pub use map::{Map, MapFn, MapMode};

use std::collections::BTreeMap;
use std::fmt;

use arrow::record_batch::RecordBatch;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::record::Record;
use crate::value::Value;
use crate::{Error, Result};
use map::Shape;

/// Ordered collection of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    /// Collection over `records`, in the given order.
    #[must_use]
    pub const fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the collection has no row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Row at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Rows in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Rows as a slice.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Union of all rows' keys, in first-seen order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();
        for record in &self.records {
            for key in record.keys() {
                if seen.insert(key) {
                    keys.push(key.to_string());
                }
            }
        }
        keys
    }

    /// Columns that keys are validated against, or `None` when there is no row
    /// to validate against.
    fn known_keys(&self) -> Option<Vec<String>> {
        (!self.is_empty()).then(|| self.keys())
    }

    fn check_keys<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let Some(columns) = self.known_keys() else {
            return Ok(());
        };
        for key in keys {
            let key = key.as_ref();
            if !columns.iter().any(|c| c == key) {
                return Err(Error::InvalidKey(format!(
                    "The provided key {key} is invalid! Valid keys are: {columns:?}"
                )));
            }
        }
        Ok(())
    }

    /// Resolved values of one column; rows without the key yield `Null`.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy field fails to load.
    pub fn column(&self, key: &str) -> Result<Vec<Value>> {
        self.records
            .iter()
            .map(|record| {
                let value = record.get(key)?.unwrap_or_default();
                record.free_unused();
                Ok(value)
            })
            .collect()
    }

    /// Columns starting with `start_key` whose values are not all the same.
    ///
    /// A column counts as varying when a row disagrees with the first row, or when
    /// it is present in a later row but absent from the first. Values are compared
    /// in the lazy view, so nothing is loaded.
    #[must_use]
    pub fn diff(&self, start_key: &str) -> Vec<String> {
        let mut rows = self.records.iter().map(Record::flattened);
        let Some(reference) = rows.next() else {
            return Vec::new();
        };
        let mut varying: Vec<String> = Vec::new();
        for row in rows {
            for (key, value) in &row {
                if !key.starts_with(start_key) || varying.contains(key) {
                    continue;
                }
                if reference.get(key) != Some(value) {
                    varying.push(key.clone());
                }
            }
        }
        varying
    }

    /// Partition rows by their values at `keys`.
    ///
    /// Values are compared raw: `1` and `"1"` land in different groups. Groups keep
    /// the order in which their key first appears. Every row must hold every
    /// grouping key; an explicit `Null` is a value like any other. An empty
    /// collection yields no group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if a key is not a column or a row lacks it.
    pub fn groupby<S: AsRef<str>>(&self, keys: &[S]) -> Result<GroupedRecords> {
        self.check_keys(keys)?;
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();

        let mut order: Vec<GroupKey> = Vec::new();
        let mut members: FxHashMap<GroupKey, Vec<Record>> = FxHashMap::default();
        for (position, record) in self.records.iter().enumerate() {
            let tuple = keys
                .iter()
                .map(|k| {
                    record.get(k)?.ok_or_else(|| {
                        Error::InvalidKey(format!(
                            "Row {position}{} has no value for the grouping key {k}",
                            record.id().map_or_else(String::new, |id| format!(" (run {id})"))
                        ))
                    })
                })
                .collect::<Result<GroupKey>>()?;
            record.free_unused();
            members
                .entry(tuple.clone())
                .or_insert_with(|| {
                    order.push(tuple);
                    Vec::new()
                })
                .push(record.clone());
        }

        let groups = order
            .into_iter()
            .map(|tuple| {
                let records = members.remove(&tuple).unwrap_or_default();
                (tuple, Group::Records(Self::new(records)))
            })
            .collect();
        Ok(GroupedRecords::new(keys, groups))
    }

    /// Stable sort by the tuple of values at `by`.
    ///
    /// Ties keep their relative order in both directions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if a key is not a column, or a load error.
    pub fn sort<S: AsRef<str>>(&self, by: &[S], ascending: bool) -> Result<Self> {
        self.check_keys(by)?;
        let mut keyed = self
            .records
            .iter()
            .map(|record| {
                let tuple = by
                    .iter()
                    .map(|k| Ok(record.get(k.as_ref())?.unwrap_or_default()))
                    .collect::<Result<Vec<Value>>>()?;
                record.free_unused();
                Ok((tuple, record))
            })
            .collect::<Result<Vec<_>>>()?;

        if ascending {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        } else {
            keyed.sort_by(|a, b| b.0.cmp(&a.0));
        }
        Ok(Self::new(keyed.into_iter().map(|(_, r)| r.clone()).collect()))
    }

    /// Keep the rows for which `filter` yields a truthy value.
    ///
    /// `filter` is applied in generic mode and must produce a single column with
    /// one value per row. Surviving rows are returned unchanged, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMap`] if the map declares several outputs or changes
    /// the number of rows.
    pub fn filter(&self, filter: &Map) -> Result<Self> {
        let maps = std::slice::from_ref(filter);
        let plans = map::prepare(maps, MapMode::Generic, self.known_keys().as_deref())?;
        if plans[0].outputs().len() != 1 {
            return Err(Error::InvalidMap(format!(
                "Invalid filter map '{}': should have a single boolean output",
                filter.name()
            )));
        }
        if self.is_empty() {
            return Ok(Self::default());
        }
        let outputs = map::apply_generic(&self.records, &plans)?;
        let mask = match outputs.into_iter().next() {
            Some((_, Value::List(mask))) if mask.len() == self.len() => mask,
            _ => {
                return Err(Error::InvalidMap(format!(
                    "Invalid filter map '{}': should keep the same size as the collection ({} rows)",
                    filter.name(),
                    self.len()
                )))
            }
        };
        Ok(self
            .records
            .iter()
            .zip(mask)
            .filter(|(_, keep)| keep.is_truthy())
            .map(|(record, _)| record.clone())
            .collect())
    }

    /// Filter each group of `bygroups` separately, then merge the groups back.
    ///
    /// Equivalent to `groupby(bygroups)?.filter(filter, None)?.ungroup()`.
    ///
    /// # Errors
    ///
    /// Same as [`RecordSet::groupby`] and [`RecordSet::filter`].
    pub fn filter_by_groups<S: AsRef<str>>(&self, filter: &Map, bygroups: &[S]) -> Result<Self> {
        Ok(self
            .groupby(bygroups)?
            .filter(filter, None::<&[&str]>)?
            .ungroup())
    }

    /// Reduce each column with `maps` into a single-row collection.
    ///
    /// An empty collection still yields one row, holding what the maps return
    /// for empty columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] for unknown input keys and
    /// [`Error::InvalidMap`] for output arity mismatches.
    pub fn aggregate(&self, maps: &[Map]) -> Result<Self> {
        let plans = map::prepare(maps, MapMode::Columnwise, self.known_keys().as_deref())?;
        let outputs = map::apply_columnwise(&self.records, &plans)?;
        Ok(Self::new(vec![Record::derived(None, outputs)]))
    }

    /// Columnwise rewrite that must keep one value per row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMap`] if a map reduces the column.
    pub fn transform(&self, maps: &[Map]) -> Result<Self> {
        let plans = map::prepare(maps, MapMode::Columnwise, self.known_keys().as_deref())?;
        if self.is_empty() {
            return Ok(Self::default());
        }
        let outputs = map::apply_columnwise(&self.records, &plans)?;
        match map::shape(outputs, self.len())? {
            Shape::Rows(rows) => Ok(self.rows_from(rows)),
            Shape::Reduced(_) => Err(Error::InvalidMap(format!(
                "transform must keep {} rows, use aggregate to reduce columns",
                self.len()
            ))),
        }
    }

    /// Pointwise application: each cell of each input column, independently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMap`] if a call does not return exactly one value.
    pub fn map(&self, maps: &[Map]) -> Result<Self> {
        self.apply(maps, MapMode::Pointwise)
    }

    /// Apply `maps` in an explicit mode.
    ///
    /// Columnwise and generic results are non-reducing (one row per input row)
    /// when every output is a list as long as the collection, and reducing (one
    /// row) when none is; mixing both in one call is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] for unknown input keys and
    /// [`Error::InvalidMap`] for any shape contradiction.
    pub fn apply(&self, maps: &[Map], mode: MapMode) -> Result<Self> {
        let plans = map::prepare(maps, mode, self.known_keys().as_deref())?;
        match mode {
            MapMode::Pointwise => Ok(Self::new(map::apply_pointwise(&self.records, &plans)?)),
            MapMode::Rowwise => Ok(Self::new(map::apply_rowwise(&self.records, &plans)?)),
            MapMode::Columnwise | MapMode::Generic => {
                let outputs = if mode == MapMode::Columnwise {
                    map::apply_columnwise(&self.records, &plans)?
                } else {
                    map::apply_generic(&self.records, &plans)?
                };
                Ok(match map::shape(outputs, self.len())? {
                    Shape::Rows(rows) => self.rows_from(rows),
                    Shape::Reduced(fields) => Self::new(vec![Record::derived(None, fields)]),
                })
            }
        }
    }

    fn rows_from(&self, rows: Vec<Vec<(String, Value)>>) -> Self {
        self.records
            .iter()
            .zip(rows)
            .map(|(source, fields)| Record::derived(source.id(), fields))
            .collect()
    }

    /// Lazy view of every row (pending fields shown as markers).
    #[must_use]
    pub fn flattened(&self) -> Vec<BTreeMap<String, Value>> {
        self.records.iter().map(Record::flattened).collect()
    }

    /// Arrow view of the collection.
    ///
    /// With `lazy` set, pending fields appear as their markers; otherwise every
    /// field is loaded.
    ///
    /// # Errors
    ///
    /// Returns a load error or an Arrow error.
    pub fn to_record_batch(&self, lazy: bool) -> Result<RecordBatch> {
        crate::table::to_record_batch(self, lazy)
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Render rows as a plain-text table (lazy view).
pub(crate) fn write_table(
    f: &mut fmt::Formatter<'_>,
    columns: &[String],
    rows: &[BTreeMap<String, Value>],
    indent: &str,
) -> fmt::Result {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map_or_else(|| "-".to_string(), ToString::to_string))
                .collect()
        })
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |f: &mut fmt::Formatter<'_>, items: &[String]| -> fmt::Result {
        write!(f, "{indent}")?;
        for (i, (item, width)) in items.iter().zip(&widths).enumerate() {
            if i > 0 {
                write!(f, "  ")?;
            }
            let width = *width;
            write!(f, "{item:<width$}")?;
        }
        writeln!(f)
    };
    line(f, columns)?;
    for row in &cells {
        line(f, row)?;
    }
    Ok(())
}

impl fmt::Display for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_table(f, &self.keys(), &self.flattened(), "")?;
        write!(f, "[{} rows]", self.len())
    }
}

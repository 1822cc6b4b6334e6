//! Grouped collections
//!
//! Produced by [`RecordSet::groupby`]. Each group is addressed by the tuple of
//! values its rows hold at the grouping keys, and every operation is applied to
//! each group independently. [`GroupedRecords::ungroup`] writes the key columns
//! back onto every row and concatenates the groups.

use std::fmt;

use rustc_hash::FxHashMap;

use super::{write_table, Map, MapMode, RecordSet};
use crate::value::Value;
use crate::Result;

/// Values of the grouping keys for one group, in key order.
pub type GroupKey = Vec<Value>;

/// Contents of one group.
#[derive(Debug, Clone, PartialEq)]
pub enum Group {
    /// Rows of the group
    Records(RecordSet),
    /// Sub-groups from a nested `groupby`
    Nested(GroupedRecords),
}

impl Group {
    fn ungroup(self) -> RecordSet {
        match self {
            Self::Records(records) => records,
            Self::Nested(nested) => nested.ungroup(),
        }
    }

    /// Flat rows, ungrouping nested levels.
    #[must_use]
    pub fn to_records(&self) -> RecordSet {
        self.clone().ungroup()
    }
}

/// Mapping from group key to group, in first-appearance order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRecords {
    keys: Vec<String>,
    groups: Vec<(GroupKey, Group)>,
}

impl GroupedRecords {
    pub(crate) fn new(keys: Vec<String>, groups: Vec<(GroupKey, Group)>) -> Self {
        Self { keys, groups }
    }

    /// Grouping column names.
    #[must_use]
    pub fn group_keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if there is no group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Key tuples, in group order.
    #[must_use]
    pub fn keys(&self) -> Vec<&GroupKey> {
        self.groups.iter().map(|(key, _)| key).collect()
    }

    /// Group with the given key tuple.
    #[must_use]
    pub fn get(&self, key: &[Value]) -> Option<&Group> {
        self.groups
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, group)| group)
    }

    /// Groups in order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &Group)> {
        self.groups.iter().map(|(key, group)| (key, group))
    }

    fn try_map_groups(&self, op: &dyn Fn(&RecordSet) -> Result<Group>) -> Result<Self> {
        let groups = self
            .groups
            .iter()
            .map(|(key, group)| {
                let result = match group {
                    Group::Records(records) => op(records)?,
                    Group::Nested(nested) => Group::Nested(nested.try_map_groups(op)?),
                };
                Ok((key.clone(), result))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(self.keys.clone(), groups))
    }

    /// [`RecordSet::apply`] on every group.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn apply(&self, maps: &[Map], mode: MapMode) -> Result<Self> {
        self.try_map_groups(&|records| Ok(Group::Records(records.apply(maps, mode)?)))
    }

    /// [`RecordSet::aggregate`] on every group: one row per group.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn aggregate(&self, maps: &[Map]) -> Result<Self> {
        self.try_map_groups(&|records| Ok(Group::Records(records.aggregate(maps)?)))
    }

    /// [`RecordSet::transform`] on every group.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn transform(&self, maps: &[Map]) -> Result<Self> {
        self.try_map_groups(&|records| Ok(Group::Records(records.transform(maps)?)))
    }

    /// [`RecordSet::map`] on every group.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn map(&self, maps: &[Map]) -> Result<Self> {
        self.try_map_groups(&|records| Ok(Group::Records(records.map(maps)?)))
    }

    /// [`RecordSet::sort`] inside every group.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn sort<S: AsRef<str>>(&self, by: &[S], ascending: bool) -> Result<Self> {
        self.try_map_groups(&|records| Ok(Group::Records(records.sort(by, ascending)?)))
    }

    /// Group every group again by `keys`.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn groupby<S: AsRef<str>>(&self, keys: &[S]) -> Result<Self> {
        self.try_map_groups(&|records| Ok(Group::Nested(records.groupby(keys)?)))
    }

    /// Filter every group. Groups left without rows are dropped.
    ///
    /// With `bygroups`, rows are regrouped by those keys for filtering and every
    /// level of the current grouping is restored afterwards. For a single level
    /// this is exactly
    /// `ungroup().groupby(bygroups).filter(f).ungroup().groupby(current keys)`.
    ///
    /// # Errors
    ///
    /// Returns the first group's error.
    pub fn filter<S: AsRef<str>>(&self, filter: &Map, bygroups: Option<&[S]>) -> Result<Self> {
        let Some(by) = bygroups else {
            return self.filter_groups(filter);
        };
        let levels = self.levels();
        let kept = self
            .clone()
            .ungroup()
            .groupby(by)?
            .filter_groups(filter)?
            .ungroup();
        let mut regrouped = kept.groupby(&levels[0])?;
        for inner in &levels[1..] {
            regrouped = regrouped.groupby(inner)?;
        }
        Ok(regrouped)
    }

    fn filter_groups(&self, filter: &Map) -> Result<Self> {
        let mut groups = Vec::with_capacity(self.groups.len());
        for (key, group) in &self.groups {
            let result = match group {
                Group::Records(records) => Group::Records(records.filter(filter)?),
                Group::Nested(nested) => Group::Nested(nested.filter_groups(filter)?),
            };
            let emptied = match &result {
                Group::Records(records) => records.is_empty(),
                Group::Nested(nested) => nested.is_empty(),
            };
            if !emptied {
                groups.push((key.clone(), result));
            }
        }
        Ok(Self::new(self.keys.clone(), groups))
    }

    /// Grouping keys of every nesting level, outermost first.
    fn levels(&self) -> Vec<Vec<String>> {
        let mut levels = vec![self.keys.clone()];
        let mut current = self;
        while let Some((_, Group::Nested(nested))) = current.groups.first() {
            levels.push(nested.keys.clone());
            current = nested;
        }
        levels
    }

    /// Groups whose key is in `key_list`; unknown keys are ignored.
    #[must_use]
    pub fn select(&self, key_list: &[GroupKey]) -> Self {
        let groups = self
            .groups
            .iter()
            .filter(|(key, _)| key_list.contains(key))
            .cloned()
            .collect();
        Self::new(self.keys.clone(), groups)
    }

    /// Concatenate the groups, writing the key columns back onto every row.
    ///
    /// Nested levels are flattened first, so inner key columns are written before
    /// the outer ones.
    #[must_use]
    pub fn ungroup(self) -> RecordSet {
        let Self { keys, groups } = self;
        groups
            .into_iter()
            .flat_map(|(tuple, group)| {
                let columns: Vec<(String, Value)> = keys.iter().cloned().zip(tuple).collect();
                group.ungroup().into_iter().map(move |mut record| {
                    record.update(columns.iter().cloned());
                    record
                })
            })
            .collect()
    }

    /// Map from key tuple to group size (rows, nested levels flattened).
    #[must_use]
    pub fn sizes(&self) -> FxHashMap<GroupKey, usize> {
        self.groups
            .iter()
            .map(|(key, group)| {
                let size = match group {
                    Group::Records(records) => records.len(),
                    Group::Nested(nested) => nested.sizes().values().sum(),
                };
                (key.clone(), size)
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a GroupedRecords {
    type Item = (&'a GroupKey, &'a Group);
    type IntoIter = Box<dyn Iterator<Item = (&'a GroupKey, &'a Group)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

fn describe_key(keys: &[String], tuple: &[Value]) -> String {
    keys.iter()
        .zip(tuple)
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl GroupedRecords {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: &str) -> fmt::Result {
        for (tuple, group) in &self.groups {
            writeln!(f, "{indent}({})", describe_key(&self.keys, tuple))?;
            let inner = format!("{indent}    ");
            match group {
                Group::Records(records) => {
                    write_table(f, &records.keys(), &records.flattened(), &inner)?;
                }
                Group::Nested(nested) => nested.fmt_indented(f, &inner)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for GroupedRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, "")?;
        write!(f, "[{} groups]", self.len())
    }
}

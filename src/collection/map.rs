//! Transform units and the four application modes
//!
//! A [`Map`] pairs a function with the input columns it reads and, optionally,
//! the output columns it writes. The [`MapMode`] decides what the function
//! receives:
//!
//! | Mode         | Called               | Receives                          | Returns per call            |
//! |--------------|----------------------|-----------------------------------|-----------------------------|
//! | `Pointwise`  | per row × input key  | `[cell]`                          | 1 value                     |
//! | `Columnwise` | per input key        | `[List(column)]`                  | outputs / inputs values     |
//! | `Rowwise`    | per row              | the row's input cells             | one value per output        |
//! | `Generic`    | once                 | one `List(column)` per input key  | one value per output        |
//!
//! Columnwise and generic outputs are *non-reducing* when every output is a list
//! as long as the collection, and *reducing* otherwise.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::record::Record;
use crate::value::Value;
use crate::{Error, Result};

/// Function wrapped by a [`Map`].
pub type MapFn = Rc<dyn Fn(&[Value]) -> Result<Vec<Value>>>;

/// How a [`Map`] is applied to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    /// Cell → cell
    Pointwise,
    /// Whole column → list (non-reducing) or scalar (reducing)
    Columnwise,
    /// Row's input cells → row's outputs
    Rowwise,
    /// Every input column at once → lists or scalars
    Generic,
}

impl MapMode {
    const fn name(self) -> &'static str {
        match self {
            Self::Pointwise => "pointwise",
            Self::Columnwise => "columnwise",
            Self::Rowwise => "rowwise",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for MapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MapMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pointwise" => Ok(Self::Pointwise),
            "columnwise" => Ok(Self::Columnwise),
            "rowwise" => Ok(Self::Rowwise),
            "generic" => Ok(Self::Generic),
            _ => Err(Error::InvalidMap(format!(
                "Unknown map mode '{s}'. Valid modes are: pointwise, columnwise, rowwise, generic"
            ))),
        }
    }
}

/// A named function over one or more input columns.
///
/// # Example
///
/// ```
/// use runlog::{Map, Record, RecordSet, Value};
///
/// # fn main() -> runlog::Result<()> {
/// let runs: RecordSet = (0..3).map(|i| Record::new([("config.lr", i)])).collect();
/// let doubled = runs.map(&[Map::unary("double", ["config.lr"], |v| {
///     Ok(Value::from(v.as_f64().unwrap_or_default() * 2.0))
/// })])?;
/// assert_eq!(doubled.keys(), vec!["fdouble.config.lr"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Map {
    name: String,
    inputs: Vec<String>,
    outputs: Option<Vec<String>>,
    func: MapFn,
}

impl Map {
    /// Wrap a function receiving the mode-specific argument slice.
    pub fn new<I, S>(
        name: impl Into<String>,
        inputs: I,
        func: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: None,
            func: Rc::new(func),
        }
    }

    /// Wrap a single-argument, single-result function.
    ///
    /// Fits the pointwise and columnwise modes, where every call receives exactly
    /// one value (a cell or a whole column).
    pub fn unary<I, S>(
        name: impl Into<String>,
        inputs: I,
        func: impl Fn(&Value) -> Result<Value> + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, inputs, move |args| {
            let arg = args.first().unwrap_or(&Value::Null);
            Ok(vec![func(arg)?])
        })
    }

    /// Name the output columns explicitly.
    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(outputs.into_iter().map(Into::into).collect());
        self
    }

    /// Function name (used to derive output names).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input column keys.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Explicit output column keys, if any.
    #[must_use]
    pub fn outputs(&self) -> Option<&[String]> {
        self.outputs.as_deref()
    }

    /// Output keys under `mode`, derived from the name and inputs when not given.
    ///
    /// Pointwise and columnwise maps get `f<name>.<input>` per input; rowwise and
    /// generic maps get a single `f<name>.<inputs joined by '_'>`.
    #[must_use]
    pub fn output_keys(&self, mode: MapMode) -> Vec<String> {
        if let Some(outputs) = &self.outputs {
            return outputs.clone();
        }
        match mode {
            MapMode::Pointwise | MapMode::Columnwise => self
                .inputs
                .iter()
                .map(|key| format!("f{}.{key}", self.name))
                .collect(),
            MapMode::Rowwise | MapMode::Generic => {
                vec![format!("f{}.{}", self.name, self.inputs.join("_"))]
            }
        }
    }

    /// Call the wrapped function.
    ///
    /// # Errors
    ///
    /// Propagates the function's error.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        (self.func)(args)
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// A map whose output keys were resolved and checked against a mode.
pub(crate) struct Plan<'a> {
    map: &'a Map,
    outputs: Vec<String>,
}

impl Plan<'_> {
    pub(crate) fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

/// Result of a columnwise or generic application.
pub(crate) enum Shape {
    /// One value per row for every output key
    Rows(Vec<Vec<(String, Value)>>),
    /// One value per output key
    Reduced(Vec<(String, Value)>),
}

/// Static validation, done before any row is read.
///
/// Input keys are checked against `columns` unless it is `None` (no row).
pub(crate) fn prepare<'a>(
    maps: &'a [Map],
    mode: MapMode,
    columns: Option<&[String]>,
) -> Result<Vec<Plan<'a>>> {
    if maps.is_empty() {
        return Err(Error::InvalidMap("No map was given".to_string()));
    }
    maps.iter()
        .map(|map| {
            if map.inputs.is_empty() {
                return Err(Error::InvalidMap(format!(
                    "Map '{}' has no input key",
                    map.name
                )));
            }
            if let Some(columns) = columns {
                if let Some(key) = map.inputs.iter().find(|k| !columns.contains(k)) {
                    return Err(Error::InvalidKey(format!(
                        "The provided key {key} is invalid! Valid keys are: {columns:?}"
                    )));
                }
            }
            let outputs = map.output_keys(mode);
            let n_in = map.inputs.len();
            let valid = match mode {
                MapMode::Pointwise => outputs.len() == n_in,
                MapMode::Columnwise => !outputs.is_empty() && outputs.len() % n_in == 0,
                MapMode::Rowwise | MapMode::Generic => !outputs.is_empty(),
            };
            if !valid {
                return Err(Error::InvalidMap(format!(
                    "Map '{}' declares {} output(s) for {n_in} input(s), which does not fit {mode} application",
                    map.name,
                    outputs.len()
                )));
            }
            Ok(Plan { map, outputs })
        })
        .collect()
}

fn cell(row: &Record, key: &str) -> Result<Value> {
    Ok(row.get(key)?.unwrap_or_default())
}

fn check_arity(map: &Map, got: usize, expected: usize, mode: MapMode) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidMap(format!(
            "Map '{}' returned {got} value(s) where {mode} application expects {expected}",
            map.name
        )))
    }
}

/// Apply every plan cell by cell. Output rows keep the source run id.
pub(crate) fn apply_pointwise(rows: &[Record], plans: &[Plan<'_>]) -> Result<Vec<Record>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut fields = Vec::new();
        for plan in plans {
            for (key, output) in plan.map.inputs.iter().zip(&plan.outputs) {
                let result = plan.map.call(&[cell(row, key)?])?;
                check_arity(plan.map, result.len(), 1, MapMode::Pointwise)?;
                fields.extend(result.into_iter().map(|v| (output.clone(), v)));
            }
        }
        row.free_unused();
        out.push(Record::derived(row.id(), fields));
    }
    Ok(out)
}

/// Apply every plan to each row's input cells.
pub(crate) fn apply_rowwise(rows: &[Record], plans: &[Plan<'_>]) -> Result<Vec<Record>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut fields = Vec::new();
        for plan in plans {
            let args = plan
                .map
                .inputs
                .iter()
                .map(|key| cell(row, key))
                .collect::<Result<Vec<_>>>()?;
            let result = plan.map.call(&args)?;
            check_arity(plan.map, result.len(), plan.outputs.len(), MapMode::Rowwise)?;
            fields.extend(plan.outputs.iter().cloned().zip(result));
        }
        row.free_unused();
        out.push(Record::derived(row.id(), fields));
    }
    Ok(out)
}

/// Read every input column of `plans`, freeing each row after its cells are read.
fn gather(rows: &[Record], plans: &[Plan<'_>]) -> Result<Vec<(String, Vec<Value>)>> {
    let mut keys: Vec<&str> = Vec::new();
    for plan in plans {
        for key in &plan.map.inputs {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
    }
    let mut columns: Vec<(String, Vec<Value>)> = keys
        .iter()
        .map(|k| ((*k).to_string(), Vec::with_capacity(rows.len())))
        .collect();
    for row in rows {
        for (key, column) in &mut columns {
            column.push(cell(row, key)?);
        }
        row.free_unused();
    }
    Ok(columns)
}

fn column_of(columns: &[(String, Vec<Value>)], key: &str) -> Value {
    columns
        .iter()
        .find(|(k, _)| k == key)
        .map_or(Value::Null, |(_, col)| Value::List(col.clone()))
}

/// Call each plan once per input column.
pub(crate) fn apply_columnwise(rows: &[Record], plans: &[Plan<'_>]) -> Result<Vec<(String, Value)>> {
    let columns = gather(rows, plans)?;
    let mut outputs = Vec::new();
    for plan in plans {
        let per_key = plan.outputs.len() / plan.map.inputs.len();
        for (i, key) in plan.map.inputs.iter().enumerate() {
            let result = plan.map.call(&[column_of(&columns, key)])?;
            check_arity(plan.map, result.len(), per_key, MapMode::Columnwise)?;
            let names = &plan.outputs[i * per_key..(i + 1) * per_key];
            outputs.extend(names.iter().cloned().zip(result));
        }
    }
    Ok(outputs)
}

/// Call each plan once with all of its input columns.
pub(crate) fn apply_generic(rows: &[Record], plans: &[Plan<'_>]) -> Result<Vec<(String, Value)>> {
    let columns = gather(rows, plans)?;
    let mut outputs = Vec::new();
    for plan in plans {
        let args: Vec<Value> = plan
            .map
            .inputs
            .iter()
            .map(|key| column_of(&columns, key))
            .collect();
        let result = plan.map.call(&args)?;
        check_arity(plan.map, result.len(), plan.outputs.len(), MapMode::Generic)?;
        outputs.extend(plan.outputs.iter().cloned().zip(result));
    }
    Ok(outputs)
}

/// Decide once, unanimously, whether `outputs` reduce a collection of `n_rows`.
pub(crate) fn shape(outputs: Vec<(String, Value)>, n_rows: usize) -> Result<Shape> {
    let non_reducing = |v: &Value| matches!(v, Value::List(items) if items.len() == n_rows);
    let keeping = outputs.iter().filter(|(_, v)| non_reducing(v)).count();

    if keeping == outputs.len() && !outputs.is_empty() {
        let mut rows: Vec<Vec<(String, Value)>> = vec![Vec::with_capacity(outputs.len()); n_rows];
        for (key, value) in outputs {
            if let Value::List(items) = value {
                for (row, item) in rows.iter_mut().zip(items) {
                    row.push((key.clone(), item));
                }
            }
        }
        Ok(Shape::Rows(rows))
    } else if keeping == 0 {
        Ok(Shape::Reduced(outputs))
    } else {
        let kept: Vec<&str> = outputs
            .iter()
            .filter(|(_, v)| non_reducing(v))
            .map(|(k, _)| k.as_str())
            .collect();
        Err(Error::InvalidMap(format!(
            "Cannot mix reducing and non-reducing maps in one call: {kept:?} keep {n_rows} rows while the other outputs do not"
        )))
    }
}

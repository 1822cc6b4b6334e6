//! Built-in column maps for summarising runs
//!
//! All maps here are columnwise: each call receives one whole column as a
//! [`Value::List`]. Columns hold either scalars (one number per run) or metric
//! series (one list per run).

use super::map::Map;
use crate::value::Value;
use crate::{Error, Result};

fn column(args: &[Value]) -> &[Value] {
    args.first().and_then(Value::as_list).unwrap_or_default()
}

fn numbers(name: &str, values: &[Value]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                Error::InvalidMap(format!(
                    "{name} expects numbers or numeric series, got {}",
                    v.type_name()
                ))
            })
        })
        .collect()
}

/// Per-run series truncated to the shortest one.
fn series(name: &str, values: &[Value]) -> Result<Vec<Vec<f64>>> {
    let mut out = values
        .iter()
        .map(|v| match v {
            Value::List(items) => numbers(name, items),
            other => Ok(vec![other.as_f64().ok_or_else(|| {
                Error::InvalidMap(format!(
                    "{name} expects numbers or numeric series, got {}",
                    other.type_name()
                ))
            })?]),
        })
        .collect::<Result<Vec<_>>>()?;
    let shortest = out.iter().map(Vec::len).min().unwrap_or(0);
    for s in &mut out {
        s.truncate(shortest);
    }
    Ok(out)
}

fn is_series(values: &[Value]) -> bool {
    values.iter().any(|v| matches!(v, Value::List(_)))
}

#[allow(clippy::cast_precision_loss)]
fn moments(series: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let n = series.len() as f64;
    let len = series.first().map_or(0, Vec::len);
    let mut avg = vec![0.0; len];
    let mut sq = vec![0.0; len];
    for s in series {
        for (i, x) in s.iter().enumerate() {
            avg[i] += x;
            sq[i] += x * x;
        }
    }
    for i in 0..len {
        avg[i] /= n;
        sq[i] = (sq[i] / n - avg[i] * avg[i]).max(0.0).sqrt();
    }
    (avg, sq)
}

fn floats(values: Vec<f64>) -> Value {
    Value::List(values.into_iter().map(Value::Float).collect())
}

/// Mean over runs.
///
/// Scalar columns reduce to one number; series columns reduce element-wise to
/// one series, truncated to the shortest run. Outputs `fmean.<key>`.
pub fn mean(key: &str) -> Map {
    Map::new("mean", [key], |args| {
        let values = column(args);
        if values.is_empty() {
            return Ok(vec![Value::Null]);
        }
        let runs = series("mean", values)?;
        let (avg, _) = moments(&runs);
        if is_series(values) {
            Ok(vec![floats(avg)])
        } else {
            Ok(vec![avg.first().copied().map_or(Value::Null, Value::Float)])
        }
    })
}

/// Last element of each run's series. Outputs `flast.<key>`.
///
/// Keeps one value per run, so it fits [`RecordSet::transform`](super::RecordSet::transform).
pub fn last(key: &str) -> Map {
    Map::new("last", [key], |args| {
        let lasts = column(args)
            .iter()
            .map(|v| match v {
                Value::List(items) => items.last().cloned().unwrap_or_default(),
                other => other.clone(),
            })
            .collect();
        Ok(vec![Value::List(lasts)])
    })
}

/// Element-wise mean and (population) standard deviation over runs.
///
/// Outputs `<key>_avg` and `<key>_std`.
pub fn avg_std(key: &str) -> Map {
    Map::new("avg_std", [key], |args| {
        let values = column(args);
        let runs = series("avg_std", values)?;
        let (avg, std) = moments(&runs);
        if is_series(values) {
            Ok(vec![floats(avg), floats(std)])
        } else {
            let scalar = |v: &[f64]| v.first().copied().map_or(Value::Null, Value::Float);
            Ok(vec![scalar(&avg), scalar(&std)])
        }
    })
    .with_outputs([format!("{key}_avg"), format!("{key}_std")])
}

fn select_last(name: &'static str, key: &str, better: fn(f64, f64) -> bool) -> Map {
    Map::new(name, [key], move |args| {
        let mut best: Option<(usize, f64, Value)> = None;
        for (i, v) in column(args).iter().enumerate() {
            let last = match v {
                Value::List(items) => items.last().cloned().unwrap_or_default(),
                other => other.clone(),
            };
            let Some(x) = last.as_f64().filter(|x| !x.is_nan()) else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, b, _)| better(x, *b)) {
                best = Some((i, x, last));
            }
        }
        Ok(match best {
            Some((i, _, value)) => vec![value, Value::from(i)],
            None => vec![Value::Null, Value::Null],
        })
    })
    .with_outputs([format!("{name}.{key}"), format!("arg_{name}.{key}")])
}

/// Run whose series ends lowest (NaN ignored).
///
/// Outputs `min_last.<key>` (the value) and `arg_min_last.<key>` (the row index).
pub fn min_last(key: &str) -> Map {
    select_last("min_last", key, |x, best| x < best)
}

/// Run whose series ends highest (NaN ignored).
///
/// Outputs `max_last.<key>` and `arg_max_last.<key>`.
pub fn max_last(key: &str) -> Map {
    select_last("max_last", key, |x, best| x > best)
}

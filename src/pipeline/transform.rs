// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Declarative transforms
//!
//! Pipeline files describe a transform as a primary input followed by a
//! list of row-level steps. A `TransformSpec` compiles into an ordinary [`Transform`],
//! so declared and hand-written datasets run through the same engine.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::errors::{LiveflowError, LiveflowResult};
use crate::pipeline::dataset::{lookup, Inputs, Row, Transform, TransformError};
use crate::pipeline::expectations::{compare_values, Predicate};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Largest integer an f64 holds exactly
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Join flavour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Dataset to join with
    pub with: String,
    /// Key columns present on both sides
    pub on: Vec<String>,
    #[serde(default)]
    pub how: JoinKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateSpec {
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Output column → summed input column
    #[serde(default)]
    pub sum: BTreeMap<String, String>,
    /// Output column holding the row count of each group
    #[serde(default)]
    pub count: Option<String>,
    #[serde(default)]
    pub min: BTreeMap<String, String>,
    #[serde(default)]
    pub max: BTreeMap<String, String>,
}

/// Turn each element of an array column into its own row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplodeSpec {
    pub column: String,
    /// Column the element is bound to; defaults to `column`
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Conversion applied by a `with_column` step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Cast {
    /// Unix seconds to `YYYY-MM-DD HH:MM:SS` (UTC)
    Timestamp,
    /// Unix seconds or a timestamp to `YYYY-MM-DD`
    Date,
    /// 1 = Sunday through 7 = Saturday
    DayOfWeek,
    String,
    Integer,
    Float,
}

/// Derive a column from another one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithColumnSpec {
    pub name: String,
    /// Source column; may be a dotted path into a nested object
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<Cast>,
}

/// One row-level step
///
/// Column names in `select`, `filter`, `aggregate` and `with_column.from`
/// may be dotted paths such as `item.price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Filter { filter: Predicate },
    Select { select: Vec<String> },
    Rename { rename: BTreeMap<String, String> },
    Join { join: JoinSpec },
    Union { union: String },
    Aggregate { aggregate: AggregateSpec },
    Explode { explode: ExplodeSpec },
    WithColumn { with_column: WithColumnSpec },
}

/// Declarative transform: a primary input and the steps applied to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpec {
    pub from: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl TransformSpec {
    /// Every dataset this transform reads
    pub fn references(&self) -> Vec<String> {
        let mut refs = vec![self.from.clone()];
        for step in &self.steps {
            let name = match step {
                Step::Join { join } => &join.with,
                Step::Union { union } => union,
                _ => continue,
            };
            if !refs.contains(name) {
                refs.push(name.clone());
            }
        }
        refs
    }

    /// Validate the steps and turn them into an executable transform
    pub fn compile(&self) -> LiveflowResult<Transform> {
        for step in &self.steps {
            match step {
                Step::Filter { filter } => filter.check()?,
                Step::Rename { rename } => check_renames(rename)?,
                _ => {}
            }
        }

        let spec = self.clone();
        Ok(Transform::new(move |inputs| spec.apply(inputs)))
    }

    fn apply(&self, inputs: &Inputs) -> Result<Vec<Row>, TransformError> {
        let mut rows = input(inputs, &self.from)?.to_vec();

        for step in &self.steps {
            rows = match step {
                Step::Filter { filter } => rows.into_iter().filter(|r| filter.holds(r)).collect(),
                Step::Select { select } => rows.iter().map(|r| project(r, select)).collect(),
                Step::Rename { rename } => rows.iter().map(|r| rename_columns(r, rename)).collect(),
                Step::Join { join } => hash_join(rows, input(inputs, &join.with)?, join),
                Step::Union { union } => {
                    rows.extend(input(inputs, union)?.iter().cloned());
                    rows
                }
                Step::Aggregate { aggregate } => group(&rows, aggregate),
                Step::Explode { explode } => explode_rows(rows, explode)?,
                Step::WithColumn { with_column } => {
                    rows.iter_mut().for_each(|r| derive_column(r, with_column));
                    rows
                }
            };
        }

        Ok(rows)
    }
}

fn input<'a>(inputs: &'a Inputs, name: &str) -> Result<&'a [Row], TransformError> {
    inputs
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| TransformError::new(format!("input '{}' was not provided", name)))
}

fn project(row: &Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), lookup(row, c).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Two columns renamed to the same target would silently lose one of them
fn check_renames(renames: &BTreeMap<String, String>) -> LiveflowResult<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (from, to) in renames {
        if let Some(other) = seen.insert(to.as_str(), from.as_str()) {
            return Err(LiveflowError::invalid_pipeline(
                format!("rename maps both '{}' and '{}' to '{}'", other, from, to),
                Some("Give every renamed column a distinct target name"),
            ));
        }
    }
    Ok(())
}

/// Renamed columns replace any existing column of the target name
fn rename_columns(row: &Row, renames: &BTreeMap<String, String>) -> Row {
    let targets: Vec<&String> = renames.values().collect();
    let mut out = Row::new();
    for (k, v) in row {
        match renames.get(k) {
            Some(to) => {
                out.insert(to.clone(), v.clone());
            }
            None if targets.contains(&k) => {}
            None => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

/// Numbers that compare equal hash equal: `1` and `1.0` share a key
fn key_part(v: &Value) -> Value {
    match v.as_f64() {
        Some(f) if v.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT => {
            Value::from(f as i64)
        }
        _ => v.clone(),
    }
}

/// Key of a row over `columns`; `None` when any key column is null
fn key_of(row: &Row, columns: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(columns.len());
    for c in columns {
        match lookup(row, c) {
            None | Some(Value::Null) => return None,
            Some(v) => parts.push(key_part(v)),
        }
    }
    Some(Value::Array(parts).to_string())
}

fn explode_rows(rows: Vec<Row>, spec: &ExplodeSpec) -> Result<Vec<Row>, TransformError> {
    let alias = spec.alias.as_ref().unwrap_or(&spec.column);
    let mut out = Vec::new();

    for mut row in rows {
        let elements = match row.shift_remove(&spec.column) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(TransformError::new(format!(
                    "cannot explode '{}': expected an array, found {}",
                    spec.column, other
                )))
            }
        };

        for element in elements {
            let mut exploded = row.clone();
            exploded.insert(alias.clone(), element);
            out.push(exploded);
        }
    }

    Ok(out)
}

fn derive_column(row: &mut Row, spec: &WithColumnSpec) {
    let source = lookup(row, &spec.from).cloned().unwrap_or(Value::Null);
    let value = match spec.cast {
        None => source,
        Some(cast) => cast_value(&source, cast),
    };
    row.insert(spec.name.clone(), value);
}

/// Unix seconds, from a number or a numeric string
fn unix_seconds(v: &Value) -> Option<NaiveDateTime> {
    let secs = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

fn to_datetime(v: &Value) -> Option<NaiveDateTime> {
    if let Some(dt) = unix_seconds(v) {
        return Some(dt);
    }
    let s = v.as_str()?.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s, DATE_FORMAT).ok()?.and_hms_opt(0, 0, 0))
}

/// Values that cannot be converted become null
fn cast_value(v: &Value, cast: Cast) -> Value {
    if v.is_null() {
        return Value::Null;
    }

    let converted = match cast {
        Cast::Timestamp => to_datetime(v).map(|dt| Value::from(dt.format(TIMESTAMP_FORMAT).to_string())),
        Cast::Date => to_datetime(v).map(|dt| Value::from(dt.format(DATE_FORMAT).to_string())),
        Cast::DayOfWeek => to_datetime(v).map(|dt| Value::from(dt.weekday().number_from_sunday())),
        Cast::String => Some(match v {
            Value::String(s) => Value::from(s.clone()),
            other => Value::from(other.to_string()),
        }),
        Cast::Integer => match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
        .map(Value::from),
        Cast::Float => match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number)),
    };

    converted.unwrap_or(Value::Null)
}

fn hash_join(left: Vec<Row>, right: &[Row], spec: &JoinSpec) -> Vec<Row> {
    let mut index: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in right {
        if let Some(key) = key_of(row, &spec.on) {
            index.entry(key).or_default().push(row);
        }
    }

    let mut out = Vec::new();
    for row in left {
        let matches = key_of(&row, &spec.on).and_then(|k| index.get(&k));
        match matches {
            Some(candidates) => {
                for other in candidates {
                    let mut merged = row.clone();
                    for (k, v) in other.iter() {
                        if !merged.contains_key(k) {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    out.push(merged);
                }
            }
            None if spec.how == JoinKind::Left => out.push(row),
            None => {}
        }
    }
    out
}

#[derive(Default)]
struct Accumulator {
    first: Row,
    count: u64,
    sums: BTreeMap<String, Sum>,
    mins: BTreeMap<String, Value>,
    maxs: BTreeMap<String, Value>,
}

#[derive(Clone, Copy)]
enum Sum {
    Int(i64),
    Float(f64),
}

impl Sum {
    fn add(self, v: &Value) -> Self {
        match (self, v.as_i64()) {
            (Self::Int(acc), Some(i)) => match acc.checked_add(i) {
                Some(total) => Self::Int(total),
                None => Self::Float(acc as f64 + i as f64),
            },
            (Self::Int(acc), None) => Self::Float(acc as f64 + v.as_f64().unwrap_or(0.0)),
            (Self::Float(acc), _) => Self::Float(acc + v.as_f64().unwrap_or(0.0)),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Int(i) => Value::from(i),
            Self::Float(f) => Value::from(f),
        }
    }
}

fn group(rows: &[Row], spec: &AggregateSpec) -> Vec<Row> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Accumulator> = HashMap::new();

    for row in rows {
        let key = Value::Array(
            spec.group_by
                .iter()
                .map(|c| lookup(row, c).map(key_part).unwrap_or(Value::Null))
                .collect(),
        )
        .to_string();

        let acc = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Accumulator {
                first: project(row, &spec.group_by),
                ..Default::default()
            }
        });

        acc.count += 1;

        for (out, col) in &spec.sum {
            let sum = acc.sums.entry(out.clone()).or_insert(Sum::Int(0));
            if let Some(v) = lookup(row, col).filter(|v| v.is_number()) {
                *sum = sum.add(v);
            }
        }

        for (out, col) in &spec.min {
            if let Some(v) = lookup(row, col).filter(|v| !v.is_null()) {
                let current = acc.mins.entry(out.clone()).or_insert_with(|| v.clone());
                if compare_values(v, current) == Some(std::cmp::Ordering::Less) {
                    *current = v.clone();
                }
            }
        }

        for (out, col) in &spec.max {
            if let Some(v) = lookup(row, col).filter(|v| !v.is_null()) {
                let current = acc.maxs.entry(out.clone()).or_insert_with(|| v.clone());
                if compare_values(v, current) == Some(std::cmp::Ordering::Greater) {
                    *current = v.clone();
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|acc| {
            let mut out = acc.first;
            for out_col in spec.sum.keys() {
                let total = acc.sums.get(out_col).copied().unwrap_or(Sum::Int(0));
                out.insert(out_col.clone(), total.into_value());
            }
            if let Some(ref count_col) = spec.count {
                out.insert(count_col.clone(), Value::from(acc.count));
            }
            for out_col in spec.min.keys() {
                out.insert(out_col.clone(), acc.mins.get(out_col).cloned().unwrap_or(Value::Null));
            }
            for out_col in spec.max.keys() {
                out.insert(out_col.clone(), acc.maxs.get(out_col).cloned().unwrap_or(Value::Null));
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn spec(yaml: &str) -> TransformSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_steps_and_references() {
        let spec = spec(
            r#"
from: sales_orders_raw
steps:
  - join: { with: customers, on: [customer_id], how: left }
  - filter: { column: city, op: eq, value: "Chicago" }
  - select: [customer_id, city]
  - union: backfill
"#,
        );

        assert_eq!(spec.steps.len(), 4);
        assert!(matches!(spec.steps[0], Step::Join { .. }));
        assert!(matches!(spec.steps[1], Step::Filter { .. }));
        assert!(matches!(spec.steps[2], Step::Select { .. }));
        assert_eq!(
            spec.references(),
            vec!["sales_orders_raw", "customers", "backfill"]
        );
    }

    #[test]
    fn test_join_left_keeps_unmatched() {
        let t = spec(
            r#"
from: orders
steps:
  - join: { with: customers, on: [customer_id], how: left }
"#,
        )
        .compile()
        .unwrap();

        let mut inputs = Inputs::new();
        inputs.insert(
            "orders".into(),
            rows(json!([{"customer_id": 1, "qty": 2}, {"customer_id": 9, "qty": 1}])),
        );
        inputs.insert(
            "customers".into(),
            rows(json!([{"customer_id": 1, "customer_name": "Ada"}])),
        );

        let out = t.apply(&inputs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["customer_name"], json!("Ada"));
        assert!(out[1].get("customer_name").is_none());
    }

    #[test]
    fn test_inner_join_drops_unmatched_and_null_keys() {
        let t = spec("from: a\nsteps:\n  - join: { with: b, on: [id] }\n")
            .compile()
            .unwrap();

        let mut inputs = Inputs::new();
        inputs.insert("a".into(), rows(json!([{"id": 1}, {"id": null}, {"id": 3}])));
        inputs.insert("b".into(), rows(json!([{"id": 1, "x": true}, {"id": null}])));

        let out = t.apply(&inputs).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["x"], json!(true));
    }

    #[test]
    fn test_aggregate_rename_rollup() {
        let t = spec(
            r#"
from: historical_txs
steps:
  - aggregate: { group_by: [addr_state], sum: { bal: revol_bal }, count: n }
  - rename: { addr_state: location_code }
"#,
        )
        .compile()
        .unwrap();

        let mut inputs = Inputs::new();
        inputs.insert(
            "historical_txs".into(),
            rows(json!([
                {"addr_state": "CA", "revol_bal": 10},
                {"addr_state": "NY", "revol_bal": 5},
                {"addr_state": "CA", "revol_bal": 2.5},
            ])),
        );

        let out = t.apply(&inputs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["location_code"], json!("CA"));
        assert_eq!(out[0]["bal"], json!(12.5));
        assert_eq!(out[0]["n"], json!(2));
        assert_eq!(out[1]["bal"], json!(5));
    }

    #[test]
    fn test_min_max_ignore_nulls() {
        let agg = AggregateSpec {
            group_by: vec![],
            min: BTreeMap::from([("lo".to_string(), "v".to_string())]),
            max: BTreeMap::from([("hi".to_string(), "v".to_string())]),
            ..Default::default()
        };
        let out = group(&rows(json!([{"v": 3}, {"v": null}, {"v": 7}, {"v": 1}])), &agg);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["lo"], json!(1));
        assert_eq!(out[0]["hi"], json!(7));
    }

    #[test]
    fn test_missing_input_is_transform_error() {
        let t = spec("from: nowhere\n").compile().unwrap();
        let err = t.apply(&Inputs::new()).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_explode_nested_products_into_city_rollup() {
        let t = spec(
            r#"
from: orders
steps:
  - filter: { column: city, op: eq, value: "Los Angeles" }
  - explode: { column: ordered_products, as: product }
  - with_column: { name: order_date, from: order_datetime, cast: date }
  - aggregate:
      group_by: [order_date, city, customer_id, product.curr]
      sum: { sales: product.price, quantity: product.qty }
  - rename: { product.curr: currency }
"#,
        )
        .compile()
        .unwrap();

        let mut inputs = Inputs::new();
        inputs.insert(
            "orders".into(),
            rows(json!([
                {"city": "Los Angeles", "customer_id": "C1", "order_datetime": "1704067200",
                 "ordered_products": [{"curr": "USD", "price": 10, "qty": 1}, {"curr": "USD", "price": 5, "qty": 2}]},
                {"city": "Los Angeles", "customer_id": "C1", "order_datetime": 1704070800,
                 "ordered_products": [{"curr": "USD", "price": 20, "qty": 1}]},
                {"city": "Chicago", "customer_id": "C2", "order_datetime": 1704067200,
                 "ordered_products": [{"curr": "USD", "price": 99, "qty": 1}]},
                {"city": "Los Angeles", "customer_id": "C1", "order_datetime": 1704153600,
                 "ordered_products": []},
            ])),
        );

        let out = t.apply(&inputs).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["order_date"], json!("2024-01-01"));
        assert_eq!(out[0]["currency"], json!("USD"));
        assert_eq!(out[0]["sales"], json!(35));
        assert_eq!(out[0]["quantity"], json!(4));
        assert!(out[0].get("product.curr").is_none());
    }

    #[test]
    fn test_explode_drops_null_and_empty_arrays() {
        let explode = ExplodeSpec {
            column: "items".into(),
            alias: None,
        };
        let out = explode_rows(
            rows(json!([
                {"id": 1, "items": [1, 2]},
                {"id": 2, "items": []},
                {"id": 3, "items": null},
                {"id": 4},
            ])),
            &explode,
        )
        .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["items"], json!(1));
        assert_eq!(out[1]["items"], json!(2));
        assert!(out.iter().all(|r| r["id"] == json!(1)));

        let err = explode_rows(rows(json!([{"items": "abc"}])), &explode).unwrap_err();
        assert!(err.to_string().contains("expected an array"));
    }

    #[test]
    fn test_with_column_casts() {
        let cast = |v: Value, c: Cast| cast_value(&v, c);

        assert_eq!(cast(json!(1704067200), Cast::Timestamp), json!("2024-01-01 00:00:00"));
        assert_eq!(cast(json!("1704070800"), Cast::Timestamp), json!("2024-01-01 01:00:00"));
        assert_eq!(cast(json!("2024-01-01 13:45:00"), Cast::Date), json!("2024-01-01"));
        // 2024-01-01 was a Monday
        assert_eq!(cast(json!("2024-01-01"), Cast::DayOfWeek), json!(2));
        assert_eq!(cast(json!("2024-01-06"), Cast::DayOfWeek), json!(7));
        assert_eq!(cast(json!("2024-01-07"), Cast::DayOfWeek), json!(1));
        assert_eq!(cast(json!("yesterday"), Cast::Date), Value::Null);
        assert_eq!(cast(json!("42"), Cast::Integer), json!(42));
        assert_eq!(cast(json!(2.75), Cast::Integer), json!(2));
        assert_eq!(cast(json!("2.5"), Cast::Float), json!(2.5));
        assert_eq!(cast(json!(7), Cast::String), json!("7"));
        assert_eq!(cast(Value::Null, Cast::String), Value::Null);
    }

    #[test]
    fn test_with_column_copies_nested_field() {
        let t = spec("from: a\nsteps:\n  - with_column: { name: price, from: item.price }\n")
            .compile()
            .unwrap();

        let mut inputs = Inputs::new();
        inputs.insert("a".into(), rows(json!([{"item": {"price": 3}}, {"item": {}}])));

        let out = t.apply(&inputs).unwrap();
        assert_eq!(out[0]["price"], json!(3));
        assert_eq!(out[1]["price"], Value::Null);
    }

    #[test]
    fn test_join_and_group_treat_integral_floats_as_integers() {
        let t = spec("from: a\nsteps:\n  - join: { with: b, on: [id] }\n")
            .compile()
            .unwrap();

        let mut inputs = Inputs::new();
        inputs.insert("a".into(), rows(json!([{"id": 1}, {"id": 2.5}])));
        inputs.insert("b".into(), rows(json!([{"id": 1.0, "x": true}, {"id": 2.5, "x": false}])));

        let out = t.apply(&inputs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["x"], json!(true));

        let agg = AggregateSpec {
            group_by: vec!["id".into()],
            count: Some("n".into()),
            ..Default::default()
        };
        let grouped = group(&rows(json!([{"id": 1}, {"id": 1.0}, {"id": 2}])), &agg);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0]["n"], json!(2));
    }

    #[test]
    fn test_rename_replaces_existing_column() {
        let renames = BTreeMap::from([("amount".to_string(), "price".to_string())]);
        let out = rename_columns(
            &rows(json!([{"price": 1, "amount": 9, "qty": 2}]))[0],
            &renames,
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out["price"], json!(9));
        assert_eq!(out["qty"], json!(2));

        let swap = BTreeMap::from([
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "a".to_string()),
        ]);
        let out = rename_columns(&rows(json!([{"a": 1, "b": 2}]))[0], &swap);
        assert_eq!(out["a"], json!(2));
        assert_eq!(out["b"], json!(1));
    }

    #[test]
    fn test_compile_rejects_duplicate_rename_targets() {
        let s = spec("from: a\nsteps:\n  - rename: { x: total, y: total }\n");
        let err = s.compile().unwrap_err();
        assert!(err.to_string().contains("'total'"));
    }

    #[test]
    fn test_compile_rejects_bad_filter() {
        let s = spec("from: a\nsteps:\n  - filter: { column: name, op: matches, value: \"([\" }\n");
        assert!(s.compile().is_err());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Expectations (data-quality constraints)
//!
//! A constraint is a named predicate over a row with a violation policy.
//! Every constraint is evaluated over the whole batch in declaration order:
//!
//! - `fail`: one violating row aborts the dataset for this run
//! - `drop`: violating rows are removed from the output
//! - `warn`: violations are counted, rows are kept

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::errors::{LiveflowError, LiveflowResult};
use crate::pipeline::dataset::{lookup, Row};

/// What happens to rows that violate a constraint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Drop,
    Fail,
    #[default]
    Warn,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Fail => write!(f, "fail"),
            Self::Warn => write!(f, "warn"),
        }
    }
}

/// Comparison operators for column checks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    NotNull,
    IsNull,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Matches,
}

/// A single-column check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub column: String,
    pub op: CompareOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
    #[serde(skip)]
    pattern: OnceLock<Option<Regex>>,
}

impl Comparison {
    pub fn new(column: impl Into<String>, op: CompareOp, value: Option<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value,
            values: Vec::new(),
            pattern: OnceLock::new(),
        }
    }

    fn regex(&self) -> Option<&Regex> {
        self.pattern
            .get_or_init(|| {
                self.value
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|p| Regex::new(p).ok())
            })
            .as_ref()
    }

    fn holds(&self, row: &Row) -> bool {
        let cell = lookup(row, &self.column).filter(|v| !v.is_null());

        match self.op {
            CompareOp::NotNull => cell.is_some(),
            CompareOp::IsNull => cell.is_none(),
            CompareOp::In => cell.is_some_and(|v| self.values.iter().any(|c| loosely_equal(v, c))),
            CompareOp::Matches => match (cell.and_then(Value::as_str), self.regex()) {
                (Some(s), Some(re)) => re.is_match(s),
                _ => false,
            },
            op => {
                let (Some(left), Some(right)) = (cell, self.value.as_ref()) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => loosely_equal(left, right),
                    CompareOp::Ne => !loosely_equal(left, right),
                    _ => match compare_values(left, right) {
                        Some(ord) => match op {
                            CompareOp::Gt => ord == Ordering::Greater,
                            CompareOp::Ge => ord != Ordering::Less,
                            CompareOp::Lt => ord == Ordering::Less,
                            CompareOp::Le => ord != Ordering::Greater,
                            _ => false,
                        },
                        None => false,
                    },
                }
            }
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between two scalars of the same family (numbers or strings)
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

type RowPredicateFn = dyn Fn(&Row) -> bool + Send + Sync;

/// Predicate supplied as code rather than declared in a pipeline file
#[derive(Clone)]
pub struct RowPredicate(Arc<RowPredicateFn>);

impl fmt::Debug for RowPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowPredicate(..)")
    }
}

/// Boolean predicate over a row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
    Not { not: Box<Predicate> },
    Check(Comparison),
    #[serde(skip)]
    Custom(RowPredicate),
}

impl Predicate {
    pub fn not_null(column: impl Into<String>) -> Self {
        Self::Check(Comparison::new(column, CompareOp::NotNull, None))
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Check(Comparison::new(column, op, Some(value.into())))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        Self::Custom(RowPredicate(Arc::new(f)))
    }

    /// Evaluate against a row
    pub fn holds(&self, row: &Row) -> bool {
        match self {
            Self::All { all } => all.iter().all(|p| p.holds(row)),
            Self::Any { any } => any.iter().any(|p| p.holds(row)),
            Self::Not { not } => !not.holds(row),
            Self::Check(c) => c.holds(row),
            Self::Custom(f) => (f.0)(row),
        }
    }

    /// Reject malformed declarations (bad regexes, missing operands)
    pub fn check(&self) -> LiveflowResult<()> {
        match self {
            Self::All { all: preds } | Self::Any { any: preds } => {
                preds.iter().try_for_each(Predicate::check)
            }
            Self::Not { not } => not.check(),
            Self::Custom(_) => Ok(()),
            Self::Check(c) => match c.op {
                CompareOp::NotNull | CompareOp::IsNull => Ok(()),
                CompareOp::In if c.values.is_empty() => Err(LiveflowError::invalid_pipeline(
                    format!("'in' check on '{}' has no values", c.column),
                    Some("List candidates under 'values:'"),
                )),
                CompareOp::In => Ok(()),
                CompareOp::Matches => {
                    let pattern = c.value.as_ref().and_then(Value::as_str).ok_or_else(|| {
                        LiveflowError::invalid_pipeline(
                            format!("'matches' check on '{}' needs a string pattern", c.column),
                            None,
                        )
                    })?;
                    Regex::new(pattern)?;
                    Ok(())
                }
                _ if c.value.is_none() => Err(LiveflowError::invalid_pipeline(
                    format!("'{:?}' check on '{}' has no value", c.op, c.column),
                    None,
                )),
                _ => Ok(()),
            },
        }
    }
}

/// A named expectation owned by one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub check: Predicate,
    #[serde(default)]
    pub on_violation: Policy,
}

impl Constraint {
    pub fn new(name: impl Into<String>, check: Predicate, on_violation: Policy) -> Self {
        Self {
            name: name.into(),
            check,
            on_violation,
        }
    }
}

/// Per-expectation outcome for one materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationReport {
    pub name: String,
    pub policy: Policy,
    pub passed: usize,
    pub failed: usize,
}

impl ExpectationReport {
    /// A warn-policy expectation that saw violations
    pub fn is_warning(&self) -> bool {
        self.policy == Policy::Warn && self.failed > 0
    }
}

/// Result of validating a batch
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Rows that passed every drop-policy constraint
    pub kept: Vec<Row>,
    /// Rows removed by drop-policy constraints
    pub dropped: usize,
    pub reports: Vec<ExpectationReport>,
}

/// Applies a dataset's constraints to a batch
pub struct ConstraintEvaluator;

impl ConstraintEvaluator {
    /// Validate `rows` against `constraints`.
    ///
    /// Fails with [`LiveflowError::ConstraintViolation`] on the first
    /// fail-policy constraint (in declaration order) with any violating row.
    pub fn evaluate(
        dataset: &str,
        constraints: &[Constraint],
        rows: Vec<Row>,
    ) -> LiveflowResult<Evaluation> {
        let mut drop_mask = vec![false; rows.len()];
        let mut reports = Vec::with_capacity(constraints.len());

        for constraint in constraints {
            let violations: Vec<bool> = rows.iter().map(|r| !constraint.check.holds(r)).collect();
            let failed = violations.iter().filter(|v| **v).count();

            if constraint.on_violation == Policy::Fail && failed > 0 {
                return Err(LiveflowError::ConstraintViolation {
                    dataset: dataset.to_string(),
                    constraint: constraint.name.clone(),
                    violations: failed,
                });
            }

            if constraint.on_violation == Policy::Drop {
                for (slot, violated) in drop_mask.iter_mut().zip(&violations) {
                    *slot |= *violated;
                }
            }

            if failed > 0 {
                tracing::debug!(
                    dataset = %dataset,
                    expectation = %constraint.name,
                    policy = %constraint.on_violation,
                    failed,
                    "expectation violated"
                );
            }

            reports.push(ExpectationReport {
                name: constraint.name.clone(),
                policy: constraint.on_violation,
                passed: rows.len() - failed,
                failed,
            });
        }

        let dropped = drop_mask.iter().filter(|d| **d).count();
        let kept = rows
            .into_iter()
            .zip(drop_mask)
            .filter_map(|(row, drop)| (!drop).then_some(row))
            .collect();

        Ok(Evaluation {
            kept,
            dropped,
            reports,
        })
    }
}

//! Choice rules and their evaluator.
//!
//! A rule is either a boolean composite (`And`/`Or`/`Not` over nested rules)
//! or a data-test predicate: a `Variable` path plus exactly one comparison
//! operator. Top-level rules additionally carry the `Next` state selected
//! when they match; rules are tried in declaration order and the first match
//! wins.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::{names, ExecutionError, Result};
use crate::path;

/// A choice rule with the transition it selects on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopLevelChoiceRule {
    #[serde(rename = "Next")]
    pub next: String,
    #[serde(flatten)]
    pub rule: ChoiceRule,
}

/// A boolean composite or a single data-test predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceRule {
    And {
        #[serde(rename = "And")]
        and: Vec<ChoiceRule>,
    },
    Or {
        #[serde(rename = "Or")]
        or: Vec<ChoiceRule>,
    },
    Not {
        #[serde(rename = "Not")]
        not: Box<ChoiceRule>,
    },
    Predicate {
        #[serde(rename = "Variable")]
        variable: String,
        #[serde(flatten)]
        test: Comparison,
    },
}

/// The closed set of comparison operators.
///
/// `*Path` variants resolve their operand through the expression engine at
/// evaluation time instead of taking a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Comparison {
    StringEquals(String),
    StringLessThan(String),
    StringGreaterThan(String),
    StringLessThanEquals(String),
    StringGreaterThanEquals(String),
    StringMatches(String),
    StringEqualsPath(String),
    StringLessThanPath(String),
    StringGreaterThanPath(String),
    StringLessThanEqualsPath(String),
    StringGreaterThanEqualsPath(String),
    NumericEquals(f64),
    NumericLessThan(f64),
    NumericGreaterThan(f64),
    NumericLessThanEquals(f64),
    NumericGreaterThanEquals(f64),
    NumericEqualsPath(String),
    NumericLessThanPath(String),
    NumericGreaterThanPath(String),
    NumericLessThanEqualsPath(String),
    NumericGreaterThanEqualsPath(String),
    BooleanEquals(bool),
    BooleanEqualsPath(String),
    TimestampEquals(String),
    TimestampLessThan(String),
    TimestampGreaterThan(String),
    TimestampLessThanEquals(String),
    TimestampGreaterThanEquals(String),
    TimestampEqualsPath(String),
    TimestampLessThanPath(String),
    TimestampGreaterThanPath(String),
    TimestampLessThanEqualsPath(String),
    TimestampGreaterThanEqualsPath(String),
    IsNull(bool),
    IsPresent(bool),
    IsNumeric(bool),
    IsString(bool),
    IsBoolean(bool),
    IsTimestamp(bool),
}

/// Returns the `Next` of the first rule whose predicate holds, if any.
pub fn evaluate_choices(
    choices: &[TopLevelChoiceRule],
    input: &Value,
    context: &Context,
) -> Result<Option<String>> {
    for choice in choices {
        if rule_matches(&choice.rule, input, context)? {
            return Ok(Some(choice.next.clone()));
        }
    }
    Ok(None)
}

/// Evaluates one rule against `input`.
pub fn rule_matches(rule: &ChoiceRule, input: &Value, context: &Context) -> Result<bool> {
    match rule {
        ChoiceRule::And { and } => {
            for nested in and {
                if !rule_matches(nested, input, context)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        ChoiceRule::Or { or } => {
            for nested in or {
                if rule_matches(nested, input, context)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ChoiceRule::Not { not } => Ok(!rule_matches(not, input, context)?),
        ChoiceRule::Predicate { variable, test } => {
            let value = path::resolve(variable, input, context)?;
            test.holds(value.as_ref(), input, context)
        }
    }
}

impl Comparison {
    /// Evaluates this comparison against the resolved `Variable` value.
    ///
    /// A dangling variable (`None`) makes every ordering/equality comparison
    /// false; the `Is*` family observes it through its type test instead.
    fn holds(&self, variable: Option<&Value>, input: &Value, context: &Context) -> Result<bool> {
        use Comparison::*;
        let verdict = match self {
            StringEquals(v) => str_cmp(variable, v, Ordering::is_eq),
            StringLessThan(v) => str_cmp(variable, v, Ordering::is_lt),
            StringGreaterThan(v) => str_cmp(variable, v, Ordering::is_gt),
            StringLessThanEquals(v) => str_cmp(variable, v, Ordering::is_le),
            StringGreaterThanEquals(v) => str_cmp(variable, v, Ordering::is_ge),
            StringMatches(mask) => return string_matches(variable, mask),
            StringEqualsPath(p) => str_cmp_path(variable, p, input, context, Ordering::is_eq)?,
            StringLessThanPath(p) => str_cmp_path(variable, p, input, context, Ordering::is_lt)?,
            StringGreaterThanPath(p) => str_cmp_path(variable, p, input, context, Ordering::is_gt)?,
            StringLessThanEqualsPath(p) => {
                str_cmp_path(variable, p, input, context, Ordering::is_le)?
            }
            StringGreaterThanEqualsPath(p) => {
                str_cmp_path(variable, p, input, context, Ordering::is_ge)?
            }
            NumericEquals(v) => num_cmp(variable, *v, Ordering::is_eq),
            NumericLessThan(v) => num_cmp(variable, *v, Ordering::is_lt),
            NumericGreaterThan(v) => num_cmp(variable, *v, Ordering::is_gt),
            NumericLessThanEquals(v) => num_cmp(variable, *v, Ordering::is_le),
            NumericGreaterThanEquals(v) => num_cmp(variable, *v, Ordering::is_ge),
            NumericEqualsPath(p) => num_cmp_path(variable, p, input, context, Ordering::is_eq)?,
            NumericLessThanPath(p) => num_cmp_path(variable, p, input, context, Ordering::is_lt)?,
            NumericGreaterThanPath(p) => {
                num_cmp_path(variable, p, input, context, Ordering::is_gt)?
            }
            NumericLessThanEqualsPath(p) => {
                num_cmp_path(variable, p, input, context, Ordering::is_le)?
            }
            NumericGreaterThanEqualsPath(p) => {
                num_cmp_path(variable, p, input, context, Ordering::is_ge)?
            }
            BooleanEquals(v) => variable.and_then(Value::as_bool) == Some(*v),
            BooleanEqualsPath(p) => {
                let target = path::resolve(p, input, context)?;
                match target.as_ref().and_then(Value::as_bool) {
                    Some(t) => variable.and_then(Value::as_bool) == Some(t),
                    None => false,
                }
            }
            TimestampEquals(v) => ts_cmp(variable, v, Ordering::is_eq),
            TimestampLessThan(v) => ts_cmp(variable, v, Ordering::is_lt),
            TimestampGreaterThan(v) => ts_cmp(variable, v, Ordering::is_gt),
            TimestampLessThanEquals(v) => ts_cmp(variable, v, Ordering::is_le),
            TimestampGreaterThanEquals(v) => ts_cmp(variable, v, Ordering::is_ge),
            TimestampEqualsPath(p) => ts_cmp_path(variable, p, input, context, Ordering::is_eq)?,
            TimestampLessThanPath(p) => ts_cmp_path(variable, p, input, context, Ordering::is_lt)?,
            TimestampGreaterThanPath(p) => {
                ts_cmp_path(variable, p, input, context, Ordering::is_gt)?
            }
            TimestampLessThanEqualsPath(p) => {
                ts_cmp_path(variable, p, input, context, Ordering::is_le)?
            }
            TimestampGreaterThanEqualsPath(p) => {
                ts_cmp_path(variable, p, input, context, Ordering::is_ge)?
            }
            IsNull(expected) => expect(*expected, matches!(variable, Some(Value::Null))),
            IsPresent(expected) => expect(*expected, variable.is_some()),
            IsNumeric(expected) => expect(*expected, matches!(variable, Some(Value::Number(_)))),
            IsString(expected) => expect(*expected, matches!(variable, Some(Value::String(_)))),
            IsBoolean(expected) => expect(*expected, matches!(variable, Some(Value::Bool(_)))),
            IsTimestamp(expected) => expect(
                *expected,
                variable
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp)
                    .is_some(),
            ),
        };
        Ok(verdict)
    }
}

fn expect(expected: bool, actual: bool) -> bool {
    if expected {
        actual
    } else {
        !actual
    }
}

fn str_cmp(variable: Option<&Value>, target: &str, pred: fn(Ordering) -> bool) -> bool {
    match variable.and_then(Value::as_str) {
        Some(s) => pred(s.cmp(target)),
        None => false,
    }
}

fn str_cmp_path(
    variable: Option<&Value>,
    target_path: &str,
    input: &Value,
    context: &Context,
    pred: fn(Ordering) -> bool,
) -> Result<bool> {
    let target = path::resolve(target_path, input, context)?;
    Ok(match target.as_ref().and_then(Value::as_str) {
        Some(t) => str_cmp(variable, t, pred),
        None => false,
    })
}

fn num_cmp(variable: Option<&Value>, target: f64, pred: fn(Ordering) -> bool) -> bool {
    match variable.and_then(Value::as_f64) {
        Some(n) => n.partial_cmp(&target).map_or(false, pred),
        None => false,
    }
}

fn num_cmp_path(
    variable: Option<&Value>,
    target_path: &str,
    input: &Value,
    context: &Context,
    pred: fn(Ordering) -> bool,
) -> Result<bool> {
    let target = path::resolve(target_path, input, context)?;
    Ok(match target.as_ref().and_then(Value::as_f64) {
        Some(t) => num_cmp(variable, t, pred),
        None => false,
    })
}

fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok()
}

/// Compares parsed instants, not lexical strings. Unparseable operands make
/// the predicate false, on either side.
fn ts_cmp(variable: Option<&Value>, target: &str, pred: fn(Ordering) -> bool) -> bool {
    let var = variable.and_then(Value::as_str).and_then(parse_timestamp);
    match (var, parse_timestamp(target)) {
        (Some(a), Some(b)) => pred(a.cmp(&b)),
        _ => false,
    }
}

fn ts_cmp_path(
    variable: Option<&Value>,
    target_path: &str,
    input: &Value,
    context: &Context,
    pred: fn(Ordering) -> bool,
) -> Result<bool> {
    let target = path::resolve(target_path, input, context)?;
    Ok(match target.as_ref().and_then(Value::as_str) {
        Some(t) => ts_cmp(variable, t, pred),
        None => false,
    })
}

/// Tests `variable` against a glob-style mask: `*` matches any run of
/// characters, `\*` a literal asterisk; everything else matches literally.
/// The mask is anchored at both ends.
fn string_matches(variable: Option<&Value>, mask: &str) -> Result<bool> {
    let Some(value) = variable.and_then(Value::as_str) else {
        return Ok(false);
    };
    let mut pattern = String::with_capacity(mask.len() + 2);
    pattern.push('^');
    let mut chars = mask.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => pattern.push_str(&regex::escape(&escaped.to_string())),
                None => pattern.push_str(&regex::escape("\\")),
            },
            '*' => pattern.push_str(".*"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    let matcher = Regex::new(&pattern).map_err(|e| {
        ExecutionError::new(names::RUNTIME, format!("invalid StringMatches mask: {e}"))
    })?;
    Ok(matcher.is_match(value))
}

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{WardenError, WardenResult};
use crate::models::Severity;

use super::path::resolve_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    Exists,
    Matches,
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionOp::Eq => "eq",
            ConditionOp::Ne => "ne",
            ConditionOp::Gt => "gt",
            ConditionOp::Gte => "gte",
            ConditionOp::Lt => "lt",
            ConditionOp::Lte => "lte",
            ConditionOp::In => "in",
            ConditionOp::Contains => "contains",
            ConditionOp::Exists => "exists",
            ConditionOp::Matches => "matches",
        };
        write!(f, "{}", s)
    }
}

/// Comparison of one (dotted) field of the event data against a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    #[serde(default)]
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

/// Predicate deciding whether a playbook fires for an event.
///
/// ```yaml
/// all:
///   - { field: severity, op: gte, value: high }
///   - not: { field: source.ip, op: in, value: ["10.0.0.1"] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerCondition {
    All { all: Vec<TriggerCondition> },
    Any { any: Vec<TriggerCondition> },
    Not { not: Box<TriggerCondition> },
    Field(FieldCondition),
}

impl TriggerCondition {
    pub fn field(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        TriggerCondition::Field(FieldCondition {
            field: field.into(),
            op,
            value,
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, ConditionOp::Eq, value.into())
    }

    pub fn all(conditions: Vec<TriggerCondition>) -> Self {
        TriggerCondition::All { all: conditions }
    }

    pub fn any(conditions: Vec<TriggerCondition>) -> Self {
        TriggerCondition::Any { any: conditions }
    }

    pub fn negate(condition: TriggerCondition) -> Self {
        TriggerCondition::Not {
            not: Box::new(condition),
        }
    }

    /// Evaluate against the event data. Errors mean the condition could not
    /// be applied to this data; callers treat them as "no match".
    pub fn evaluate(&self, data: &Value) -> WardenResult<bool> {
        match self {
            TriggerCondition::All { all } => {
                for condition in all {
                    if !condition.evaluate(data)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TriggerCondition::Any { any } => {
                for condition in any {
                    if condition.evaluate(data)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TriggerCondition::Not { not } => Ok(!not.evaluate(data)?),
            TriggerCondition::Field(leaf) => leaf.evaluate(data),
        }
    }

    /// Static checks that do not need event data: regexes compile, `in`
    /// operands are arrays, field paths are non-empty.
    pub fn validate(&self) -> WardenResult<()> {
        match self {
            TriggerCondition::All { all } => all.iter().try_for_each(|c| c.validate()),
            TriggerCondition::Any { any } => any.iter().try_for_each(|c| c.validate()),
            TriggerCondition::Not { not } => not.validate(),
            TriggerCondition::Field(leaf) => leaf.validate(),
        }
    }
}

impl FieldCondition {
    fn validate(&self) -> WardenResult<()> {
        if self.field.trim().is_empty() {
            return Err(WardenError::ConditionEvaluation(
                "condition field must not be empty".to_string(),
            ));
        }
        match self.op {
            ConditionOp::In if !self.value.is_array() => Err(self.error("operand must be an array")),
            ConditionOp::Matches => self.regex().map(|_| ()),
            _ => Ok(()),
        }
    }

    fn error(&self, message: &str) -> WardenError {
        WardenError::ConditionEvaluation(format!("'{} {}': {}", self.field, self.op, message))
    }

    fn regex(&self) -> WardenResult<Regex> {
        let pattern = self
            .value
            .as_str()
            .ok_or_else(|| self.error("pattern must be a string"))?;
        Regex::new(pattern).map_err(|e| self.error(&format!("invalid regex: {}", e)))
    }

    fn evaluate(&self, data: &Value) -> WardenResult<bool> {
        let actual = resolve_path(data, &self.field).filter(|v| !v.is_null());

        if self.op == ConditionOp::Exists {
            let expected = self.value.as_bool().unwrap_or(true);
            return Ok(actual.is_some() == expected);
        }

        let actual = match actual {
            Some(v) => v,
            None => return Ok(self.op == ConditionOp::Ne),
        };

        match self.op {
            ConditionOp::Eq => Ok(loose_eq(actual, &self.value)),
            ConditionOp::Ne => Ok(!loose_eq(actual, &self.value)),
            ConditionOp::Gt => Ok(self.compare(actual)? == Ordering::Greater),
            ConditionOp::Gte => Ok(self.compare(actual)? != Ordering::Less),
            ConditionOp::Lt => Ok(self.compare(actual)? == Ordering::Less),
            ConditionOp::Lte => Ok(self.compare(actual)? != Ordering::Greater),
            ConditionOp::In => match &self.value {
                Value::Array(options) => Ok(options.iter().any(|o| loose_eq(actual, o))),
                _ => Err(self.error("operand must be an array")),
            },
            ConditionOp::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => {
                    Ok(haystack.to_lowercase().contains(&needle.to_lowercase()))
                }
                (Value::Array(items), needle) => Ok(items.iter().any(|i| loose_eq(i, needle))),
                _ => Err(self.error("contains needs a string or array field")),
            },
            ConditionOp::Matches => match actual {
                Value::String(s) => Ok(self.regex()?.is_match(s)),
                _ => Err(self.error("matches needs a string field")),
            },
            ConditionOp::Exists => unreachable!("handled above"),
        }
    }

    fn compare(&self, actual: &Value) -> WardenResult<Ordering> {
        match (actual, &self.value) {
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.partial_cmp(&b).ok_or_else(|| self.error("numbers are not comparable"))
            }
            (Value::String(a), Value::String(b)) => {
                match (Severity::parse(a), Severity::parse(b)) {
                    (Some(a), Some(b)) => Ok(a.cmp(&b)),
                    _ => Err(self.error("strings are only ordered when both are severities")),
                }
            }
            _ => Err(self.error(&format!(
                "cannot order {} against {}",
                type_name(actual),
                type_name(&self.value)
            ))),
        }
    }
}

/// JSON equality, with numbers compared by value and severity names compared
/// case-insensitively.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => {
            x == y || (x.eq_ignore_ascii_case(y) && Severity::parse(x).is_some())
        }
        _ => a == b,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

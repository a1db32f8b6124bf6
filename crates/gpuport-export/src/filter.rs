//! Record filter engine.
//!
//! Filters are declared in configuration, compiled once at load time, and
//! evaluated per record. A filter list is a logical AND; evaluation is
//! fail-closed: null fields under ordering or string operators, type
//! mismatches, and non-numeric comparisons exclude the record rather than
//! raising an error. Configuration mistakes (unknown field, missing
//! operand, bad regex) are fatal at compile time instead.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gpuport_core::{GpuInstance, FIELD_NAMES};

use crate::loader::ConfigError;

/// Comparison operator for one filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    In,
    NotIn,
    Regex,
    Contains,
    StartsWith,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Regex => "regex",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }
}

/// One declared filter condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Canonical schema field the condition reads.
    pub field: String,
    pub operator: FilterOperator,
    /// Operand for scalar operators and the regex pattern.
    #[serde(default)]
    pub value: Option<Value>,
    /// Operand for `in` / `not_in`.
    #[serde(default)]
    pub values: Option<Vec<Value>>,
    /// Inclusive bounds for `between`.
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub max: Option<Value>,
}

/// A compiled, ready-to-evaluate filter.
#[derive(Debug, Clone)]
pub struct Filter {
    field: String,
    predicate: Predicate,
}

#[derive(Debug, Clone)]
enum Predicate {
    Eq(Value),
    Ne(Value),
    Ordering { operator: FilterOperator, operand: Value },
    Between { min: Value, max: Value },
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Regex(Regex),
    Contains(String),
    StartsWith(String),
    IsNull,
    IsNotNull,
}

impl Filter {
    /// Validate a declared condition and compile its predicate. Every
    /// violation is a load-time [`ConfigError`].
    pub fn compile(pipeline: &str, config: &FilterConfig) -> Result<Self, ConfigError> {
        if !FIELD_NAMES.contains(&config.field.as_str()) {
            return Err(ConfigError::InvalidField {
                pipeline: pipeline.to_owned(),
                field: config.field.clone(),
            });
        }

        let require_value = |what: &str| -> Result<Value, ConfigError> {
            config.value.clone().ok_or_else(|| ConfigError::MissingRequired {
                pipeline: pipeline.to_owned(),
                detail: format!(
                    "filter on '{}' with operator '{}' requires {what}",
                    config.field,
                    config.operator.as_str()
                ),
            })
        };

        let predicate = match config.operator {
            FilterOperator::Eq => Predicate::Eq(require_value("a value")?),
            FilterOperator::Ne => Predicate::Ne(require_value("a value")?),
            FilterOperator::Lt | FilterOperator::Lte | FilterOperator::Gt | FilterOperator::Gte => {
                Predicate::Ordering {
                    operator: config.operator,
                    operand: require_value("a value")?,
                }
            }
            FilterOperator::Between => {
                let (min, max) = match (config.min.clone(), config.max.clone()) {
                    (Some(min), Some(max)) => (min, max),
                    _ => {
                        return Err(ConfigError::MissingRequired {
                            pipeline: pipeline.to_owned(),
                            detail: format!(
                                "filter on '{}' with operator 'between' requires min and max",
                                config.field
                            ),
                        })
                    }
                };
                Predicate::Between { min, max }
            }
            FilterOperator::In | FilterOperator::NotIn => {
                let values =
                    config
                        .values
                        .clone()
                        .ok_or_else(|| ConfigError::MissingRequired {
                            pipeline: pipeline.to_owned(),
                            detail: format!(
                                "filter on '{}' with operator '{}' requires a values list",
                                config.field,
                                config.operator.as_str()
                            ),
                        })?;
                if config.operator == FilterOperator::In {
                    Predicate::In(values)
                } else {
                    Predicate::NotIn(values)
                }
            }
            FilterOperator::Regex => {
                let pattern = require_value("a pattern")?;
                let pattern = pattern.as_str().ok_or_else(|| ConfigError::InvalidPattern {
                    pipeline: pipeline.to_owned(),
                    pattern: pattern.to_string(),
                    detail: String::from("regex pattern must be a string"),
                })?;
                let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pipeline: pipeline.to_owned(),
                    pattern: pattern.to_owned(),
                    detail: e.to_string(),
                })?;
                Predicate::Regex(regex)
            }
            FilterOperator::Contains | FilterOperator::StartsWith => {
                let operand = require_value("a string value")?;
                let operand = operand.as_str().ok_or_else(|| ConfigError::MissingRequired {
                    pipeline: pipeline.to_owned(),
                    detail: format!(
                        "filter on '{}' with operator '{}' requires a string value",
                        config.field,
                        config.operator.as_str()
                    ),
                })?;
                if config.operator == FilterOperator::Contains {
                    Predicate::Contains(operand.to_owned())
                } else {
                    Predicate::StartsWith(operand.to_owned())
                }
            }
            FilterOperator::IsNull => Predicate::IsNull,
            FilterOperator::IsNotNull => Predicate::IsNotNull,
        };

        Ok(Self {
            field: config.field.clone(),
            predicate,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Evaluate the condition against one record. Any ambiguity excludes
    /// the record.
    pub fn matches(&self, instance: &GpuInstance) -> bool {
        // Field names are validated at compile time; a miss here means the
        // schema itself changed, which still fails closed.
        let Some(actual) = instance.field(&self.field) else {
            return false;
        };

        match &self.predicate {
            Predicate::Eq(expected) => values_equal(&actual, expected),
            Predicate::Ne(expected) => !values_equal(&actual, expected),
            Predicate::Ordering { operator, operand } => {
                compare(&actual, operand).is_some_and(|ordering| match operator {
                    FilterOperator::Lt => ordering.is_lt(),
                    FilterOperator::Lte => ordering.is_le(),
                    FilterOperator::Gt => ordering.is_gt(),
                    FilterOperator::Gte => ordering.is_ge(),
                    _ => false,
                })
            }
            Predicate::Between { min, max } => {
                compare(&actual, min).is_some_and(|o| o.is_ge())
                    && compare(&actual, max).is_some_and(|o| o.is_le())
            }
            Predicate::In(values) => values.iter().any(|v| values_equal(&actual, v)),
            Predicate::NotIn(values) => {
                !actual.is_null() && !values.iter().any(|v| values_equal(&actual, v))
            }
            Predicate::Regex(regex) => actual
                .as_str()
                .is_some_and(|text| regex.find(text).is_some()),
            Predicate::Contains(needle) => {
                actual.as_str().is_some_and(|text| text.contains(needle))
            }
            Predicate::StartsWith(prefix) => {
                actual.as_str().is_some_and(|text| text.starts_with(prefix))
            }
            Predicate::IsNull => actual.is_null(),
            Predicate::IsNotNull => !actual.is_null(),
        }
    }
}

/// Compile every condition of a pipeline.
pub fn compile_filters(pipeline: &str, configs: &[FilterConfig]) -> Result<Vec<Filter>, ConfigError> {
    configs
        .iter()
        .map(|config| Filter::compile(pipeline, config))
        .collect()
}

/// Apply a compiled filter list: logical AND, input order preserved.
pub fn apply_filters(filters: &[Filter], instances: &[GpuInstance]) -> Vec<GpuInstance> {
    instances
        .iter()
        .filter(|instance| filters.iter().all(|f| f.matches(instance)))
        .cloned()
        .collect()
}

/// Equality with integer/float coercion so `price: 1` matches `1.0`.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Ordering over numbers and strings only; mixed or null operands have no
/// ordering.
fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r);
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return Some(l.cmp(r));
    }
    None
}

use crate::core::{Record, Result, UmiError, Value};
use crate::expression::eval_like;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    Less,
    More,
    EqualsOrLess,
    EqualsOrMore,
}

/// How the members of a condition group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMode {
    And,
    Or,
    /// Exactly one member holds.
    Xor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        operator: Operator,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    Group {
        mode: GroupMode,
        conditions: Vec<Condition>,
    },
}

impl Condition {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            operator: Operator::Equals,
            value: value.into(),
        }
    }

    pub fn compare(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::Group {
            mode: GroupMode::And,
            conditions,
        }
    }

    pub fn matches(&self, record: &Record) -> Result<bool> {
        match self {
            Condition::Compare {
                column,
                operator,
                value,
            } => {
                let actual = column_value(record, column);
                // comparisons against NULL never hold, except (not) equality
                if actual.is_null() || value.is_null() {
                    return Ok(match operator {
                        Operator::Equals => actual.is_null() && value.is_null(),
                        Operator::NotEquals => actual.is_null() != value.is_null(),
                        _ => false,
                    });
                }
                let ordering = actual.compare(value)?;
                Ok(match operator {
                    Operator::Equals => ordering == Ordering::Equal,
                    Operator::NotEquals => ordering != Ordering::Equal,
                    Operator::Less => ordering == Ordering::Less,
                    Operator::More => ordering == Ordering::Greater,
                    Operator::EqualsOrLess => ordering != Ordering::Greater,
                    Operator::EqualsOrMore => ordering != Ordering::Less,
                })
            }
            Condition::Like { column, pattern } => match column_value(record, column) {
                Value::Null => Ok(false),
                Value::Text(text) => eval_like(text, pattern, false),
                other => eval_like(&other.to_string(), pattern, false),
            },
            Condition::In { column, values } => {
                let actual = column_value(record, column);
                Ok(!actual.is_null() && values.iter().any(|v| v == actual))
            }
            Condition::Between { column, low, high } => {
                let actual = column_value(record, column);
                if actual.is_null() {
                    return Ok(false);
                }
                Ok(actual.compare(low)? != Ordering::Less
                    && actual.compare(high)? != Ordering::Greater)
            }
            Condition::IsNull { column, negated } => {
                Ok(column_value(record, column).is_null() != *negated)
            }
            Condition::Group { mode, conditions } => {
                if conditions.is_empty() {
                    return Ok(true);
                }
                match mode {
                    GroupMode::And => {
                        for condition in conditions {
                            if !condition.matches(record)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    GroupMode::Or => {
                        for condition in conditions {
                            if condition.matches(record)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    GroupMode::Xor => {
                        let mut held = 0usize;
                        for condition in conditions {
                            if condition.matches(record)? {
                                held += 1;
                            }
                        }
                        Ok(held == 1)
                    }
                }
            }
        }
    }
}

static NULL: Value = Value::Null;

fn column_value<'a>(record: &'a Record, column: &str) -> &'a Value {
    record.get(column).unwrap_or(&NULL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// Left join of `table` on `table.id = <base>.local_column`; joined columns
/// appear as `alias.column`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub local_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub condition: Option<Condition>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub joins: Vec<Join>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            condition: None,
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            joins: Vec::new(),
        }
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => Condition::all(vec![existing, condition]),
            None => condition,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn join(
        mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        local_column: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            table: table.into(),
            alias: alias.into(),
            local_column: local_column.into(),
        });
        self
    }

    /// Same filter and joins, without paging and projection.
    pub fn count_variant(&self) -> Self {
        Self {
            table: self.table.clone(),
            columns: None,
            condition: self.condition.clone(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            joins: self.joins.clone(),
        }
    }
}

pub(crate) fn sort_records(records: &mut [Record], order_by: &[(String, Direction)]) -> Result<()> {
    let mut failure: Option<UmiError> = None;
    records.sort_by(|a, b| {
        for (column, direction) in order_by {
            let ordering = match column_value(a, column).compare(column_value(b, column)) {
                Ok(ordering) => ordering,
                Err(err) => {
                    failure.get_or_insert(err);
                    Ordering::Equal
                }
            };
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

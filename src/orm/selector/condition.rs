use super::Selector;
use crate::core::Value;
use crate::storage::{Condition, Operator};

/// Pending condition on one field; every method hands the selector back.
#[derive(Debug, Clone)]
pub struct FieldCondition {
    selector: Selector,
    field: String,
}

impl FieldCondition {
    pub(crate) fn new(selector: Selector, field: &str) -> Self {
        Self {
            selector,
            field: field.to_string(),
        }
    }

    pub fn equals(self, value: impl Into<Value>) -> Selector {
        self.compare(Operator::Equals, value.into())
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Selector {
        self.compare(Operator::NotEquals, value.into())
    }

    pub fn less(self, value: impl Into<Value>) -> Selector {
        self.compare(Operator::Less, value.into())
    }

    pub fn more(self, value: impl Into<Value>) -> Selector {
        self.compare(Operator::More, value.into())
    }

    pub fn equals_or_less(self, value: impl Into<Value>) -> Selector {
        self.compare(Operator::EqualsOrLess, value.into())
    }

    pub fn equals_or_more(self, value: impl Into<Value>) -> Selector {
        self.compare(Operator::EqualsOrMore, value.into())
    }

    /// SQL wildcards: `%` any run, `_` one character.
    pub fn like(self, pattern: impl Into<String>) -> Selector {
        let pattern = pattern.into();
        self.push(|column| Condition::Like { column, pattern })
    }

    pub fn in_<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Selector {
        let values = values.into_iter().map(Into::into).collect();
        self.push(|column| Condition::In { column, values })
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Selector {
        let (low, high) = (low.into(), high.into());
        self.push(|column| Condition::Between { column, low, high })
    }

    pub fn is_null(self) -> Selector {
        self.push(|column| Condition::IsNull { column, negated: false })
    }

    pub fn is_not_null(self) -> Selector {
        self.push(|column| Condition::IsNull { column, negated: true })
    }

    fn compare(self, operator: Operator, value: Value) -> Selector {
        self.push(|column| Condition::Compare {
            column,
            operator,
            value,
        })
    }

    fn push(self, build: impl FnOnce(String) -> Condition) -> Selector {
        let mut selector = self.selector;
        match selector.column(&self.field) {
            Ok(column) => selector.push_condition(build(column)),
            Err(err) => selector.fail(err),
        }
        selector
    }
}

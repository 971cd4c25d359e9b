/// Name of the root type every collection has.
pub const BASE_TYPE: &str = "base";

/// An object type: a named subset of the collection's fields. Type names are
/// dot-separated paths (`base.news`) and a type inherits the fields of every
/// ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectType {
    name: String,
    fields: Vec<String>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// `base.news.hot` -> `Some("base.news")`.
    pub fn parent_name(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Whether `self` is `other` or descends from it.
    pub fn is_a(&self, other: &str) -> bool {
        self.name == other
            || self
                .name
                .strip_prefix(other)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

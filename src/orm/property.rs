use super::manager::ObjectKey;
use super::metadata::full_name;
use crate::core::Value;

/// One field value of one object.
///
/// `db_value` is what goes to storage; `persisted_db_value` is what storage
/// holds as far as this process knows. Relation properties keep the target
/// id as their db value and cache the resolved object key once prepared.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    name: String,
    locale: Option<String>,
    db_value: Value,
    persisted_db_value: Value,
    related: Option<Option<ObjectKey>>,
    loaded: bool,
    modified: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, locale: Option<String>) -> Self {
        Self {
            name: name.into(),
            locale,
            db_value: Value::Null,
            persisted_db_value: Value::Null,
            related: None,
            loaded: false,
            modified: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn full_name(&self) -> String {
        full_name(&self.name, self.locale.as_deref())
    }

    pub fn db_value(&self) -> &Value {
        &self.db_value
    }

    pub fn persisted_db_value(&self) -> &Value {
        &self.persisted_db_value
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_value_prepared(&self) -> bool {
        self.related.is_some()
    }

    /// Resolved relation target, if prepared.
    pub fn related(&self) -> Option<Option<ObjectKey>> {
        self.related
    }

    /// Fills the property from storage. Local modifications survive.
    pub fn load(&mut self, value: Value) {
        self.persisted_db_value = value.clone();
        if !self.modified {
            self.db_value = value;
            self.related = None;
        }
        self.loaded = true;
    }

    /// Initial value of an object that has not been stored yet.
    pub fn initialize(&mut self, value: Value) {
        self.db_value = value;
        self.loaded = true;
    }

    /// Returns `true` when this call turned the property modified.
    pub fn set_db_value(&mut self, value: Value) -> bool {
        let was_modified = self.modified;
        if self.db_value != value {
            self.related = None;
        }
        self.modified = value != self.persisted_db_value;
        self.db_value = value;
        self.loaded = true;
        !was_modified && self.modified
    }

    pub fn prepare_related(&mut self, target: Option<ObjectKey>) {
        self.related = Some(target);
    }

    /// Promotes the current value to the persisted one.
    pub fn commit(&mut self) {
        self.persisted_db_value = self.db_value.clone();
        self.modified = false;
    }

    pub fn rollback(&mut self) {
        if self.modified {
            self.db_value = self.persisted_db_value.clone();
            self.related = None;
            self.modified = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modification_is_reported_once() {
        let mut property = Property::new("title", None);
        property.load("a".into());
        assert!(property.set_db_value("b".into()));
        assert!(!property.set_db_value("c".into()));
        assert!(property.is_modified());
    }

    #[test]
    fn test_setting_persisted_value_back_clears_modification() {
        let mut property = Property::new("title", None);
        property.load("a".into());
        property.set_db_value("b".into());
        property.set_db_value("a".into());
        assert!(!property.is_modified());
    }

    #[test]
    fn test_commit_and_rollback() {
        let mut property = Property::new("title", Some("en-US".into()));
        assert_eq!(property.full_name(), "title#en-US");
        property.load("a".into());
        property.set_db_value("b".into());
        property.rollback();
        assert_eq!(property.db_value(), &Value::from("a"));

        property.set_db_value("c".into());
        property.commit();
        assert_eq!(property.persisted_db_value(), &Value::from("c"));
        assert!(!property.is_modified());
    }

    #[test]
    fn test_load_keeps_local_changes() {
        let mut property = Property::new("title", None);
        property.load("a".into());
        property.set_db_value("mine".into());
        property.load("theirs".into());
        assert_eq!(property.db_value(), &Value::from("mine"));
        assert_eq!(property.persisted_db_value(), &Value::from("theirs"));
    }
}

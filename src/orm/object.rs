use super::manager::ObjectKey;
use super::metadata::field::{GUID, ID, TYPE, VERSION};
use super::metadata::{CollectionMetadata, Field, FieldType, split_full_name};
use super::property::Property;
use crate::core::{Record, Result, UmiError, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Not stored yet.
    New,
    Persisted,
    /// Stored, with local changes.
    Modified,
    /// Marked for deletion at the next commit.
    Deleted,
    /// Evicted from the object manager; properties are gone.
    Unloaded,
}

/// An object of a collection: a typed bag of properties keyed by full name.
#[derive(Debug, Clone)]
pub struct Object {
    key: ObjectKey,
    metadata: Arc<CollectionMetadata>,
    type_name: String,
    id: Option<i64>,
    guid: String,
    state: ObjectState,
    properties: BTreeMap<String, Property>,
    errors: BTreeMap<String, Vec<String>>,
}

impl Object {
    /// A fresh object of `type_name`, with defaults applied.
    pub fn create(key: ObjectKey, metadata: Arc<CollectionMetadata>, type_name: &str) -> Result<Self> {
        let mut properties = BTreeMap::new();
        for field in metadata.type_fields(type_name)? {
            for locale in property_locales(field) {
                let mut property = Property::new(field.name(), locale.clone());
                property.initialize(field.default_for(locale.as_deref()).clone());
                properties.insert(property.full_name(), property);
            }
        }

        let guid = Uuid::new_v4().to_string();
        let mut object = Self {
            key,
            metadata,
            type_name: type_name.to_string(),
            id: None,
            guid: guid.clone(),
            state: ObjectState::New,
            properties,
            errors: BTreeMap::new(),
        };
        object.set_internal(GUID, Value::Text(guid))?;
        object.set_internal(TYPE, Value::Text(type_name.to_string()))?;
        object.set_internal(VERSION, Value::Integer(1))?;
        Ok(object)
    }

    /// Builds a stored object from a row. Columns absent from the row stay
    /// unloaded.
    pub fn hydrate(key: ObjectKey, metadata: Arc<CollectionMetadata>, record: &Record) -> Result<Self> {
        let type_column = metadata.field(TYPE)?.column_for(None)?;
        let type_name = record
            .get(type_column)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                UmiError::UnexpectedValue(format!(
                    "Row of collection '{}' has no object type",
                    metadata.name()
                ))
            })?
            .to_string();
        let id = record
            .get(metadata.field(ID)?.column_for(None)?)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                UmiError::UnexpectedValue(format!(
                    "Row of collection '{}' has no identifier",
                    metadata.name()
                ))
            })?;
        let guid = record
            .get(metadata.field(GUID)?.column_for(None)?)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut properties = BTreeMap::new();
        for field in metadata.type_fields(&type_name)? {
            for locale in property_locales(field) {
                let mut property = Property::new(field.name(), locale.clone());
                if let Some(value) = record.get(field.column_for(locale.as_deref())?) {
                    property.load(value.clone());
                }
                properties.insert(property.full_name(), property);
            }
        }

        Ok(Self {
            key,
            metadata,
            type_name,
            id: Some(id),
            guid,
            state: ObjectState::Persisted,
            properties,
            errors: BTreeMap::new(),
        })
    }

    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn metadata(&self) -> &Arc<CollectionMetadata> {
        &self.metadata
    }

    pub fn collection_name(&self) -> &str {
        self.metadata.name()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn version(&self) -> i64 {
        self.properties
            .get(VERSION)
            .and_then(|p| p.db_value().as_i64())
            .unwrap_or(0)
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.state == ObjectState::New
    }

    pub fn is_modified(&self) -> bool {
        self.state == ObjectState::Modified
    }

    pub fn is_deleted(&self) -> bool {
        self.state == ObjectState::Deleted
    }

    pub fn has_property(&self, full_name: &str) -> bool {
        self.properties.contains_key(full_name)
    }

    pub fn property(&self, full_name: &str) -> Result<&Property> {
        self.properties.get(full_name).ok_or_else(|| {
            UmiError::NonexistentEntity(format!(
                "Property '{}' does not exist in object of type '{}' of collection '{}'",
                full_name,
                self.type_name,
                self.metadata.name()
            ))
        })
    }

    fn property_mut(&mut self, full_name: &str) -> Result<&mut Property> {
        match self.properties.get_mut(full_name) {
            Some(property) => Ok(property),
            None => Err(UmiError::NonexistentEntity(format!(
                "Property '{}' does not exist in object of type '{}' of collection '{}'",
                full_name,
                self.type_name,
                self.metadata.name()
            ))),
        }
    }

    pub fn field(&self, full_name: &str) -> Result<&Field> {
        self.property(full_name)?;
        self.metadata.field(split_full_name(full_name).0)
    }

    pub fn column_of(&self, full_name: &str) -> Result<String> {
        let (_, locale) = split_full_name(full_name);
        Ok(self.field(full_name)?.column_for(locale)?.to_string())
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn loaded_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values().filter(|p| p.is_loaded())
    }

    /// Full names of properties that still have to be fetched from storage.
    pub fn unloaded_names(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, p)| !p.is_loaded())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn value(&self, full_name: &str) -> Result<&Value> {
        let property = self.property(full_name)?;
        if !property.is_loaded() {
            return Err(UmiError::Runtime(format!(
                "Property '{}' of object '{}' is not loaded",
                full_name, self.guid
            )));
        }
        Ok(property.db_value())
    }

    pub fn load_property(&mut self, full_name: &str, value: Value) -> Result<()> {
        self.property_mut(full_name)?.load(value);
        Ok(())
    }

    /// Loads every column present in `record`; modified values survive.
    pub fn refresh(&mut self, record: &Record) -> Result<()> {
        self.load_columns(record, false)
    }

    /// Loads only properties that are not loaded yet.
    pub fn fill_unloaded(&mut self, record: &Record) -> Result<()> {
        self.load_columns(record, true)
    }

    fn load_columns(&mut self, record: &Record, unloaded_only: bool) -> Result<()> {
        let columns: Vec<(String, String)> = self
            .properties
            .iter()
            .filter(|(_, p)| !unloaded_only || !p.is_loaded())
            .map(|(name, _)| Ok((name.clone(), self.column_of(name)?)))
            .collect::<Result<_>>()?;
        for (name, column) in columns {
            if let Some(value) = record.get(&column) {
                self.property_mut(&name)?.load(value.clone());
            }
        }
        Ok(())
    }

    /// User-facing setter. Returns `true` when this call made a stored
    /// object modified.
    pub fn set_value(&mut self, full_name: &str, value: Value) -> Result<bool> {
        self.ensure_alive()?;
        let field = self.field(full_name)?;
        if field.is_read_only() {
            return Err(UmiError::ReadOnlyEntity(format!(
                "Property '{}' of collection '{}' is read only",
                full_name,
                self.metadata.name()
            )));
        }
        if let Some(data_type) = field.field_type().data_type()
            && !data_type.is_compatible(&value)
        {
            return Err(UmiError::UnexpectedValue(format!(
                "Property '{}' expects {}, got {}",
                full_name,
                data_type,
                value.type_name()
            )));
        }
        self.set_internal(full_name, value)
    }

    /// Setter for values the ORM maintains itself.
    pub(crate) fn set_internal(&mut self, full_name: &str, value: Value) -> Result<bool> {
        let became_modified = self.property_mut(full_name)?.set_db_value(value);
        if became_modified && self.state == ObjectState::Persisted {
            self.state = ObjectState::Modified;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn prepare_related(&mut self, full_name: &str, target: Option<ObjectKey>) -> Result<()> {
        self.property_mut(full_name)?.prepare_related(target);
        Ok(())
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        match self.state {
            ObjectState::Deleted | ObjectState::Unloaded => Err(UmiError::NotAllowedOperation(format!(
                "Object '{}' of collection '{}' is {}",
                self.guid,
                self.metadata.name(),
                if self.state == ObjectState::Deleted { "deleted" } else { "unloaded" }
            ))),
            _ => Ok(()),
        }
    }

    /// Runs field validators over loaded properties and keeps the messages.
    pub fn validate(&mut self) -> bool {
        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, property) in &self.properties {
            if !property.is_loaded() {
                continue;
            }
            let Ok(field) = self.metadata.field(property.name()) else {
                continue;
            };
            for validator in field.validators() {
                let message = match validator.check(property.db_value()) {
                    Ok(message) => message,
                    Err(err) => Some(err.to_string()),
                };
                if let Some(message) = message {
                    errors.entry(name.clone()).or_default().push(message);
                }
            }
        }
        self.errors = errors;
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    /// Storage now matches memory.
    pub fn set_consistent(&mut self) {
        for property in self.properties.values_mut() {
            property.commit();
        }
        self.errors.clear();
        if self.state != ObjectState::Unloaded {
            self.state = ObjectState::Persisted;
        }
    }

    /// Drops local changes.
    pub fn rollback(&mut self) {
        for property in self.properties.values_mut() {
            property.rollback();
        }
        self.errors.clear();
        if matches!(self.state, ObjectState::Modified | ObjectState::Deleted) {
            self.state = ObjectState::Persisted;
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = ObjectState::Deleted;
    }

    pub(crate) fn unload(&mut self) {
        self.properties.clear();
        self.errors.clear();
        self.state = ObjectState::Unloaded;
    }

    pub(crate) fn assign_id(&mut self, id: i64) -> Result<()> {
        self.id = Some(id);
        self.property_mut(ID)?.load(Value::Integer(id));
        Ok(())
    }

    /// Column values for an INSERT.
    pub fn insert_record(&self) -> Result<Record> {
        let mut record = Record::new();
        for (name, property) in &self.properties {
            if property.name() == ID || !property.is_loaded() {
                continue;
            }
            if self.field(name)?.field_type().data_type().is_none() {
                continue;
            }
            record.insert(self.column_of(name)?, property.db_value().clone());
        }
        Ok(record)
    }

    /// Changed column values for an UPDATE.
    pub fn modified_columns(&self) -> Result<Vec<(String, Value)>> {
        self.properties
            .iter()
            .filter(|(_, p)| p.is_modified())
            .map(|(name, p)| Ok((self.column_of(name)?, p.db_value().clone())))
            .collect()
    }

    /// Relation properties pointing at objects that were not stored yet.
    pub(crate) fn pending_relations(&self) -> Vec<(String, ObjectKey)> {
        self.properties
            .iter()
            .filter(|(_, p)| p.db_value().is_null())
            .filter_map(|(name, p)| match p.related() {
                Some(Some(target)) => Some((name.clone(), target)),
                _ => None,
            })
            .collect()
    }

    pub fn field_of_type(&self, predicate: impl Fn(&FieldType) -> bool) -> Option<&Field> {
        self.metadata
            .field_of_type(predicate)
            .filter(|field| self.properties.contains_key(field.name()))
    }
}

fn property_locales(field: &Field) -> Vec<Option<String>> {
    if matches!(field.field_type(), FieldType::HasMany { .. }) {
        return Vec::new();
    }
    if field.is_localized() {
        field.locales().map(|l| Some(l.to_string())).collect()
    } else {
        vec![None]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionKind;
    use crate::orm::metadata::{Localization, Validator};

    fn news() -> Arc<CollectionMetadata> {
        CollectionMetadata::builder("news", CollectionKind::Simple)
            .field(Field::new("title", FieldType::String).validator(Validator::Required))
            .field(
                Field::new("teaser", FieldType::Text)
                    .localize("en-US", Localization { column: "teaser_en".into(), default: Value::Null })
                    .localize("ru-RU", Localization { column: "teaser_ru".into(), default: Value::Null }),
            )
            .object_type("base", &["title", "teaser"])
            .with_system_fields()
            .build()
            .unwrap()
    }

    fn stored() -> Object {
        let record: Record = [
            ("id", Value::Integer(7)),
            ("guid", Value::from("g-7")),
            ("type", Value::from("base")),
            ("version", Value::Integer(3)),
            ("title", Value::from("Hello")),
            ("teaser_en", Value::from("Hi")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Object::hydrate(ObjectKey::new(1), news(), &record).unwrap()
    }

    #[test]
    fn test_create_applies_defaults_and_system_values() {
        let object = Object::create(ObjectKey::new(1), news(), "base").unwrap();
        assert!(object.is_new());
        assert_eq!(object.version(), 1);
        assert_eq!(object.value("type").unwrap(), &Value::from("base"));
        assert!(object.has_property("teaser#ru-RU"));
        assert!(!object.has_property("teaser"));
    }

    #[test]
    fn test_hydrate_leaves_missing_columns_unloaded() {
        let object = stored();
        assert_eq!(object.id(), Some(7));
        assert_eq!(object.unloaded_names(), vec!["teaser#ru-RU".to_string()]);
        assert!(object.value("teaser#ru-RU").is_err());
    }

    #[test]
    fn test_first_change_marks_object_modified_once() {
        let mut object = stored();
        assert!(object.set_value("title", "Bye".into()).unwrap());
        assert!(!object.set_value("title", "Again".into()).unwrap());
        assert!(object.is_modified());
        assert_eq!(object.modified_columns().unwrap(), vec![("title".to_string(), Value::from("Again"))]);
    }

    #[test]
    fn test_read_only_and_type_checks() {
        let mut object = stored();
        assert!(matches!(
            object.set_value("version", 9.into()),
            Err(UmiError::ReadOnlyEntity(_))
        ));
        assert!(matches!(
            object.set_value("title", 9.into()),
            Err(UmiError::UnexpectedValue(_))
        ));
    }

    #[test]
    fn test_validate_and_rollback() {
        let mut object = stored();
        object.set_value("title", "".into()).unwrap();
        assert!(!object.validate());
        assert!(object.errors().contains_key("title"));

        object.rollback();
        assert!(!object.is_modified());
        assert_eq!(object.value("title").unwrap(), &Value::from("Hello"));
        assert!(object.validate());
    }
}

use super::metadata::CollectionMetadata;
use super::object::Object;
use crate::core::{Record, Result, UmiError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Handle of a loaded object. Stable for as long as the object stays in
/// the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(u64);

impl ObjectKey {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity map: at most one in-memory object per stored row.
#[derive(Debug, Default)]
pub struct ObjectManager {
    next_key: u64,
    objects: BTreeMap<ObjectKey, Object>,
    by_id: HashMap<(String, i64), ObjectKey>,
    by_guid: HashMap<String, ObjectKey>,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn allocate(&mut self) -> ObjectKey {
        self.next_key += 1;
        ObjectKey(self.next_key)
    }

    pub fn create(&mut self, metadata: Arc<CollectionMetadata>, type_name: &str) -> Result<ObjectKey> {
        let key = self.allocate();
        let object = Object::create(key, metadata, type_name)?;
        self.by_guid.insert(object.guid().to_string(), key);
        self.objects.insert(key, object);
        Ok(key)
    }

    /// Returns the existing object for the row if one is loaded, filling in
    /// columns it has not loaded yet. Loaded values are never replaced, so
    /// the version an object was read with stays the expected one.
    pub fn hydrate(&mut self, metadata: &Arc<CollectionMetadata>, record: &Record) -> Result<ObjectKey> {
        let key = self.allocate();
        let object = Object::hydrate(key, Arc::clone(metadata), record)?;
        if let Some(existing) = self.find_by_id(metadata.name(), object.id().unwrap_or_default()) {
            self.get_mut(existing)?.fill_unloaded(record)?;
            return Ok(existing);
        }
        self.index(&object);
        self.objects.insert(key, object);
        Ok(key)
    }

    fn index(&mut self, object: &Object) {
        if let Some(id) = object.id() {
            self.by_id
                .insert((object.collection_name().to_string(), id), object.key());
        }
        self.by_guid.insert(object.guid().to_string(), object.key());
    }

    /// Called once a new object received its identifier.
    pub(crate) fn register_id(&mut self, key: ObjectKey, id: i64) -> Result<()> {
        let object = self.get_mut(key)?;
        object.assign_id(id)?;
        let collection = object.collection_name().to_string();
        self.by_id.insert((collection, id), key);
        Ok(())
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.objects.contains_key(&key)
    }

    pub fn get(&self, key: ObjectKey) -> Result<&Object> {
        self.objects
            .get(&key)
            .ok_or_else(|| UmiError::NonexistentEntity(format!("Object {} is not loaded", key)))
    }

    pub fn get_mut(&mut self, key: ObjectKey) -> Result<&mut Object> {
        self.objects
            .get_mut(&key)
            .ok_or_else(|| UmiError::NonexistentEntity(format!("Object {} is not loaded", key)))
    }

    pub fn find_by_id(&self, collection: &str, id: i64) -> Option<ObjectKey> {
        self.by_id.get(&(collection.to_string(), id)).copied()
    }

    pub fn find_by_guid(&self, guid: &str) -> Option<ObjectKey> {
        self.by_guid.get(guid).copied()
    }

    /// Keys of every loaded object of a collection.
    pub fn keys_of(&self, collection: &str) -> Vec<ObjectKey> {
        self.objects
            .values()
            .filter(|o| o.collection_name() == collection)
            .map(Object::key)
            .collect()
    }

    /// Evicts an object; its key becomes dangling.
    pub fn unload(&mut self, key: ObjectKey) -> Result<()> {
        let mut object = self
            .objects
            .remove(&key)
            .ok_or_else(|| UmiError::NonexistentEntity(format!("Object {} is not loaded", key)))?;
        if let Some(id) = object.id() {
            self.by_id.remove(&(object.collection_name().to_string(), id));
        }
        self.by_guid.remove(object.guid());
        object.unload();
        Ok(())
    }

    pub fn unload_all(&mut self) {
        self.objects.clear();
        self.by_id.clear();
        self.by_guid.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionKind;
    use crate::core::Value;
    use crate::orm::metadata::{Field, FieldType};

    fn news() -> Arc<CollectionMetadata> {
        CollectionMetadata::builder("news", CollectionKind::Simple)
            .field(Field::new("title", FieldType::String))
            .object_type("base", &["title"])
            .with_system_fields()
            .build()
            .unwrap()
    }

    fn row(id: i64, title: Option<&str>) -> Record {
        let mut record: Record = [
            ("id", Value::Integer(id)),
            ("guid", Value::from(format!("g-{}", id))),
            ("type", Value::from("base")),
            ("version", Value::Integer(1)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        if let Some(title) = title {
            record.insert("title".into(), title.into());
        }
        record
    }

    #[test]
    fn test_hydrate_deduplicates_by_identity() {
        let metadata = news();
        let mut manager = ObjectManager::new();
        let first = manager.hydrate(&metadata, &row(1, None)).unwrap();
        let second = manager.hydrate(&metadata, &row(1, Some("late"))).unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(first).unwrap().value("title").unwrap(), &Value::from("late"));
        assert_eq!(manager.find_by_guid("g-1"), Some(first));
    }

    #[test]
    fn test_unload_evicts_from_indices() {
        let metadata = news();
        let mut manager = ObjectManager::new();
        let key = manager.hydrate(&metadata, &row(1, Some("a"))).unwrap();
        manager.unload(key).unwrap();
        assert!(manager.get(key).is_err());
        assert!(manager.find_by_id("news", 1).is_none());
        assert!(manager.unload(key).is_err());
    }

    #[test]
    fn test_created_objects_are_indexed_after_id_assignment() {
        let metadata = news();
        let mut manager = ObjectManager::new();
        let key = manager.create(metadata, "base").unwrap();
        assert!(manager.find_by_id("news", 5).is_none());
        manager.register_id(key, 5).unwrap();
        assert_eq!(manager.find_by_id("news", 5), Some(key));
        assert_eq!(manager.get(key).unwrap().id(), Some(5));
    }
}

use crate::config::{CollectionConfig, CollectionKind, FrameworkSettings};
use crate::core::{Record, Result, UmiError, Value};
use crate::orm::hierarchy::HierarchicCollection;
use crate::orm::manager::{ObjectKey, ObjectManager};
use crate::orm::metadata::field::{GUID, ID};
use crate::orm::metadata::{CollectionMetadata, FieldType, MetadataRegistry, split_full_name};
use crate::orm::object::Object;
use crate::orm::persister::{CommitReport, ObjectPersister};
use crate::orm::selector::Selector;
use crate::storage::ConnectionRegistry;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point of the ORM: collections, the identity map and the unit of
/// work of one request or job.
///
/// An `Orm` is single-threaded state; give each request its own instance
/// over a shared [`ConnectionRegistry`].
#[derive(Debug)]
pub struct Orm {
    metadata: MetadataRegistry,
    connections: ConnectionRegistry,
    manager: ObjectManager,
    persister: ObjectPersister,
    default_locale: String,
    current_locale: String,
}

impl Orm {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self::with_connections(ConnectionRegistry::new(), default_locale)
    }

    pub fn with_connections(connections: ConnectionRegistry, default_locale: impl Into<String>) -> Self {
        let default_locale = default_locale.into();
        Self {
            metadata: MetadataRegistry::new(),
            connections,
            manager: ObjectManager::new(),
            persister: ObjectPersister::new(),
            current_locale: default_locale.clone(),
            default_locale,
        }
    }

    pub fn from_settings(settings: &FrameworkSettings) -> Self {
        Self::new(settings.default_locale.clone())
    }

    /// A fresh unit of work over the same collections and connections.
    pub fn session(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            connections: self.connections.clone(),
            manager: ObjectManager::new(),
            persister: ObjectPersister::new(),
            default_locale: self.default_locale.clone(),
            current_locale: self.default_locale.clone(),
        }
    }

    pub fn register_collection(&mut self, metadata: Arc<CollectionMetadata>) -> Result<()> {
        self.connections.get(metadata.connection())?;
        for field in metadata.fields() {
            if let FieldType::BelongsTo { target } | FieldType::HasMany { target, .. } =
                field.field_type()
                && target != metadata.name()
                && self.metadata.get(target).is_err()
            {
                debug!(
                    collection = metadata.name(),
                    target = target.as_str(),
                    "relation target is not registered yet"
                );
            }
        }
        self.metadata.register(metadata)
    }

    pub fn load_collections(&mut self, configs: Vec<CollectionConfig>) -> Result<()> {
        for config in configs {
            self.register_collection(CollectionMetadata::from_config(config)?)?;
        }
        Ok(())
    }

    /// Creates missing tables. Returns how many were created.
    pub fn install(&self) -> Result<usize> {
        let mut created = 0;
        for metadata in self.metadata.collections() {
            let database = self.connections.get(metadata.connection())?;
            if !database.has_table(metadata.table())? {
                database.create_table(metadata.table_schema())?;
                info!(collection = metadata.name(), table = metadata.table(), "table created");
                created += 1;
            }
        }
        Ok(created)
    }

    pub fn metadata(&self, collection: &str) -> Result<Arc<CollectionMetadata>> {
        self.metadata.get(collection)
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn persister(&self) -> &ObjectPersister {
        &self.persister
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn current_locale(&self) -> &str {
        &self.current_locale
    }

    pub fn set_current_locale(&mut self, locale: impl Into<String>) {
        self.current_locale = locale.into();
    }

    fn locales(&self) -> Vec<&str> {
        vec![self.current_locale.as_str(), self.default_locale.as_str()]
    }

    pub fn object(&self, key: ObjectKey) -> Result<&Object> {
        self.manager.get(key)
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.manager.contains(key)
    }

    /// Creates a new object in a simple collection.
    pub fn add(&mut self, collection: &str, type_name: &str) -> Result<ObjectKey> {
        let metadata = self.metadata(collection)?;
        if metadata.kind() == CollectionKind::Hierarchic {
            return Err(UmiError::NotAllowedOperation(format!(
                "Objects of hierarchic collection '{}' are added with a parent and a slug",
                collection
            )));
        }
        self.create(metadata, type_name)
    }

    pub(crate) fn create(&mut self, metadata: Arc<CollectionMetadata>, type_name: &str) -> Result<ObjectKey> {
        let key = self.manager.create(metadata, type_name)?;
        self.persister.mark_new(key);
        Ok(key)
    }

    pub fn get_by_id(&mut self, collection: &str, id: i64) -> Result<ObjectKey> {
        if let Some(key) = self.manager.find_by_id(collection, id) {
            return Ok(key);
        }
        self.find_one(collection, ID, Value::Integer(id))?
            .ok_or_else(|| {
                UmiError::NonexistentEntity(format!(
                    "Object with id {} does not exist in collection '{}'",
                    id, collection
                ))
            })
    }

    pub fn get_by_guid(&mut self, collection: &str, guid: &str) -> Result<ObjectKey> {
        if let Some(key) = self.manager.find_by_guid(guid) {
            let object = self.manager.get(key)?;
            if object.collection_name() != collection {
                return Err(UmiError::NotAllowedOperation(format!(
                    "Object '{}' does not belong to collection '{}'",
                    guid, collection
                )));
            }
            return Ok(key);
        }
        self.find_one(collection, GUID, Value::from(guid))?
            .ok_or_else(|| {
                UmiError::NonexistentEntity(format!(
                    "Object with guid '{}' does not exist in collection '{}'",
                    guid, collection
                ))
            })
    }

    fn find_one(&mut self, collection: &str, field: &str, value: Value) -> Result<Option<ObjectKey>> {
        let selector = self.select(collection)?.filter(field).equals(value).limit(1);
        selector.result(self)?.fetch(self)
    }

    pub fn select(&self, collection: &str) -> Result<Selector> {
        Ok(Selector::new(
            self.metadata(collection)?,
            vec![self.current_locale.clone(), self.default_locale.clone()],
        ))
    }

    /// Property value by name; localized fields named without a locale use
    /// the current locale. Unloaded properties are fetched on demand.
    pub fn get(&mut self, key: ObjectKey, name: &str) -> Result<Value> {
        let full_name = self.full_name(key, name)?;
        self.ensure_loaded(key, &full_name)?;
        Ok(self.manager.get(key)?.value(&full_name)?.clone())
    }

    pub fn set(&mut self, key: ObjectKey, name: &str, value: impl Into<Value>) -> Result<()> {
        let full_name = self.full_name(key, name)?;
        let object = self.manager.get(key)?;
        if object.metadata().is_hierarchic()
            && matches!(
                object.field(&full_name)?.field_type(),
                FieldType::Parent | FieldType::Slug
            )
        {
            return Err(UmiError::NotAllowedOperation(format!(
                "Property '{}' of hierarchic collection '{}' changes through move or slug change",
                full_name,
                object.collection_name()
            )));
        }
        self.ensure_loaded(key, &full_name)?;
        if self.manager.get_mut(key)?.set_value(&full_name, value.into())? {
            self.persister.mark_modified(key);
        }
        Ok(())
    }

    /// Target of a belongs-to relation, loaded on first access.
    pub fn related(&mut self, key: ObjectKey, field: &str) -> Result<Option<ObjectKey>> {
        self.ensure_loaded(key, field)?;
        let object = self.manager.get(key)?;
        let target_collection = relation_target(object, field)?;
        let property = object.property(field)?;
        if let Some(prepared) = property.related()
            && prepared.is_none_or(|target| self.manager.contains(target))
        {
            return Ok(prepared);
        }
        let Some(target_id) = property.db_value().as_i64() else {
            return Ok(None);
        };
        let target = self.get_by_id(&target_collection, target_id)?;
        self.manager.get_mut(key)?.prepare_related(field, Some(target))?;
        Ok(Some(target))
    }

    pub fn set_related(&mut self, key: ObjectKey, field: &str, target: Option<ObjectKey>) -> Result<()> {
        let object = self.manager.get(key)?;
        let target_collection = relation_target(object, field)?;
        if matches!(object.field(field)?.field_type(), FieldType::Parent) {
            return Err(UmiError::NotAllowedOperation(format!(
                "Parent of an object of '{}' changes through move",
                object.collection_name()
            )));
        }
        let value = match target {
            None => Value::Null,
            Some(target) => {
                let target_object = self.manager.get(target)?;
                if target_object.collection_name() != target_collection {
                    return Err(UmiError::NotAllowedOperation(format!(
                        "Relation '{}' expects an object of '{}', got one of '{}'",
                        field,
                        target_collection,
                        target_object.collection_name()
                    )));
                }
                match target_object.id() {
                    Some(id) => Value::Integer(id),
                    None if object.is_new() => Value::Null,
                    None => {
                        return Err(UmiError::NotAllowedOperation(format!(
                            "Object '{}' must be committed before it is referenced",
                            target_object.guid()
                        )));
                    }
                }
            }
        };
        self.ensure_loaded(key, field)?;
        let object = self.manager.get_mut(key)?;
        let became_modified = object.set_value(field, value)?;
        object.prepare_related(field, target)?;
        if became_modified {
            self.persister.mark_modified(key);
        }
        Ok(())
    }

    /// Objects of the target collection pointing back at this object.
    pub fn has_many(&mut self, key: ObjectKey, field: &str) -> Result<Vec<ObjectKey>> {
        let object = self.manager.get(key)?;
        let FieldType::HasMany { target, target_field } = object.metadata().field(field)?.field_type().clone()
        else {
            return Err(UmiError::NotAllowedOperation(format!(
                "Field '{}' of collection '{}' is not a has-many relation",
                field,
                object.collection_name()
            )));
        };
        let Some(id) = object.id() else {
            return Ok(Vec::new());
        };
        let selector = self.select(&target)?.filter(&target_field).equals(id);
        selector.result(self)?.keys(self)
    }

    /// Marks an object for deletion; in hierarchic collections the whole
    /// subtree goes with it.
    pub fn delete(&mut self, collection: &str, key: ObjectKey) -> Result<()> {
        let object = self.manager.get(key)?;
        self.check_membership(object, collection)?;
        object.ensure_alive()?;

        let mut doomed = Vec::new();
        if object.metadata().is_hierarchic() && !object.is_new() {
            doomed = self.hierarchy(collection)?.descendants(key)?;
        }
        doomed.push(key);
        for key in doomed {
            if self.persister.mark_deleted(key) {
                self.manager.unload(key)?;
            } else {
                self.manager.get_mut(key)?.mark_deleted();
            }
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<CommitReport> {
        self.persister.commit(&mut self.manager, &self.connections)
    }

    /// Forgets new objects and reverts pending modifications and deletions.
    pub fn rollback(&mut self) -> Result<()> {
        for key in self.persister.new_objects().clone() {
            self.manager.unload(key)?;
        }
        let pending = self
            .persister
            .modified_objects()
            .iter()
            .chain(self.persister.deleted_objects())
            .copied()
            .collect::<Vec<_>>();
        for key in pending {
            self.manager.get_mut(key)?.rollback();
        }
        self.persister.clear();
        Ok(())
    }

    pub fn unload(&mut self, key: ObjectKey) -> Result<()> {
        if self.persister.is_pending(key) {
            return Err(UmiError::NotAllowedOperation(format!(
                "Object {} has uncommitted changes",
                key
            )));
        }
        self.manager.unload(key)
    }

    pub fn unload_all(&mut self) -> Result<()> {
        if !self.persister.is_empty() {
            return Err(UmiError::NotAllowedOperation(
                "Cannot unload objects with uncommitted changes".to_string(),
            ));
        }
        self.manager.unload_all();
        Ok(())
    }

    pub fn hierarchy(&mut self, collection: &str) -> Result<HierarchicCollection<'_>> {
        let metadata = self.metadata(collection)?;
        if !metadata.is_hierarchic() {
            return Err(UmiError::NotAllowedOperation(format!(
                "Collection '{}' is not hierarchic",
                collection
            )));
        }
        Ok(HierarchicCollection::new(self, metadata))
    }

    pub(crate) fn check_membership(&self, object: &Object, collection: &str) -> Result<()> {
        if object.collection_name() != collection {
            return Err(UmiError::NotAllowedOperation(format!(
                "Object '{}' belongs to collection '{}', not '{}'",
                object.guid(),
                object.collection_name(),
                collection
            )));
        }
        Ok(())
    }

    pub(crate) fn hydrate(&mut self, metadata: &Arc<CollectionMetadata>, record: &Record) -> Result<ObjectKey> {
        self.manager.hydrate(metadata, record)
    }

    pub(crate) fn prepare_related(&mut self, key: ObjectKey, field: &str, target: Option<ObjectKey>) -> Result<()> {
        let object = self.manager.get_mut(key)?;
        if object.has_property(field) && !object.property(field)?.is_modified() {
            object.prepare_related(field, target)?;
        }
        Ok(())
    }

    pub(crate) fn manager(&self) -> &ObjectManager {
        &self.manager
    }

    pub(crate) fn manager_mut(&mut self) -> &mut ObjectManager {
        &mut self.manager
    }

    fn full_name(&self, key: ObjectKey, name: &str) -> Result<String> {
        let object = self.manager.get(key)?;
        let full_name = object.metadata().full_name_for(name, &self.locales())?;
        object.property(&full_name)?;
        Ok(full_name)
    }

    /// Fetches every unloaded property of a stored object when `full_name`
    /// is one of them.
    fn ensure_loaded(&mut self, key: ObjectKey, full_name: &str) -> Result<()> {
        let object = self.manager.get(key)?;
        object.ensure_alive()?;
        if object.is_new() || object.property(full_name)?.is_loaded() {
            return Ok(());
        }
        let metadata = Arc::clone(object.metadata());
        let id = object.id().ok_or_else(|| {
            UmiError::Runtime(format!("Object '{}' has no identifier", object.guid()))
        })?;
        let names = object.unloaded_names();
        let row = self
            .connections
            .get(metadata.connection())?
            .find(metadata.table(), id)?
            .ok_or_else(|| {
                UmiError::NonexistentEntity(format!(
                    "Object with id {} no longer exists in collection '{}'",
                    id,
                    metadata.name()
                ))
            })?;
        debug!(collection = metadata.name(), id, properties = names.len(), "lazy load");

        let object = self.manager.get_mut(key)?;
        for name in names {
            let (field, locale) = split_full_name(&name);
            let column = metadata.field(field)?.column_for(locale)?;
            if let Some(value) = row.get(column) {
                object.load_property(&name, value.clone())?;
            }
        }
        Ok(())
    }
}

fn relation_target(object: &Object, field: &str) -> Result<String> {
    match object.field(field)?.field_type() {
        FieldType::BelongsTo { target } => Ok(target.clone()),
        FieldType::Parent => Ok(object.collection_name().to_string()),
        _ => Err(UmiError::NotAllowedOperation(format!(
            "Field '{}' of collection '{}' is not a belongs-to relation",
            field,
            object.collection_name()
        ))),
    }
}

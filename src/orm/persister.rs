use super::manager::{ObjectKey, ObjectManager};
use super::metadata::field::{LEVEL, MPATH, PARENT, SLUG, URI, VERSION};
use super::metadata::FieldType;
use super::object::Object;
use crate::core::{Result, UmiError, Value};
use crate::storage::{Assignment, Condition, ConnectionRegistry, Database, PRIMARY_KEY, Transaction};
use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

lazy_static::lazy_static! {
    static ref FORMULA_PLACEHOLDER: Regex =
        Regex::new(r"\{([A-Za-z0-9_#.-]+)\}").unwrap_or_else(|_| unreachable!());
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Unit of work: objects waiting to be inserted, updated or deleted.
/// The three sets never share a key.
#[derive(Debug, Default)]
pub struct ObjectPersister {
    new: BTreeSet<ObjectKey>,
    modified: BTreeSet<ObjectKey>,
    deleted: BTreeSet<ObjectKey>,
}

/// In-memory effects of a commit, applied only once every connection
/// has committed.
#[derive(Default)]
struct Outcome {
    inserted: Vec<(ObjectKey, i64, Vec<(String, Value)>)>,
    updated: Vec<(ObjectKey, Vec<(String, Value)>)>,
    deleted: Vec<ObjectKey>,
    child_counts: Vec<(String, String, i64, i64)>,
}

impl ObjectPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_new(&mut self, key: ObjectKey) {
        self.modified.remove(&key);
        self.deleted.remove(&key);
        self.new.insert(key);
    }

    pub fn mark_modified(&mut self, key: ObjectKey) {
        if !self.new.contains(&key) && !self.deleted.contains(&key) {
            self.modified.insert(key);
        }
    }

    /// Returns `true` if the object was new and is simply forgotten.
    pub fn mark_deleted(&mut self, key: ObjectKey) -> bool {
        if self.new.remove(&key) {
            return true;
        }
        self.modified.remove(&key);
        self.deleted.insert(key);
        false
    }

    pub fn clear_new(&mut self) {
        self.new.clear();
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }

    pub fn clear_deleted(&mut self) {
        self.deleted.clear();
    }

    pub fn clear(&mut self) {
        self.clear_new();
        self.clear_modified();
        self.clear_deleted();
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn is_pending(&self, key: ObjectKey) -> bool {
        self.new.contains(&key) || self.modified.contains(&key) || self.deleted.contains(&key)
    }

    pub fn new_objects(&self) -> &BTreeSet<ObjectKey> {
        &self.new
    }

    pub fn modified_objects(&self) -> &BTreeSet<ObjectKey> {
        &self.modified
    }

    pub fn deleted_objects(&self) -> &BTreeSet<ObjectKey> {
        &self.deleted
    }

    /// Validates, then writes every pending object in one transaction per
    /// touched connection. On failure all connections roll back and no
    /// object changes in memory.
    pub fn commit(
        &mut self,
        manager: &mut ObjectManager,
        connections: &ConnectionRegistry,
    ) -> Result<CommitReport> {
        let span = info_span!(
            "commit",
            new = self.new.len(),
            modified = self.modified.len(),
            deleted = self.deleted.len()
        );
        let _enter = span.enter();

        if self.is_empty() {
            return Ok(CommitReport::default());
        }

        let mut invalid = Vec::new();
        for key in self.new.iter().chain(self.modified.iter()) {
            let object = manager.get_mut(*key)?;
            if !object.validate() {
                invalid.push(object.guid().to_string());
            }
        }
        if !invalid.is_empty() {
            warn!(objects = ?invalid, "commit aborted: invalid objects");
            return Err(UmiError::InvalidObjects(invalid));
        }

        let mut names = BTreeSet::new();
        for key in self.new.iter().chain(&self.modified).chain(&self.deleted) {
            names.insert(manager.get(*key)?.metadata().connection().to_string());
        }
        let databases: Vec<(String, Arc<Database>)> = names
            .into_iter()
            .map(|name| Ok((name.clone(), connections.get(&name)?)))
            .collect::<Result<_>>()?;

        // locks are always taken in connection name order
        let mut transactions = BTreeMap::new();
        for (name, database) in &databases {
            transactions.insert(name.clone(), database.begin()?);
        }

        let now = Utc::now().to_rfc3339();
        let outcome = match self.write(manager, &mut transactions, &now) {
            Ok(outcome) => outcome,
            Err(err) => {
                for transaction in transactions.into_values() {
                    transaction.rollback();
                }
                warn!(error = %err, "commit rolled back");
                return Err(err);
            }
        };
        for transaction in transactions.into_values() {
            transaction.commit()?;
        }

        let report = CommitReport {
            inserted: outcome.inserted.len(),
            updated: outcome.updated.len(),
            deleted: outcome.deleted.len(),
        };
        apply(manager, outcome)?;
        self.clear();
        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "commit finished"
        );
        Ok(report)
    }

    fn write(
        &self,
        manager: &ObjectManager,
        transactions: &mut BTreeMap<String, Transaction<'_>>,
        now: &str,
    ) -> Result<Outcome> {
        let mut outcome = Outcome::default();
        let mut assigned: BTreeMap<ObjectKey, i64> = BTreeMap::new();
        let mut deferred = Vec::new();

        for key in &insertion_order(manager, &self.new)? {
            let object = manager.get(*key)?;
            let metadata = object.metadata();
            let transaction = transaction_for(transactions, metadata.connection())?;

            let mut record = object.insert_record()?;
            let mut values = Vec::new();
            for name in timestamp_fields(object, true) {
                record.insert(object.column_of(&name)?, Value::from(now));
                values.push((name, Value::from(now)));
            }
            for (name, target) in object.pending_relations() {
                let target_id = assigned
                    .get(&target)
                    .copied()
                    .or_else(|| manager.get(target).ok().and_then(Object::id));
                match target_id {
                    Some(target_id) => {
                        record.insert(object.column_of(&name)?, Value::Integer(target_id));
                        values.push((name, Value::Integer(target_id)));
                    }
                    None if self.new.contains(&target) => deferred.push((*key, name, target)),
                    None => {
                        return Err(UmiError::Runtime(format!(
                            "Object '{}' refers to an object that is not stored",
                            object.guid()
                        )));
                    }
                }
            }

            let id = transaction
                .insert(metadata.table(), record)
                .map_err(|err| write_failure("insert", object, err))?;
            assigned.insert(*key, id);
            debug!(collection = metadata.name(), id, "object inserted");

            let derived = recalculate(object, id, &values, transaction, &mut outcome)?;
            if !derived.is_empty() {
                let assignments = derived
                    .iter()
                    .map(|(name, value)| Ok((object.column_of(name)?, Assignment::Set(value.clone()))))
                    .collect::<Result<Vec<_>>>()?;
                transaction
                    .update_by_id(metadata.table(), id, &assignments)
                    .map_err(|err| write_failure("recalculate", object, err))?;
                values.extend(derived);
            }
            outcome.inserted.push((*key, id, values));
        }

        // relations closing a cycle between new objects
        for (key, name, target) in deferred {
            let object = manager.get(key)?;
            let metadata = object.metadata();
            let transaction = transaction_for(transactions, metadata.connection())?;
            let (Some(&id), Some(&target_id)) = (assigned.get(&key), assigned.get(&target)) else {
                return Err(UmiError::Runtime(format!(
                    "Object '{}' refers to an object that is not stored",
                    object.guid()
                )));
            };
            let assignments = [(object.column_of(&name)?, Assignment::Set(Value::Integer(target_id)))];
            transaction
                .update_by_id(metadata.table(), id, &assignments)
                .map_err(|err| write_failure("link", object, err))?;
            if let Some((_, _, values)) = outcome.inserted.iter_mut().find(|(k, _, _)| *k == key) {
                values.push((name, Value::Integer(target_id)));
            }
        }

        for key in &self.modified {
            let object = manager.get(*key)?;
            let metadata = object.metadata();
            let transaction = transaction_for(transactions, metadata.connection())?;
            let id = stored_id(object)?;

            let mut assignments: Vec<(String, Assignment)> = object
                .modified_columns()?
                .into_iter()
                .map(|(column, value)| (column, Assignment::Set(value)))
                .collect();
            let mut values = Vec::new();
            for name in timestamp_fields(object, false) {
                assignments.push((object.column_of(&name)?, Assignment::Set(Value::from(now))));
                values.push((name, Value::from(now)));
            }
            let version_column = object.column_of(VERSION)?;
            assignments.push((version_column.clone(), Assignment::Increment(1)));
            values.push((VERSION.to_string(), Value::Integer(object.version() + 1)));

            let condition = Condition::all(vec![
                Condition::equals(PRIMARY_KEY, id),
                Condition::equals(version_column, object.version()),
            ]);
            let affected = transaction
                .update(metadata.table(), &assignments, &condition)
                .map_err(|err| write_failure("update", object, err))?;
            if affected == 0 {
                return Err(out_of_date(object));
            }
            debug!(collection = metadata.name(), id, "object updated");
            outcome.updated.push((*key, values));
        }

        for key in &self.deleted {
            let object = manager.get(*key)?;
            let metadata = object.metadata();
            let transaction = transaction_for(transactions, metadata.connection())?;
            let id = stored_id(object)?;

            let condition = Condition::all(vec![
                Condition::equals(PRIMARY_KEY, id),
                Condition::equals(object.column_of(VERSION)?, object.version()),
            ]);
            let affected = transaction
                .delete(metadata.table(), &condition)
                .map_err(|err| write_failure("delete", object, err))?;
            if affected == 0 {
                return Err(out_of_date(object));
            }
            if metadata.is_hierarchic()
                && let Some(parent) = object.property(PARENT)?.persisted_db_value().as_i64()
            {
                adjust_child_count(object, parent, -1, transaction, &mut outcome)?;
            }
            debug!(collection = metadata.name(), id, "object deleted");
            outcome.deleted.push(*key);
        }

        Ok(outcome)
    }
}

/// New objects ordered so relation targets are inserted before the objects
/// referring to them. Members of a reference cycle keep key order.
fn insertion_order(manager: &ObjectManager, new: &BTreeSet<ObjectKey>) -> Result<Vec<ObjectKey>> {
    fn visit(
        key: ObjectKey,
        manager: &ObjectManager,
        new: &BTreeSet<ObjectKey>,
        seen: &mut BTreeSet<ObjectKey>,
        order: &mut Vec<ObjectKey>,
    ) -> Result<()> {
        if !seen.insert(key) {
            return Ok(());
        }
        for (_, target) in manager.get(key)?.pending_relations() {
            if new.contains(&target) {
                visit(target, manager, new, seen, order)?;
            }
        }
        order.push(key);
        Ok(())
    }

    let mut seen = BTreeSet::new();
    let mut order = Vec::with_capacity(new.len());
    for key in new {
        visit(*key, manager, new, &mut seen, &mut order)?;
    }
    Ok(order)
}

fn transaction_for<'t, 'db>(
    transactions: &'t mut BTreeMap<String, Transaction<'db>>,
    connection: &str,
) -> Result<&'t mut Transaction<'db>> {
    transactions.get_mut(connection).ok_or_else(|| {
        UmiError::Runtime(format!("No transaction open for connection '{}'", connection))
    })
}

fn stored_id(object: &Object) -> Result<i64> {
    object.id().ok_or_else(|| {
        UmiError::Runtime(format!("Object '{}' has no identifier", object.guid()))
    })
}

fn write_failure(operation: &str, object: &Object, err: UmiError) -> UmiError {
    UmiError::Runtime(format!(
        "Cannot {} object '{}' of collection '{}': {}",
        operation,
        object.guid(),
        object.collection_name(),
        err
    ))
}

fn out_of_date(object: &Object) -> UmiError {
    UmiError::OutOfDate(format!(
        "Object '{}' of collection '{}' is out of date (expected version {})",
        object.guid(),
        object.collection_name(),
        object.version()
    ))
}

/// `Created` fields are stamped on insert only, `Updated` fields on both.
fn timestamp_fields(object: &Object, inserting: bool) -> Vec<String> {
    object
        .metadata()
        .fields()
        .iter()
        .filter(|f| match f.field_type() {
            FieldType::Created => inserting,
            FieldType::Updated => true,
            _ => false,
        })
        .map(|f| f.name().to_string())
        .filter(|name| object.has_property(name))
        .collect()
}

/// Values that depend on the freshly assigned identifier.
fn recalculate(
    object: &Object,
    id: i64,
    assigned: &[(String, Value)],
    transaction: &mut Transaction<'_>,
    outcome: &mut Outcome,
) -> Result<Vec<(String, Value)>> {
    let mut view: BTreeMap<String, Value> = object
        .loaded_properties()
        .map(|p| (p.full_name(), p.db_value().clone()))
        .collect();
    view.extend(assigned.iter().cloned());
    view.insert(PRIMARY_KEY.to_string(), Value::Integer(id));

    let mut derived = Vec::new();
    let metadata = object.metadata();

    if metadata.is_hierarchic() {
        let slug = match view.get(SLUG) {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => {
                derived.push((SLUG.to_string(), Value::from(id.to_string())));
                id.to_string()
            }
        };

        let parent_id = view.get(PARENT).and_then(Value::as_i64);
        let (mpath, uri, level) = match parent_id {
            Some(parent_id) => {
                let parent = transaction.find(metadata.table(), parent_id)?.ok_or_else(|| {
                    UmiError::NonexistentEntity(format!(
                        "Parent {} of object '{}' does not exist",
                        parent_id,
                        object.guid()
                    ))
                })?;
                let text = |name: &str| -> Result<String> {
                    let column = metadata.field(name)?.column_for(None)?;
                    Ok(parent.get(column).map(Value::to_string).unwrap_or_default())
                };
                let level_column = metadata.field(LEVEL)?.column_for(None)?;
                let parent_level = parent.get(level_column).and_then(Value::as_i64).unwrap_or(0);
                (
                    format!("{}.{}", text(MPATH)?, id),
                    format!("{}/{}", text(URI)?, slug),
                    parent_level + 1,
                )
            }
            None => (format!("#{}", id), format!("//{}", slug), 0),
        };
        derived.push((MPATH.to_string(), Value::Text(mpath)));
        derived.push((URI.to_string(), Value::Text(uri)));
        derived.push((LEVEL.to_string(), Value::Integer(level)));

        if let Some(parent_id) = parent_id {
            adjust_child_count(object, parent_id, 1, transaction, outcome)?;
        }
    }

    for (name, value) in &derived {
        view.insert(name.clone(), value.clone());
    }
    for field in metadata.fields() {
        if let FieldType::Formula { expression } = field.field_type()
            && object.has_property(field.name())
        {
            let rendered = FORMULA_PLACEHOLDER.replace_all(expression, |captures: &regex::Captures| {
                view.get(&captures[1]).map(Value::to_string).unwrap_or_default()
            });
            derived.push((field.name().to_string(), Value::Text(rendered.into_owned())));
        }
    }

    Ok(derived)
}

fn adjust_child_count(
    object: &Object,
    parent_id: i64,
    delta: i64,
    transaction: &mut Transaction<'_>,
    outcome: &mut Outcome,
) -> Result<()> {
    let metadata = object.metadata();
    let Some(field) = metadata.field_of_type(|t| matches!(t, FieldType::ChildCount)) else {
        return Ok(());
    };
    let column = field.column_for(None)?.to_string();
    transaction.update_by_id(
        metadata.table(),
        parent_id,
        &[(column, Assignment::Increment(delta))],
    )?;
    outcome.child_counts.push((
        metadata.name().to_string(),
        field.name().to_string(),
        parent_id,
        delta,
    ));
    Ok(())
}

fn apply(manager: &mut ObjectManager, outcome: Outcome) -> Result<()> {
    for (key, id, values) in outcome.inserted {
        manager.register_id(key, id)?;
        let object = manager.get_mut(key)?;
        for (name, value) in values {
            if object.has_property(&name) {
                object.set_internal(&name, value)?;
            }
        }
        object.set_consistent();
    }
    for (key, values) in outcome.updated {
        let object = manager.get_mut(key)?;
        for (name, value) in values {
            object.set_internal(&name, value)?;
        }
        object.set_consistent();
    }
    for key in outcome.deleted {
        manager.unload(key)?;
    }
    for (collection, field, parent_id, delta) in outcome.child_counts {
        if let Some(key) = manager.find_by_id(&collection, parent_id) {
            let parent = manager.get_mut(key)?;
            if let Ok(property) = parent.property(&field)
                && property.is_loaded()
            {
                let count = property.persisted_db_value().as_i64().unwrap_or(0) + delta;
                parent.load_property(&field, Value::Integer(count))?;
            }
        }
    }
    Ok(())
}

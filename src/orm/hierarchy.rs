//! Tree-shaped collections.
//!
//! Every node stores its parent id, a materialized path of ancestor ids
//! (`#1.5.7`), its depth (roots are level 0), its position among siblings
//! and a URI built from the slugs on the way down (`//about/team`).

use super::manager::ObjectKey;
use super::metadata::field::{LEVEL, MPATH, ORDER, PARENT, SLUG, URI, VERSION};
use super::metadata::{CollectionMetadata, FieldType};
use crate::core::{Result, UmiError, Value};
use crate::facade::Orm;
use crate::storage::{Assignment, Condition, Direction, Operator, PRIMARY_KEY, SelectQuery};
use std::sync::Arc;
use tracing::{debug, info};

/// Hierarchy operations bound to one collection of an [`Orm`].
pub struct HierarchicCollection<'a> {
    orm: &'a mut Orm,
    metadata: Arc<CollectionMetadata>,
}

/// Stored position of a node.
#[derive(Debug, Clone)]
struct Node {
    id: i64,
    parent: Option<i64>,
    mpath: String,
    uri: String,
    slug: String,
    level: i64,
}

impl<'a> HierarchicCollection<'a> {
    pub(crate) fn new(orm: &'a mut Orm, metadata: Arc<CollectionMetadata>) -> Self {
        Self { orm, metadata }
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Creates a node as the last child of `parent` (a root when `None`).
    /// An empty slug defaults to the identifier at commit.
    pub fn add(&mut self, type_name: &str, parent: Option<ObjectKey>, slug: &str) -> Result<ObjectKey> {
        if slug.contains('/') {
            return Err(UmiError::UnexpectedValue(format!("Invalid slug '{}'", slug)));
        }
        let parent_id = match parent {
            Some(parent) => {
                let object = self.member(parent)?;
                object.ensure_alive()?;
                object.id()
            }
            None => None,
        };

        let mut order = 0;
        let mut taken = false;
        for key in self.orm.persister().new_objects().clone() {
            let object = self.orm.object(key)?;
            if object.collection_name() != self.name() || !self.same_parent(key, parent)? {
                continue;
            }
            order = order.max(object.value(ORDER)?.as_i64().unwrap_or(0));
            taken |= !slug.is_empty() && object.value(SLUG)?.as_str() == Some(slug);
        }
        if parent.is_none() || parent_id.is_some() {
            let condition = self.parent_condition(parent_id)?;
            let siblings = self.database()?.select(
                &SelectQuery::new(self.metadata.table())
                    .filter(condition)
                    .columns(vec![self.column(ORDER)?, self.column(SLUG)?]),
            )?;
            for row in &siblings {
                order = order.max(row.get(&self.column(ORDER)?).and_then(Value::as_i64).unwrap_or(0));
                taken |= !slug.is_empty()
                    && row.get(&self.column(SLUG)?).and_then(Value::as_str) == Some(slug);
            }
        }
        if taken {
            return Err(UmiError::AlreadyExistentEntity(format!(
                "Slug '{}' is already used by a sibling in collection '{}'",
                slug,
                self.name()
            )));
        }

        let level = match parent {
            Some(parent) => self.orm.get(parent, LEVEL)?.as_i64().unwrap_or(0) + 1,
            None => 0,
        };

        let key = self.orm.create(Arc::clone(&self.metadata), type_name)?;
        let object = self.orm.manager_mut().get_mut(key)?;
        object.set_internal(SLUG, Value::from(slug))?;
        object.set_internal(ORDER, Value::Integer(order + 1))?;
        object.set_internal(LEVEL, Value::Integer(level))?;
        if let Some(parent) = parent {
            if let Some(parent_id) = parent_id {
                object.set_internal(PARENT, Value::Integer(parent_id))?;
            }
            object.prepare_related(PARENT, Some(parent))?;
        }
        debug!(collection = self.name(), order = order + 1, level, "node added");
        Ok(key)
    }

    /// Moves `object` under `parent` (to the roots when `None`), right
    /// after `after` or first when `after` is `None`. Writes immediately.
    pub fn move_node(
        &mut self,
        object: ObjectKey,
        parent: Option<ObjectKey>,
        after: Option<ObjectKey>,
    ) -> Result<()> {
        self.ensure_flushed("move")?;
        let node = self.node(object)?;

        let target = match parent {
            Some(parent) => {
                let target = self.node(parent)?;
                if target.id == node.id || target.mpath.starts_with(&format!("{}.", node.mpath)) {
                    return Err(UmiError::NotAllowedOperation(format!(
                        "Cannot move object '{}' under itself or its own descendant",
                        node.uri
                    )));
                }
                Some(target)
            }
            None => None,
        };
        let target_id = target.as_ref().map(|t| t.id);

        let order = match after {
            Some(after) => {
                let sibling = self.node(after)?;
                if sibling.parent != target_id || sibling.id == node.id {
                    return Err(UmiError::NotAllowedOperation(format!(
                        "Object '{}' is not a sibling at the target position",
                        sibling.uri
                    )));
                }
                self.orm.get(after, ORDER)?.as_i64().unwrap_or(0) + 1
            }
            None => 1,
        };

        let parent_changed = node.parent != target_id;
        let (mpath, uri, level) = match &target {
            Some(target) => (
                format!("{}.{}", target.mpath, node.id),
                format!("{}/{}", target.uri, node.slug),
                target.level + 1,
            ),
            None => (format!("#{}", node.id), format!("//{}", node.slug), 0),
        };
        if parent_changed {
            self.ensure_uri_free(&uri, node.id)?;
        }

        let table = self.metadata.table().to_string();
        let version = self.column(VERSION)?;
        let database = self.database()?;
        let mut transaction = database.begin()?;

        let shift = Condition::all(vec![
            self.parent_condition(target_id)?,
            Condition::compare(self.column(ORDER)?, Operator::EqualsOrMore, order),
            Condition::compare(PRIMARY_KEY, Operator::NotEquals, node.id),
        ]);
        transaction.update(
            &table,
            &[
                (self.column(ORDER)?, Assignment::Increment(1)),
                (version.clone(), Assignment::Increment(1)),
            ],
            &shift,
        )?;

        let mut assignments = vec![
            (self.column(ORDER)?, Assignment::Set(Value::Integer(order))),
            (version.clone(), Assignment::Increment(1)),
        ];
        if parent_changed {
            assignments.extend([
                (self.column(PARENT)?, Assignment::Set(target_id.into())),
                (self.column(MPATH)?, Assignment::Set(Value::from(mpath.as_str()))),
                (self.column(URI)?, Assignment::Set(Value::from(uri.as_str()))),
                (self.column(LEVEL)?, Assignment::Set(Value::Integer(level))),
            ]);
        }
        transaction.update_by_id(&table, node.id, &assignments)?;

        if parent_changed {
            let moved = self.cascade(
                &mut transaction,
                &node,
                Some((&mpath, level - node.level)),
                &uri,
            )?;
            if let Some(column) = self.child_count_column()? {
                if let Some(old_parent) = node.parent {
                    transaction.update_by_id(&table, old_parent, &[(column.clone(), Assignment::Increment(-1))])?;
                }
                if let Some(new_parent) = target_id {
                    transaction.update_by_id(&table, new_parent, &[(column, Assignment::Increment(1))])?;
                }
            }
            debug!(collection = self.name(), descendants = moved, "subtree recalculated");
        }
        transaction.commit()?;
        info!(collection = self.name(), id = node.id, uri = uri.as_str(), "node moved");

        self.refresh_loaded()
    }

    /// Renames a node's slug; its URI and every descendant URI follow.
    pub fn change_slug(&mut self, object: ObjectKey, slug: &str) -> Result<()> {
        self.ensure_flushed("change the slug of")?;
        if slug.is_empty() || slug.contains('/') {
            return Err(UmiError::UnexpectedValue(format!("Invalid slug '{}'", slug)));
        }
        let node = self.node(object)?;
        if node.slug == slug {
            return Ok(());
        }

        let siblings = SelectQuery::new(self.metadata.table()).filter(Condition::all(vec![
            self.parent_condition(node.parent)?,
            Condition::equals(self.column(SLUG)?, slug),
        ]));
        if self.database()?.count(&siblings)? > 0 {
            return Err(UmiError::AlreadyExistentEntity(format!(
                "Slug '{}' is already used by a sibling in collection '{}'",
                slug,
                self.name()
            )));
        }
        let prefix = node.uri.rsplit_once('/').map(|(prefix, _)| prefix).unwrap_or("/");
        let uri = format!("{}/{}", prefix, slug);
        self.ensure_uri_free(&uri, node.id)?;

        let table = self.metadata.table().to_string();
        let database = self.database()?;
        let mut transaction = database.begin()?;
        transaction.update_by_id(
            &table,
            node.id,
            &[
                (self.column(SLUG)?, Assignment::Set(Value::from(slug))),
                (self.column(URI)?, Assignment::Set(Value::from(uri.as_str()))),
                (self.column(VERSION)?, Assignment::Increment(1)),
            ],
        )?;
        self.cascade(&mut transaction, &node, None, &uri)?;
        transaction.commit()?;
        info!(collection = self.name(), id = node.id, uri = uri.as_str(), "slug changed");

        self.refresh_loaded()
    }

    /// Direct children of `parent` (roots when `None`), in order.
    pub fn children(&mut self, parent: Option<ObjectKey>) -> Result<Vec<ObjectKey>> {
        let selector = self.orm.select(self.metadata.name())?;
        let selector = match parent {
            Some(parent) => {
                let id = self.stored_id(parent)?;
                selector.filter(PARENT).equals(id)
            }
            None => selector.filter(PARENT).is_null(),
        };
        selector
            .order_by(ORDER, Direction::Asc)
            .result(self.orm)?
            .keys(self.orm)
    }

    /// Every node below `node`, shallow levels first.
    pub fn descendants(&mut self, node: ObjectKey) -> Result<Vec<ObjectKey>> {
        self.stored_id(node)?;
        let mpath = self.orm.get(node, MPATH)?.to_string();
        self.orm
            .select(self.metadata.name())?
            .filter(MPATH)
            .like(format!("{}.%", mpath))
            .order_by(LEVEL, Direction::Asc)
            .order_by(ORDER, Direction::Asc)
            .result(self.orm)?
            .keys(self.orm)
    }

    /// Ancestors of `node`, root first.
    pub fn ancestors(&mut self, node: ObjectKey) -> Result<Vec<ObjectKey>> {
        self.stored_id(node)?;
        let mpath = self.orm.get(node, MPATH)?.to_string();
        let ids = parse_mpath(&mpath)?;
        let name = self.metadata.name().to_string();
        ids[..ids.len().saturating_sub(1)]
            .iter()
            .map(|id| self.orm.get_by_id(&name, *id))
            .collect()
    }

    pub fn get_by_uri(&mut self, uri: &str) -> Result<ObjectKey> {
        self.orm
            .select(self.metadata.name())?
            .filter(URI)
            .equals(uri)
            .limit(1)
            .result(self.orm)?
            .fetch(self.orm)?
            .ok_or_else(|| {
                UmiError::NonexistentEntity(format!(
                    "Object with uri '{}' does not exist in collection '{}'",
                    uri,
                    self.metadata.name()
                ))
            })
    }

    /// Rewrites mpath/level (when `path` is given) and URI of every
    /// descendant of `node`. Returns how many rows changed.
    fn cascade(
        &self,
        transaction: &mut crate::storage::Transaction<'_>,
        node: &Node,
        path: Option<(&str, i64)>,
        uri: &str,
    ) -> Result<usize> {
        let table = self.metadata.table();
        let (mpath_column, uri_column, level_column) =
            (self.column(MPATH)?, self.column(URI)?, self.column(LEVEL)?);
        let rows = transaction.select(
            &SelectQuery::new(table).filter(Condition::like(mpath_column.clone(), format!("{}.%", node.mpath))),
        )?;
        for row in &rows {
            let id = row.get(PRIMARY_KEY).and_then(Value::as_i64).ok_or_else(|| {
                UmiError::Runtime(format!("Row of table '{}' has no identifier", table))
            })?;
            let old_uri = row.get(&uri_column).map(Value::to_string).unwrap_or_default();
            let mut assignments = vec![
                (
                    uri_column.clone(),
                    Assignment::Set(Value::Text(format!("{}{}", uri, &old_uri[node.uri.len().min(old_uri.len())..]))),
                ),
                (self.column(VERSION)?, Assignment::Increment(1)),
            ];
            if let Some((mpath, level_delta)) = path {
                let old_mpath = row.get(&mpath_column).map(Value::to_string).unwrap_or_default();
                let level = row.get(&level_column).and_then(Value::as_i64).unwrap_or(0);
                assignments.push((
                    mpath_column.clone(),
                    Assignment::Set(Value::Text(format!("{}{}", mpath, &old_mpath[node.mpath.len()..]))),
                ));
                assignments.push((level_column.clone(), Assignment::Set(Value::Integer(level + level_delta))));
            }
            transaction.update_by_id(table, id, &assignments)?;
        }
        Ok(rows.len())
    }

    fn refresh_loaded(&mut self) -> Result<()> {
        let database = self.database()?;
        for key in self.orm.manager().keys_of(self.metadata.name()) {
            let Some(id) = self.orm.object(key)?.id() else {
                continue;
            };
            match database.find(self.metadata.table(), id)? {
                Some(row) => self.orm.manager_mut().get_mut(key)?.refresh(&row)?,
                None => self.orm.manager_mut().unload(key)?,
            }
        }
        Ok(())
    }

    fn ensure_flushed(&self, operation: &str) -> Result<()> {
        if !self.orm.persister().is_empty() {
            return Err(UmiError::NotAllowedOperation(format!(
                "Cannot {} objects of '{}' while changes are pending; commit first",
                operation,
                self.name()
            )));
        }
        Ok(())
    }

    fn ensure_uri_free(&self, uri: &str, id: i64) -> Result<()> {
        let query = SelectQuery::new(self.metadata.table()).filter(Condition::all(vec![
            Condition::equals(self.column(URI)?, uri),
            Condition::compare(PRIMARY_KEY, Operator::NotEquals, id),
        ]));
        if self.database()?.count(&query)? > 0 {
            return Err(UmiError::AlreadyExistentEntity(format!(
                "Object with uri '{}' already exists in collection '{}'",
                uri,
                self.name()
            )));
        }
        Ok(())
    }

    fn member(&self, key: ObjectKey) -> Result<&crate::orm::object::Object> {
        let object = self.orm.object(key)?;
        self.orm.check_membership(object, self.metadata.name())?;
        Ok(object)
    }

    fn stored_id(&self, key: ObjectKey) -> Result<i64> {
        let object = self.member(key)?;
        object.ensure_alive()?;
        object.id().ok_or_else(|| {
            UmiError::NotAllowedOperation(format!("Object '{}' is not stored yet", object.guid()))
        })
    }

    fn node(&mut self, key: ObjectKey) -> Result<Node> {
        let id = self.stored_id(key)?;
        let text = |value: Value| if value.is_null() { String::new() } else { value.to_string() };
        Ok(Node {
            id,
            parent: self.orm.get(key, PARENT)?.as_i64(),
            mpath: text(self.orm.get(key, MPATH)?),
            uri: text(self.orm.get(key, URI)?),
            slug: text(self.orm.get(key, SLUG)?),
            level: self.orm.get(key, LEVEL)?.as_i64().unwrap_or(0),
        })
    }

    fn same_parent(&self, key: ObjectKey, parent: Option<ObjectKey>) -> Result<bool> {
        let property = self.orm.object(key)?.property(PARENT)?;
        Ok(match property.related() {
            Some(related) => related == parent,
            None => {
                let parent_id = match parent {
                    Some(parent) => self.orm.object(parent)?.id(),
                    None => None,
                };
                property.db_value().as_i64() == parent_id
            }
        })
    }

    fn parent_condition(&self, parent: Option<i64>) -> Result<Condition> {
        let column = self.column(PARENT)?;
        Ok(match parent {
            Some(id) => Condition::equals(column, id),
            None => Condition::IsNull { column, negated: false },
        })
    }

    fn child_count_column(&self) -> Result<Option<String>> {
        match self.metadata.field_of_type(|t| matches!(t, FieldType::ChildCount)) {
            Some(field) => Ok(Some(field.column_for(None)?.to_string())),
            None => Ok(None),
        }
    }

    fn column(&self, field: &str) -> Result<String> {
        Ok(self.metadata.column_for_name(field)?.to_string())
    }

    fn database(&self) -> Result<Arc<crate::storage::Database>> {
        self.orm.connections().get(self.metadata.connection())
    }
}

/// `#1.5.7` -> `[1, 5, 7]`.
pub fn parse_mpath(mpath: &str) -> Result<Vec<i64>> {
    mpath
        .strip_prefix('#')
        .ok_or_else(|| UmiError::UnexpectedValue(format!("Malformed materialized path '{}'", mpath)))?
        .split('.')
        .map(|id| {
            id.parse::<i64>().map_err(|_| {
                UmiError::UnexpectedValue(format!("Malformed materialized path '{}'", mpath))
            })
        })
        .collect()
}

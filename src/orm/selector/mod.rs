//! Fluent object queries.
//!
//! ```ignore
//! let mut result = orm
//!     .select("news")?
//!     .types(&["base.article*"])
//!     .filter("title").like("%rust%")
//!     .begin(GroupMode::Or)
//!         .filter("rubric").equals(2)
//!         .filter("hot").equals(true)
//!     .end()
//!     .order_by("id", Direction::Desc)
//!     .limit(10)
//!     .result(&mut orm)?;
//! while let Some(key) = result.fetch(&mut orm)? { /* .. */ }
//! ```
//!
//! Builder mistakes (unknown fields or types, unbalanced groups) are kept
//! and reported by [`Selector::result`] / [`Selector::total`].

pub mod condition;
pub mod result;

pub use condition::FieldCondition;
pub use result::{ResultIter, ResultSet};

use super::metadata::field::{GUID, ID, TYPE, VERSION};
use super::metadata::{CollectionMetadata, FieldType};
use crate::core::{Result, UmiError, Value};
use crate::facade::Orm;
use crate::storage::{Condition, Direction, GroupMode, SelectQuery};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Selector {
    metadata: Arc<CollectionMetadata>,
    locales: Vec<String>,
    types: Option<Vec<String>>,
    fields: Option<Vec<String>>,
    with: Vec<String>,
    groups: Vec<(GroupMode, Vec<Condition>)>,
    order_by: Vec<(String, Direction)>,
    limit: Option<usize>,
    offset: usize,
    error: Option<UmiError>,
}

impl Selector {
    /// `locales` lists the current locale first, then the fallback.
    pub fn new(metadata: Arc<CollectionMetadata>, locales: Vec<String>) -> Self {
        Self {
            metadata,
            locales,
            types: None,
            fields: None,
            with: Vec::new(),
            groups: vec![(GroupMode::And, Vec::new())],
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            error: None,
        }
    }

    pub fn collection(&self) -> &Arc<CollectionMetadata> {
        &self.metadata
    }

    /// Restricts to the given types; `name*` also selects descendants.
    pub fn types(mut self, names: &[&str]) -> Self {
        let mut selected = self.types.take().unwrap_or_default();
        for name in names {
            let (base, descendants) = match name.strip_suffix('*') {
                Some(base) => (base.trim_end_matches('.'), true),
                None => (*name, false),
            };
            match self.metadata.object_type(base) {
                Ok(_) => {
                    for object_type in self.metadata.types() {
                        let matches = if descendants {
                            object_type.is_a(base)
                        } else {
                            object_type.name() == base
                        };
                        if matches && !selected.iter().any(|s| s == object_type.name()) {
                            selected.push(object_type.name().to_string());
                        }
                    }
                }
                Err(err) => self.fail(err),
            }
        }
        self.types = Some(selected);
        self
    }

    /// Loads only these fields (plus system fields); others load lazily.
    pub fn fields(mut self, names: &[&str]) -> Self {
        let mut columns = Vec::new();
        for name in names {
            match self.column(name) {
                Ok(column) => columns.push(column),
                Err(err) => self.fail(err),
            }
        }
        self.fields = Some(columns);
        self
    }

    /// Eager-loads a belongs-to relation through a join.
    pub fn with(mut self, field: &str) -> Self {
        match self.metadata.field(field) {
            Ok(f) if matches!(f.field_type(), FieldType::BelongsTo { .. } | FieldType::Parent) => {
                self.with.push(field.to_string())
            }
            Ok(_) => self.fail(UmiError::NotAllowedOperation(format!(
                "Field '{}' of collection '{}' is not a belongs-to relation",
                field,
                self.metadata.name()
            ))),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn filter(self, field: &str) -> FieldCondition {
        FieldCondition::new(self, field)
    }

    /// Opens a nested condition group.
    pub fn begin(mut self, mode: GroupMode) -> Self {
        self.groups.push((mode, Vec::new()));
        self
    }

    pub fn end(mut self) -> Self {
        if self.groups.len() < 2 {
            self.fail(UmiError::UnexpectedValue(
                "Condition group closed without being opened".to_string(),
            ));
            return self;
        }
        if let Some((mode, conditions)) = self.groups.pop()
            && !conditions.is_empty()
        {
            self.push_condition(Condition::Group { mode, conditions });
        }
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        match self.column(field) {
            Ok(column) => self.order_by.push((column, direction)),
            Err(err) => self.fail(err),
        }
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

    /// Runs the query. Rows are hydrated into objects as the result set is
    /// consumed.
    pub fn result(&self, orm: &mut Orm) -> Result<ResultSet> {
        let (query, with) = self.query(orm)?;
        let rows = orm.connections().get(self.metadata.connection())?.select(&query)?;
        Ok(ResultSet::new(Arc::clone(&self.metadata), rows, with))
    }

    /// Number of matching objects, ignoring limit and offset.
    pub fn total(&self, orm: &Orm) -> Result<usize> {
        let (query, _) = self.query(orm)?;
        orm.connections().get(self.metadata.connection())?.count(&query)
    }

    fn query(&self, orm: &Orm) -> Result<(SelectQuery, Vec<(String, Arc<CollectionMetadata>)>)> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.groups.len() != 1 {
            return Err(UmiError::UnexpectedValue(
                "Condition group opened without being closed".to_string(),
            ));
        }

        let mut query = SelectQuery::new(self.metadata.table());
        if let Some((mode, conditions)) = self.groups.first()
            && !conditions.is_empty()
        {
            query = query.filter(Condition::Group {
                mode: *mode,
                conditions: conditions.clone(),
            });
        }
        if let Some(types) = &self.types {
            query = query.filter(Condition::In {
                column: self.metadata.column_for_name(TYPE)?.to_string(),
                values: types.iter().map(|t| Value::from(t.as_str())).collect(),
            });
        }
        query = query.columns(self.projection()?);
        for (column, direction) in &self.order_by {
            query = query.order_by(column.clone(), *direction);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query = query.offset(self.offset);

        let mut with = Vec::new();
        for field_name in &self.with {
            let field = self.metadata.field(field_name)?;
            let target = match field.field_type() {
                FieldType::BelongsTo { target } => orm.metadata(target)?,
                _ => Arc::clone(&self.metadata),
            };
            if target.connection() != self.metadata.connection() {
                return Err(UmiError::NotAllowedOperation(format!(
                    "Cannot join '{}' from another connection",
                    target.name()
                )));
            }
            query = query.join(target.table(), field_name.clone(), field.column_for(None)?);
            with.push((field_name.clone(), target));
        }
        Ok((query, with))
    }

    /// System columns, then either the requested fields or every field in
    /// the selector's locales.
    fn projection(&self) -> Result<Vec<String>> {
        let mut columns = Vec::new();
        for field in self.metadata.fields() {
            let system = field.field_type().is_system()
                || matches!(field.field_type(), FieldType::Parent | FieldType::Slug)
                || [ID, GUID, TYPE, VERSION].contains(&field.name());
            if field.field_type().data_type().is_none() {
                continue;
            }
            if system || self.fields.is_none() {
                if field.is_localized() {
                    if let Ok(name) = self.metadata.full_name_for(field.name(), &self.locale_refs()) {
                        columns.push(self.metadata.column_for_name(&name)?.to_string());
                    }
                } else {
                    columns.push(field.column_for(None)?.to_string());
                }
            }
        }
        if let Some(requested) = &self.fields {
            for column in requested {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        Ok(columns)
    }

    fn locale_refs(&self) -> Vec<&str> {
        self.locales.iter().map(String::as_str).collect()
    }

    pub(crate) fn column(&self, name: &str) -> Result<String> {
        let full_name = self.metadata.full_name_for(name, &self.locale_refs())?;
        let field = self.metadata.field(super::metadata::split_full_name(&full_name).0)?;
        if field.field_type().data_type().is_none() {
            return Err(UmiError::NotAllowedOperation(format!(
                "Field '{}' of collection '{}' has no column",
                name,
                self.metadata.name()
            )));
        }
        Ok(self.metadata.column_for_name(&full_name)?.to_string())
    }

    pub(crate) fn push_condition(&mut self, condition: Condition) {
        if let Some((_, conditions)) = self.groups.last_mut() {
            conditions.push(condition);
        }
    }

    /// Keeps the first builder error.
    pub(crate) fn fail(&mut self, err: UmiError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionKind;
    use crate::orm::metadata::{Field, Localization};

    fn news() -> Arc<CollectionMetadata> {
        CollectionMetadata::builder("news", CollectionKind::Simple)
            .field(Field::new("title", FieldType::String))
            .field(
                Field::new("teaser", FieldType::Text)
                    .localize("en-US", Localization { column: "teaser_en".into(), default: Value::Null })
                    .localize("ru-RU", Localization { column: "teaser_ru".into(), default: Value::Null }),
            )
            .object_type("base", &["title", "teaser"])
            .object_type("base.article", &[])
            .with_system_fields()
            .build()
            .unwrap()
    }

    fn selector() -> Selector {
        Selector::new(news(), vec!["ru-RU".into(), "en-US".into()])
    }

    #[test]
    fn test_localized_fields_resolve_to_current_locale_column() {
        assert_eq!(selector().column("teaser").unwrap(), "teaser_ru");
        assert_eq!(selector().column("teaser#en-US").unwrap(), "teaser_en");
        let projection = selector().projection().unwrap();
        assert!(projection.contains(&"teaser_ru".to_string()));
        assert!(!projection.contains(&"teaser_en".to_string()));
    }

    #[test]
    fn test_fields_projection_keeps_system_columns() {
        let projection = selector().fields(&["teaser"]).projection().unwrap();
        for column in ["id", "guid", "type", "version", "teaser_ru"] {
            assert!(projection.contains(&column.to_string()), "missing {}", column);
        }
        assert!(!projection.contains(&"title".to_string()));
    }

    #[test]
    fn test_type_wildcard_selects_descendants() {
        let selector = selector().types(&["base*"]);
        assert_eq!(
            selector.types.as_deref(),
            Some(&["base".to_string(), "base.article".to_string()][..])
        );
    }

    #[test]
    fn test_builder_errors_are_deferred() {
        let selector = selector().filter("nope").equals(1).types(&["base.unknown"]);
        assert!(matches!(selector.error, Some(UmiError::NonexistentEntity(_))));

        let unbalanced = self::selector().end();
        assert!(matches!(unbalanced.error, Some(UmiError::UnexpectedValue(_))));
    }

    #[test]
    fn test_groups_nest() {
        let selector = selector()
            .filter("title").equals("a")
            .begin(GroupMode::Or)
            .filter("title").equals("b")
            .filter("title").equals("c")
            .end();
        let (_, conditions) = &selector.groups[0];
        assert_eq!(conditions.len(), 2);
        assert!(matches!(conditions[1], Condition::Group { mode: GroupMode::Or, .. }));
    }
}

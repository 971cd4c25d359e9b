use super::field::{self, Field, FieldType, Localization};
use super::object_type::{BASE_TYPE, ObjectType};
use crate::config::{CollectionConfig, CollectionKind};
use crate::core::{Result, UmiError};
use crate::storage::{DEFAULT_CONNECTION, TableSchema};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Schema of one collection: its fields, object types and storage location.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    name: String,
    kind: CollectionKind,
    table: String,
    connection: String,
    fields: Vec<Field>,
    types: BTreeMap<String, ObjectType>,
}

impl CollectionMetadata {
    pub fn builder(name: impl Into<String>, kind: CollectionKind) -> CollectionMetadataBuilder {
        let name = name.into();
        CollectionMetadataBuilder {
            table: name.clone(),
            name,
            kind,
            connection: DEFAULT_CONNECTION.to_string(),
            fields: Vec::new(),
            types: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn is_hierarchic(&self) -> bool {
        self.kind == CollectionKind::Hierarchic
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == name)
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields.iter().find(|f| f.name() == name).ok_or_else(|| {
            UmiError::NonexistentEntity(format!(
                "Field '{}' does not exist in collection '{}'",
                name, self.name
            ))
        })
    }

    pub fn object_type(&self, name: &str) -> Result<&ObjectType> {
        self.types.get(name).ok_or_else(|| {
            UmiError::NonexistentEntity(format!(
                "Type '{}' does not exist in collection '{}'",
                name, self.name
            ))
        })
    }

    pub fn types(&self) -> impl Iterator<Item = &ObjectType> {
        self.types.values()
    }

    /// Fields carried by objects of the given type.
    pub fn type_fields(&self, type_name: &str) -> Result<Vec<&Field>> {
        self.object_type(type_name)?
            .field_names()
            .iter()
            .map(|name| self.field(name))
            .collect()
    }

    /// Name of the first field of the given type, if any.
    pub fn field_of_type(&self, predicate: impl Fn(&FieldType) -> bool) -> Option<&Field> {
        self.fields.iter().find(|f| predicate(f.field_type()))
    }

    /// Full property name for `name`. A localized field named without a
    /// locale resolves to the first of `locales` it declares.
    pub fn full_name_for(&self, name: &str, locales: &[&str]) -> Result<String> {
        let (field_name, locale) = field::split_full_name(name);
        let field = self.field(field_name)?;
        match locale {
            Some(locale) => {
                field.column_for(Some(locale))?;
                Ok(name.to_string())
            }
            None if field.is_localized() => locales
                .iter()
                .find(|l| field.has_locale(l))
                .map(|l| field::full_name(field_name, Some(l)))
                .ok_or_else(|| {
                    UmiError::UnexpectedValue(format!(
                        "Field '{}' of collection '{}' has no localization for {:?}",
                        field_name, self.name, locales
                    ))
                }),
            None => Ok(name.to_string()),
        }
    }

    /// Column holding the property with the given full name.
    pub fn column_for_name(&self, full_name: &str) -> Result<&str> {
        let (field_name, locale) = field::split_full_name(full_name);
        self.field(field_name)?.column_for(locale)
    }

    pub fn table_schema(&self) -> TableSchema {
        let columns = self.fields.iter().flat_map(Field::columns).collect();
        let mut schema = TableSchema::new(&self.table, columns);
        if let Ok(guid) = self.field(field::GUID).and_then(|f| f.column_for(None)) {
            schema = schema.unique(guid);
        }
        schema
    }
}

pub struct CollectionMetadataBuilder {
    name: String,
    kind: CollectionKind,
    table: String,
    connection: String,
    fields: Vec<Field>,
    types: BTreeMap<String, Vec<String>>,
}

impl CollectionMetadataBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares a type with the fields it adds on top of its ancestors.
    pub fn object_type(mut self, name: impl Into<String>, fields: &[&str]) -> Self {
        self.types
            .insert(name.into(), fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Adds the system fields the collection kind requires, unless declared.
    pub fn with_system_fields(mut self) -> Self {
        for (name, field_type) in system_fields(self.kind) {
            if !self.fields.iter().any(|f| f.name() == name) {
                self.fields.push(Field::new(name, field_type));
            }
        }
        self
    }

    pub fn build(self) -> Result<Arc<CollectionMetadata>> {
        for (name, expected) in system_fields(self.kind) {
            let field = self.fields.iter().find(|f| f.name() == name).ok_or_else(|| {
                UmiError::UnexpectedValue(format!(
                    "Collection '{}' must declare system field '{}'",
                    self.name, name
                ))
            })?;
            if std::mem::discriminant(field.field_type()) != std::mem::discriminant(&expected) {
                return Err(UmiError::UnexpectedValue(format!(
                    "System field '{}' of collection '{}' has a wrong type",
                    name, self.name
                )));
            }
        }
        if let Some(identify) = self.fields.iter().find(|f| f.name() == field::ID)
            && identify.column_for(None)? != crate::storage::PRIMARY_KEY
        {
            return Err(UmiError::UnexpectedValue(format!(
                "Identify field of collection '{}' must be stored in column '{}'",
                self.name,
                crate::storage::PRIMARY_KEY
            )));
        }
        for (index, field) in self.fields.iter().enumerate() {
            if self.fields[..index].iter().any(|f| f.name() == field.name()) {
                return Err(UmiError::AlreadyExistentEntity(format!(
                    "Field '{}' is declared twice in collection '{}'",
                    field.name(),
                    self.name
                )));
            }
        }

        let system: Vec<String> = system_fields(self.kind)
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect();

        let mut declared = self.types;
        declared.entry(BASE_TYPE.to_string()).or_default();

        let mut types = BTreeMap::new();
        for name in declared.keys() {
            if name != BASE_TYPE && !name.starts_with(&format!("{}.", BASE_TYPE)) {
                return Err(UmiError::UnexpectedValue(format!(
                    "Type '{}' of collection '{}' must descend from '{}'",
                    name, self.name, BASE_TYPE
                )));
            }

            let mut fields = system.clone();
            // walk base -> ... -> name collecting declared fields
            let mut path = String::new();
            for segment in name.split('.') {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(segment);
                let own = declared.get(&path).ok_or_else(|| {
                    UmiError::UnexpectedValue(format!(
                        "Type '{}' of collection '{}' has undeclared ancestor '{}'",
                        name, self.name, path
                    ))
                })?;
                for field_name in own {
                    if !self.fields.iter().any(|f| f.name() == field_name) {
                        return Err(UmiError::NonexistentEntity(format!(
                            "Type '{}' refers to unknown field '{}' in collection '{}'",
                            name, field_name, self.name
                        )));
                    }
                    if !fields.contains(field_name) {
                        fields.push(field_name.clone());
                    }
                }
            }
            types.insert(name.clone(), ObjectType::new(name.clone(), fields));
        }

        Ok(Arc::new(CollectionMetadata {
            name: self.name,
            kind: self.kind,
            table: self.table,
            connection: self.connection,
            fields: self.fields,
            types,
        }))
    }
}

fn system_fields(kind: CollectionKind) -> Vec<(&'static str, FieldType)> {
    let mut fields = vec![
        (field::ID, FieldType::Identify),
        (field::GUID, FieldType::Guid),
        (field::TYPE, FieldType::Type),
        (field::VERSION, FieldType::Version),
    ];
    if kind == CollectionKind::Hierarchic {
        fields.extend([
            (field::PARENT, FieldType::Parent),
            (field::MPATH, FieldType::MaterializedPath),
            (field::ORDER, FieldType::Order),
            (field::LEVEL, FieldType::Level),
            (field::SLUG, FieldType::Slug),
            (field::URI, FieldType::Uri),
        ]);
    }
    fields
}

impl CollectionMetadata {
    pub fn from_config(config: CollectionConfig) -> Result<Arc<Self>> {
        let mut builder = CollectionMetadata::builder(&config.name, config.kind);
        if let Some(table) = config.table {
            builder = builder.table(table);
        }
        if let Some(connection) = config.connection {
            builder = builder.connection(connection);
        }
        for field_config in config.fields {
            let mut field = Field::new(&field_config.name, field_config.field_type)
                .default_value(field_config.default)
                .read_only(field_config.read_only);
            if let Some(column) = field_config.column {
                field = field.column(column);
            }
            for (locale, localization) in field_config.localizations {
                field = field.localize(
                    locale,
                    Localization {
                        column: localization.column,
                        default: localization.default,
                    },
                );
            }
            for validator in field_config.validators {
                field = field.validator(validator);
            }
            builder = builder.field(field);
        }
        for (type_name, type_config) in config.types {
            let fields: Vec<&str> = type_config.fields.iter().map(String::as_str).collect();
            builder = builder.object_type(type_name, &fields);
        }
        builder.with_system_fields().build()
    }
}

/// All collections known to an application.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    collections: BTreeMap<String, Arc<CollectionMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metadata: Arc<CollectionMetadata>) -> Result<()> {
        if self.collections.contains_key(metadata.name()) {
            return Err(UmiError::AlreadyExistentEntity(format!(
                "Collection '{}' already registered",
                metadata.name()
            )));
        }
        self.collections
            .insert(metadata.name().to_string(), metadata);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<CollectionMetadata>> {
        self.collections.get(name).cloned().ok_or_else(|| {
            UmiError::NonexistentEntity(format!("Collection '{}' does not exist", name))
        })
    }

    pub fn collections(&self) -> impl Iterator<Item = &Arc<CollectionMetadata>> {
        self.collections.values()
    }
}

use crate::core::{Column, DataType, Result, UmiError, Value};
use crate::expression::eval_like;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ID: &str = "id";
pub const GUID: &str = "guid";
pub const TYPE: &str = "type";
pub const VERSION: &str = "version";
pub const CREATED: &str = "created";
pub const UPDATED: &str = "updated";
pub const PARENT: &str = "parent";
pub const MPATH: &str = "mpath";
pub const ORDER: &str = "order";
pub const LEVEL: &str = "level";
pub const SLUG: &str = "slug";
pub const URI: &str = "uri";
pub const CHILD_COUNT: &str = "childCount";

/// Separator between a field name and a locale in a property full name.
pub const LOCALE_SEPARATOR: char = '#';

/// Type tag of a field. Scalars hold plain values, relations point at other
/// objects, specials are maintained by the ORM itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldType {
    Identify,
    Guid,
    Version,
    #[serde(rename = "objectType")]
    Type,
    String,
    Text,
    Integer,
    Float,
    Bool,
    DateTime,
    Created,
    Updated,
    BelongsTo {
        target: String,
    },
    HasMany {
        target: String,
        #[serde(rename = "targetField")]
        target_field: String,
    },
    /// Derived from other properties once the object has an identifier.
    /// `{field}` placeholders are substituted.
    Formula {
        expression: String,
    },
    Parent,
    MaterializedPath,
    Order,
    Level,
    Slug,
    Uri,
    ChildCount,
}

impl FieldType {
    /// Storage type, or `None` for fields without a column of their own.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            FieldType::HasMany { .. } => None,
            FieldType::Identify
            | FieldType::Version
            | FieldType::Integer
            | FieldType::BelongsTo { .. }
            | FieldType::Parent
            | FieldType::Order
            | FieldType::Level
            | FieldType::ChildCount => Some(DataType::Integer),
            FieldType::Float => Some(DataType::Float),
            FieldType::Bool => Some(DataType::Boolean),
            _ => Some(DataType::Text),
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            FieldType::BelongsTo { .. } | FieldType::Parent | FieldType::HasMany { .. }
        )
    }

    /// Fields the ORM writes itself; users may not set them.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            FieldType::Identify
                | FieldType::Guid
                | FieldType::Version
                | FieldType::Type
                | FieldType::Created
                | FieldType::Updated
                | FieldType::MaterializedPath
                | FieldType::Order
                | FieldType::Level
                | FieldType::Uri
                | FieldType::ChildCount
                | FieldType::Formula { .. }
        )
    }

    /// Values that can only be computed after the row has an identifier.
    pub fn needs_identifier(&self) -> bool {
        matches!(
            self,
            FieldType::MaterializedPath | FieldType::Uri | FieldType::Formula { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Validator {
    Required,
    Regexp { pattern: String },
    Length { min: Option<usize>, max: Option<usize> },
    Like { pattern: String },
}

impl Validator {
    /// `None` when the value passes, otherwise the error message.
    pub fn check(&self, value: &Value) -> Result<Option<String>> {
        match self {
            Validator::Required => Ok(value
                .is_empty()
                .then(|| "Value is required".to_string())),
            Validator::Regexp { pattern } => {
                if value.is_null() {
                    return Ok(None);
                }
                let regex = Regex::new(pattern).map_err(|e| {
                    UmiError::UnexpectedValue(format!("Invalid validator pattern '{}': {}", pattern, e))
                })?;
                Ok((!regex.is_match(&value.to_string()))
                    .then(|| format!("Value does not match '{}'", pattern)))
            }
            Validator::Length { min, max } => {
                let length = match value {
                    Value::Null => 0,
                    other => other.to_string().chars().count(),
                };
                if min.is_some_and(|min| length < min) {
                    return Ok(Some(format!("Value is shorter than {}", min.unwrap_or(0))));
                }
                if max.is_some_and(|max| length > max) {
                    return Ok(Some(format!("Value is longer than {}", max.unwrap_or(0))));
                }
                Ok(None)
            }
            Validator::Like { pattern } => {
                if value.is_null() {
                    return Ok(None);
                }
                Ok((!eval_like(&value.to_string(), pattern, true)?)
                    .then(|| format!("Value does not match '{}'", pattern)))
            }
        }
    }
}

/// Column and default value a localized field uses for one locale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Localization {
    pub column: String,
    #[serde(default)]
    pub default: Value,
}

/// Immutable description of one field of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    field_type: FieldType,
    column: String,
    default: Value,
    read_only: bool,
    localizations: BTreeMap<String, Localization>,
    validators: Vec<Validator>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            read_only: field_type.is_system(),
            field_type,
            default: Value::Null,
            localizations: BTreeMap::new(),
            validators: Vec::new(),
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only || self.field_type.is_system();
        self
    }

    pub fn localize(mut self, locale: impl Into<String>, localization: Localization) -> Self {
        self.localizations.insert(locale.into(), localization);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_localized(&self) -> bool {
        !self.localizations.is_empty()
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.localizations.keys().map(String::as_str)
    }

    pub fn has_locale(&self, locale: &str) -> bool {
        self.localizations.contains_key(locale)
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Column for the given locale; `None` selects the unlocalized column.
    pub fn column_for(&self, locale: Option<&str>) -> Result<&str> {
        match locale {
            None => Ok(&self.column),
            Some(locale) => self
                .localizations
                .get(locale)
                .map(|l| l.column.as_str())
                .ok_or_else(|| {
                    UmiError::NonexistentEntity(format!(
                        "Field '{}' has no localization '{}'",
                        self.name, locale
                    ))
                }),
        }
    }

    pub fn default_for(&self, locale: Option<&str>) -> &Value {
        locale
            .and_then(|l| self.localizations.get(l))
            .map(|l| &l.default)
            .unwrap_or(&self.default)
    }

    /// Property full names this field contributes to an object.
    pub fn full_names(&self) -> Vec<String> {
        if self.is_localized() {
            self.locales().map(|l| full_name(&self.name, Some(l))).collect()
        } else {
            vec![self.name.clone()]
        }
    }

    /// Storage columns: one per locale for localized fields.
    pub fn columns(&self) -> Vec<Column> {
        let Some(data_type) = self.field_type.data_type() else {
            return Vec::new();
        };
        if self.is_localized() {
            self.localizations
                .values()
                .map(|l| Column::new(&l.column, data_type).default_value(l.default.clone()))
                .collect()
        } else {
            let mut column = Column::new(&self.column, data_type).default_value(self.default.clone());
            if matches!(self.field_type, FieldType::Identify | FieldType::Version) {
                column = column.not_null();
            }
            vec![column]
        }
    }
}

pub fn full_name(name: &str, locale: Option<&str>) -> String {
    match locale {
        Some(locale) => format!("{}{}{}", name, LOCALE_SEPARATOR, locale),
        None => name.to_string(),
    }
}

/// Splits `title#en-US` into (`title`, `Some("en-US")`).
pub fn split_full_name(full_name: &str) -> (&str, Option<&str>) {
    match full_name.split_once(LOCALE_SEPARATOR) {
        Some((name, locale)) => (name, Some(locale)),
        None => (full_name, None),
    }
}

use crate::core::Value;
use crate::orm::metadata::{FieldType, Validator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    #[default]
    Simple,
    Hierarchic,
}

/// Collection metadata as written in configuration.
///
/// ```json
/// {
///   "name": "news",
///   "kind": "simple",
///   "fields": [
///     {"name": "title", "type": "string", "validators": [{"type": "required"}]},
///     {"name": "rubric", "type": "belongsTo", "target": "rubric"}
///   ],
///   "types": {"base": {"fields": ["title", "rubric"]}}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default)]
    pub kind: CollectionKind,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub localizations: BTreeMap<String, LocalizationConfig>,
    #[serde(default)]
    pub validators: Vec<Validator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizationConfig {
    pub column: String,
    #[serde(default)]
    pub default: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeConfig {
    #[serde(default)]
    pub fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_config_parses() {
        let config: CollectionConfig = serde_json::from_value(serde_json::json!({
            "name": "news",
            "fields": [
                {"name": "title", "type": "string", "validators": [{"type": "required"}],
                 "localizations": {"en-US": {"column": "title_en"}}},
                {"name": "rubric", "type": "belongsTo", "target": "rubric", "readOnly": true}
            ],
            "types": {"base": {"fields": ["title", "rubric"]}}
        }))
        .unwrap();

        assert_eq!(config.kind, CollectionKind::Simple);
        assert_eq!(config.fields[0].field_type, FieldType::String);
        assert_eq!(config.fields[0].validators, vec![Validator::Required]);
        assert_eq!(config.fields[0].localizations["en-US"].column, "title_en");
        assert!(config.fields[1].read_only);
        assert_eq!(
            config.fields[1].field_type,
            FieldType::BelongsTo {
                target: "rubric".into()
            }
        );
    }
}

use crate::core::{Column, DataType, Record, Result, Schema, UmiError, Value};
use crate::storage::query::{Condition, SelectQuery, sort_records};
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Name of the auto-increment primary key column every table carries.
pub const PRIMARY_KEY: &str = "id";

/// Update of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(Value),
    Increment(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
    unique: Vec<String>,
}

impl TableSchema {
    /// The `id` column is added when absent.
    pub fn new(name: impl Into<String>, mut columns: Vec<Column>) -> Self {
        if !columns.iter().any(|c| c.name == PRIMARY_KEY) {
            columns.insert(0, Column::new(PRIMARY_KEY, DataType::Integer).not_null());
        }
        Self {
            name: name.into(),
            schema: Schema::new(columns),
            unique: Vec::new(),
        }
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Rows live in a persistent map so a whole table can be snapshotted in O(1).
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: OrdMap<i64, Record>,
    next_id: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: OrdMap::new(),
            next_id: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, id: i64) -> Option<&Record> {
        self.rows.get(&id)
    }

    pub fn insert(&mut self, mut record: Record) -> Result<i64> {
        let id = match record.get(PRIMARY_KEY) {
            Some(Value::Null) | None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
            Some(value) => {
                let id = value.as_i64().ok_or_else(|| {
                    UmiError::Storage(format!(
                        "Invalid primary key {} for table '{}'",
                        value,
                        self.schema.name()
                    ))
                })?;
                if self.rows.contains_key(&id) {
                    return Err(UmiError::Storage(format!(
                        "Duplicate primary key {} in table '{}'",
                        id,
                        self.schema.name()
                    )));
                }
                self.next_id = self.next_id.max(id + 1);
                id
            }
        };
        record.insert(PRIMARY_KEY.to_string(), Value::Integer(id));

        for column in self.schema.schema().columns() {
            record
                .entry(column.name.clone())
                .or_insert_with(|| column.default.clone());
        }
        self.validate_record(&record)?;
        self.check_uniqueness(&record, None)?;

        self.rows.insert(id, record);
        Ok(id)
    }

    /// Returns the number of rows the condition selected.
    pub fn update(
        &mut self,
        assignments: &[(String, Assignment)],
        condition: &Condition,
    ) -> Result<usize> {
        let targets = self.matching_ids(condition)?;
        for id in &targets {
            let Some(current) = self.rows.get(id) else {
                continue;
            };
            let mut record = current.clone();
            for (column, assignment) in assignments {
                if column == PRIMARY_KEY {
                    return Err(UmiError::Storage(format!(
                        "Primary key of table '{}' cannot be updated",
                        self.schema.name()
                    )));
                }
                let value = match assignment {
                    Assignment::Set(value) => value.clone(),
                    Assignment::Increment(step) => {
                        let base = record.get(column).and_then(Value::as_i64).unwrap_or(0);
                        Value::Integer(base + step)
                    }
                };
                record.insert(column.clone(), value);
            }
            self.validate_record(&record)?;
            self.check_uniqueness(&record, Some(*id))?;
            self.rows.insert(*id, record);
        }
        Ok(targets.len())
    }

    pub fn delete(&mut self, condition: &Condition) -> Result<usize> {
        let targets = self.matching_ids(condition)?;
        for id in &targets {
            self.rows.remove(id);
        }
        Ok(targets.len())
    }

    /// Filtered, ordered and paged scan. Joins are resolved by the caller.
    pub fn scan(&self, query: &SelectQuery, join: impl Fn(&mut Record) -> Result<()>) -> Result<Vec<Record>> {
        let mut results = Vec::new();
        for record in self.rows.values() {
            let mut record = record.clone();
            join(&mut record)?;
            let keep = match &query.condition {
                Some(condition) => condition.matches(&record)?,
                None => true,
            };
            if keep {
                results.push(record);
            }
        }

        if !query.order_by.is_empty() {
            sort_records(&mut results, &query.order_by)?;
        }

        let paged = results
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX));

        Ok(match &query.columns {
            None => paged.collect(),
            Some(columns) => paged
                .map(|record| {
                    record
                        .into_iter()
                        .filter(|(name, _)| {
                            name == PRIMARY_KEY
                                || name.contains('.')
                                || columns.iter().any(|c| c == name)
                        })
                        .collect()
                })
                .collect(),
        })
    }

    fn matching_ids(&self, condition: &Condition) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for (id, record) in self.rows.iter() {
            if condition.matches(record)? {
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    fn validate_record(&self, record: &Record) -> Result<()> {
        for name in record.keys() {
            if !self.schema.schema().has_column(name) {
                return Err(UmiError::Storage(format!(
                    "Column '{}' not found in table '{}'",
                    name,
                    self.schema.name()
                )));
            }
        }
        for column in self.schema.schema().columns() {
            column.validate(record.get(&column.name).unwrap_or(&Value::Null))?;
        }
        Ok(())
    }

    fn check_uniqueness(&self, record: &Record, ignore_id: Option<i64>) -> Result<()> {
        for column in &self.schema.unique {
            let Some(value) = record.get(column) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let duplicate = self
                .rows
                .iter()
                .any(|(id, row)| Some(*id) != ignore_id && row.get(column) == Some(value));
            if duplicate {
                return Err(UmiError::Storage(format!(
                    "Unique constraint violation: column '{}' of table '{}' already contains value {}",
                    column,
                    self.schema.name(),
                    value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn articles() -> Table {
        Table::new(
            TableSchema::new(
                "articles",
                vec![
                    Column::new("title", DataType::Text).not_null(),
                    Column::new("version", DataType::Integer).default_value(1),
                    Column::new("guid", DataType::Text),
                ],
            )
            .unique("guid"),
        )
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_insert_assigns_ids_and_defaults() {
        let mut table = articles();
        let first = table.insert(record(&[("title", "a".into())])).unwrap();
        let second = table.insert(record(&[("title", "b".into())])).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.get(1).unwrap()["version"], Value::Integer(1));
    }

    #[test]
    fn test_insert_rejects_unknown_columns_and_nulls() {
        let mut table = articles();
        assert!(table.insert(record(&[("title", "a".into()), ("nope", 1.into())])).is_err());
        assert!(table.insert(record(&[("version", 2.into())])).is_err());
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_versioned_update_reports_affected_rows() {
        let mut table = articles();
        let id = table.insert(record(&[("title", "a".into())])).unwrap();
        let bump = vec![
            ("title".to_string(), Assignment::Set("b".into())),
            ("version".to_string(), Assignment::Increment(1)),
        ];
        let condition = Condition::all(vec![
            Condition::equals(PRIMARY_KEY, id),
            Condition::equals("version", 1),
        ]);
        assert_eq!(table.update(&bump, &condition).unwrap(), 1);
        assert_eq!(table.update(&bump, &condition).unwrap(), 0);
        assert_eq!(table.get(id).unwrap()["version"], Value::Integer(2));
    }

    #[test]
    fn test_unique_column() {
        let mut table = articles();
        table
            .insert(record(&[("title", "a".into()), ("guid", "g".into())]))
            .unwrap();
        let err = table
            .insert(record(&[("title", "b".into()), ("guid", "g".into())]))
            .unwrap_err();
        assert!(err.to_string().contains("Unique constraint"));
    }
}

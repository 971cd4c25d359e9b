use super::change::Change;
use super::query::{Condition, SelectQuery};
use super::table::{Assignment, PRIMARY_KEY, Table, TableSchema};
use crate::core::{Record, Result, UmiError, Value};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct DatabaseState {
    tables: im::HashMap<String, Table>,
}

impl DatabaseState {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| UmiError::Storage(format!("Table '{}' not found", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| UmiError::Storage(format!("Table '{}' not found", name)))
    }

    fn select(&self, query: &SelectQuery) -> Result<Vec<Record>> {
        let table = self.table(&query.table)?;
        let joined = query
            .joins
            .iter()
            .map(|join| Ok((join, self.table(&join.table)?)))
            .collect::<Result<Vec<_>>>()?;

        table.scan(query, |record| {
            for (join, target) in &joined {
                let related = record
                    .get(&join.local_column)
                    .and_then(Value::as_i64)
                    .and_then(|id| target.get(id));
                for column in target.schema().schema().columns() {
                    let value = related
                        .and_then(|row| row.get(&column.name))
                        .cloned()
                        .unwrap_or(Value::Null);
                    record.insert(format!("{}.{}", join.alias, column.name), value);
                }
            }
            Ok(())
        })
    }
}

/// A named in-memory database, the unit a transaction spans.
#[derive(Debug)]
pub struct Database {
    name: String,
    state: Mutex<DatabaseState>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DatabaseState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Holds the database write lock until the transaction ends.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.state.lock()?;
        let backup = guard.clone();
        debug!(database = %self.name, "transaction started");
        Ok(Transaction {
            database: &self.name,
            guard,
            backup: Some(backup),
            changes: Vec::new(),
        })
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tx = self.begin()?;
        tx.create_table(schema)?;
        tx.commit()?;
        Ok(())
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock()?.tables.contains_key(name))
    }

    pub fn select(&self, query: &SelectQuery) -> Result<Vec<Record>> {
        self.state.lock()?.select(query)
    }

    pub fn count(&self, query: &SelectQuery) -> Result<usize> {
        Ok(self.state.lock()?.select(&query.count_variant())?.len())
    }

    pub fn find(&self, table: &str, id: i64) -> Result<Option<Record>> {
        Ok(self.state.lock()?.table(table)?.get(id).cloned())
    }

    pub fn insert(&self, table: &str, record: Record) -> Result<i64> {
        let mut tx = self.begin()?;
        let id = tx.insert(table, record)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn update(
        &self,
        table: &str,
        assignments: &[(String, Assignment)],
        condition: &Condition,
    ) -> Result<usize> {
        let mut tx = self.begin()?;
        let affected = tx.update(table, assignments, condition)?;
        tx.commit()?;
        Ok(affected)
    }

    pub fn delete(&self, table: &str, condition: &Condition) -> Result<usize> {
        let mut tx = self.begin()?;
        let affected = tx.delete(table, condition)?;
        tx.commit()?;
        Ok(affected)
    }
}

/// Exclusive write access to one database. Dropping an uncommitted
/// transaction rolls it back.
pub struct Transaction<'db> {
    database: &'db str,
    guard: MutexGuard<'db, DatabaseState>,
    backup: Option<DatabaseState>,
    changes: Vec<Change>,
}

impl Transaction<'_> {
    pub fn database(&self) -> &str {
        self.database
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        if self.guard.tables.contains_key(&name) {
            return Err(UmiError::Storage(format!("Table '{}' already exists", name)));
        }
        self.guard.tables.insert(name.clone(), Table::new(schema));
        self.changes.push(Change::CreateTable { table: name });
        Ok(())
    }

    pub fn insert(&mut self, table: &str, record: Record) -> Result<i64> {
        let id = self.guard.table_mut(table)?.insert(record.clone())?;
        self.changes.push(Change::InsertRow {
            table: table.to_string(),
            id,
            row: record,
        });
        Ok(id)
    }

    pub fn update(
        &mut self,
        table: &str,
        assignments: &[(String, Assignment)],
        condition: &Condition,
    ) -> Result<usize> {
        let affected = self.guard.table_mut(table)?.update(assignments, condition)?;
        self.changes.push(Change::UpdateRows {
            table: table.to_string(),
            affected,
        });
        Ok(affected)
    }

    pub fn update_by_id(
        &mut self,
        table: &str,
        id: i64,
        assignments: &[(String, Assignment)],
    ) -> Result<usize> {
        self.update(table, assignments, &Condition::equals(PRIMARY_KEY, id))
    }

    pub fn delete(&mut self, table: &str, condition: &Condition) -> Result<usize> {
        let affected = self.guard.table_mut(table)?.delete(condition)?;
        self.changes.push(Change::DeleteRows {
            table: table.to_string(),
            affected,
        });
        Ok(affected)
    }

    /// Reads see the transaction's own uncommitted writes.
    pub fn select(&self, query: &SelectQuery) -> Result<Vec<Record>> {
        self.guard.select(query)
    }

    pub fn find(&self, table: &str, id: i64) -> Result<Option<Record>> {
        Ok(self.guard.table(table)?.get(id).cloned())
    }

    pub fn commit(mut self) -> Result<Vec<Change>> {
        self.backup = None;
        debug!(
            database = %self.database,
            changes = self.changes.len(),
            "transaction committed"
        );
        Ok(std::mem::take(&mut self.changes))
    }

    pub fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if let Some(backup) = self.backup.take() {
            *self.guard = backup;
            debug!(
                database = %self.database,
                discarded = self.changes.len(),
                "transaction rolled back"
            );
            self.changes.clear();
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    fn database() -> Database {
        let db = Database::new("default");
        db.create_table(TableSchema::new(
            "news",
            vec![Column::new("title", DataType::Text)],
        ))
        .unwrap();
        db.create_table(TableSchema::new(
            "rubric",
            vec![Column::new("name", DataType::Text)],
        ))
        .unwrap();
        db
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_commit_persists_writes() {
        let db = database();
        let mut tx = db.begin().unwrap();
        tx.insert("news", record(&[("title", "a".into())])).unwrap();
        let changes = tx.commit().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(db.select(&SelectQuery::new("news")).unwrap().len(), 1);
    }

    #[test]
    fn test_drop_rolls_back() {
        let db = database();
        {
            let mut tx = db.begin().unwrap();
            tx.insert("news", record(&[("title", "a".into())])).unwrap();
            assert_eq!(tx.select(&SelectQuery::new("news")).unwrap().len(), 1);
        }
        assert!(db.select(&SelectQuery::new("news")).unwrap().is_empty());
    }

    #[test]
    fn test_explicit_rollback_restores_ids() {
        let db = database();
        let mut tx = db.begin().unwrap();
        tx.insert("news", record(&[("title", "a".into())])).unwrap();
        tx.rollback();
        assert_eq!(db.insert("news", record(&[("title", "b".into())])).unwrap(), 1);
    }

    #[test]
    fn test_join_exposes_aliased_columns() {
        let db = database();
        db.create_table(TableSchema::new(
            "posts",
            vec![
                Column::new("title", DataType::Text),
                Column::new("rubric_id", DataType::Integer),
            ],
        ))
        .unwrap();
        let rubric = db.insert("rubric", record(&[("name", "tech".into())])).unwrap();
        db.insert(
            "posts",
            record(&[("title", "p".into()), ("rubric_id", rubric.into())]),
        )
        .unwrap();

        let rows = db
            .select(&SelectQuery::new("posts").join("rubric", "rubric", "rubric_id"))
            .unwrap();
        assert_eq!(rows[0]["rubric.name"], Value::from("tech"));
    }

    #[test]
    fn test_count_ignores_paging() {
        let db = database();
        for title in ["a", "b", "c"] {
            db.insert("news", record(&[("title", title.into())])).unwrap();
        }
        let query = SelectQuery::new("news").limit(1).offset(1);
        assert_eq!(db.select(&query).unwrap().len(), 1);
        assert_eq!(db.count(&query).unwrap(), 3);
    }
}

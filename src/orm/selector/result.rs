use crate::core::{Record, Result, Value};
use crate::facade::Orm;
use crate::orm::manager::ObjectKey;
use crate::orm::metadata::CollectionMetadata;
use std::sync::Arc;

/// Rows of an executed selector. Objects are hydrated when a row is
/// fetched, and the set can be walked again after [`ResultSet::rewind`].
#[derive(Debug, Clone)]
pub struct ResultSet {
    metadata: Arc<CollectionMetadata>,
    rows: Vec<Record>,
    position: usize,
    with: Vec<(String, Arc<CollectionMetadata>)>,
}

impl ResultSet {
    pub(crate) fn new(
        metadata: Arc<CollectionMetadata>,
        rows: Vec<Record>,
        with: Vec<(String, Arc<CollectionMetadata>)>,
    ) -> Self {
        Self {
            metadata,
            rows,
            position: 0,
            with,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Next object, or `None` at the end.
    pub fn fetch(&mut self, orm: &mut Orm) -> Result<Option<ObjectKey>> {
        let Some(row) = self.rows.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let mut base = Record::new();
        let mut joined: Vec<Record> = vec![Record::new(); self.with.len()];
        for (column, value) in row {
            match column.split_once('.') {
                Some((alias, target_column)) => {
                    if let Some(index) = self.with.iter().position(|(field, _)| field == alias) {
                        joined[index].insert(target_column.to_string(), value.clone());
                    }
                }
                None => {
                    base.insert(column.clone(), value.clone());
                }
            }
        }

        let key = orm.hydrate(&self.metadata, &base)?;
        for ((field, target), record) in self.with.iter().zip(joined) {
            let related = match record.get(crate::storage::PRIMARY_KEY) {
                Some(Value::Null) | None => None,
                Some(_) => Some(orm.hydrate(target, &record)?),
            };
            orm.prepare_related(key, field, related)?;
        }
        Ok(Some(key))
    }

    pub fn iter<'a>(&'a mut self, orm: &'a mut Orm) -> ResultIter<'a> {
        ResultIter { set: self, orm }
    }

    /// Every object of the set, from the first row.
    pub fn keys(&mut self, orm: &mut Orm) -> Result<Vec<ObjectKey>> {
        self.rewind();
        self.iter(orm).collect()
    }
}

pub struct ResultIter<'a> {
    set: &'a mut ResultSet,
    orm: &'a mut Orm,
}

impl Iterator for ResultIter<'_> {
    type Item = Result<ObjectKey>;

    fn next(&mut self) -> Option<Self::Item> {
        self.set.fetch(self.orm).transpose()
    }
}

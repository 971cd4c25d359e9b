use super::database::Database;
use crate::core::{Result, UmiError};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_CONNECTION: &str = "default";

/// Named database connections shared by every collection.
///
/// Iteration is ordered by name, which is also the order in which
/// multi-connection transactions acquire their locks.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Arc<Database>>,
}

impl ConnectionRegistry {
    /// Registry with a single `default` connection.
    pub fn new() -> Self {
        let mut registry = Self {
            connections: BTreeMap::new(),
        };
        registry.register(Database::new(DEFAULT_CONNECTION));
        registry
    }

    pub fn register(&mut self, database: Database) -> Arc<Database> {
        let database = Arc::new(database);
        self.connections
            .insert(database.name().to_string(), Arc::clone(&database));
        database
    }

    pub fn get(&self, name: &str) -> Result<Arc<Database>> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| UmiError::NonexistentEntity(format!("Connection '{}' is not registered", name)))
    }

    pub fn default_connection(&self) -> Result<Arc<Database>> {
        self.get(DEFAULT_CONNECTION)
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connection_exists() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.default_connection().unwrap().name(), "default");
        assert!(registry.get("archive").is_err());
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry = ConnectionRegistry::new();
        registry.register(Database::new("archive"));
        assert_eq!(registry.names(), vec!["archive", "default"]);
    }
}

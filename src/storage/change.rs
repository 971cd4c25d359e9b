// ============================================================================
// Transaction Change Log
// ============================================================================
//
// Every statement executed inside a transaction is recorded here so callers
// can report what a commit touched or what a rollback discarded.
//
// ============================================================================

use crate::core::Record;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    InsertRow { table: String, id: i64, row: Record },

    UpdateRows { table: String, affected: usize },

    DeleteRows { table: String, affected: usize },

    CreateTable { table: String },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. }
            | Change::UpdateRows { table, .. }
            | Change::DeleteRows { table, .. }
            | Change::CreateTable { table } => table,
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. })
    }

    /// Rows written by the statement.
    pub fn affected(&self) -> usize {
        match self {
            Change::InsertRow { .. } => 1,
            Change::UpdateRows { affected, .. } | Change::DeleteRows { affected, .. } => *affected,
            Change::CreateTable { .. } => 0,
        }
    }
}

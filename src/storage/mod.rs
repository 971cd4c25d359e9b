pub mod change;
pub mod database;
pub mod query;
pub mod registry;
pub mod table;

pub use change::Change;
pub use database::{Database, Transaction};
pub use query::{Condition, Direction, GroupMode, Join, Operator, SelectQuery};
pub use registry::{ConnectionRegistry, DEFAULT_CONNECTION};
pub use table::{Assignment, PRIMARY_KEY, Table, TableSchema};

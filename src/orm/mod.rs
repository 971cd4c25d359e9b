//! Object-relational layer: metadata, objects with lazily loaded
//! properties, an identity map, the unit of work and the selector.

pub mod hierarchy;
pub mod manager;
pub mod metadata;
pub mod object;
pub mod persister;
pub mod property;
pub mod selector;

pub use hierarchy::HierarchicCollection;
pub use manager::{ObjectKey, ObjectManager};
pub use object::{Object, ObjectState};
pub use persister::{CommitReport, ObjectPersister};
pub use property::Property;
pub use selector::{FieldCondition, ResultSet, Selector};

// ============================================================================
// UMI framework core
// ============================================================================
//
// ORM with a unit of work and optimistic locking, role based access control,
// and a hierarchical MVC dispatcher with URL routing.

pub mod core;
pub mod storage;
pub mod config;
pub mod orm;
pub mod facade;
pub mod acl;
pub mod http;
pub mod route;
pub mod hmvc;
pub mod web;
mod expression;

// Re-export main types for convenience
pub use core::{Result, UmiError, Value, DataType, Record};
pub use facade::Orm;
pub use orm::{ObjectKey, ObjectState, Selector, HierarchicCollection};
pub use storage::{ConnectionRegistry, Database, Condition, Direction, GroupMode};

// ============================================================================
// Access control and request dispatch
// ============================================================================

pub use acl::{AclManager, Permission};
pub use hmvc::{Component, ComponentBuilder, Dispatcher, Invocation};
pub use self::http::{Request, Response};
pub use route::{Route, RouteResult, Router};

//! Role based access control.
//!
//! Roles form an inheritance graph. Rules grant or deny operations on
//! resources per role, with `*` standing for any resource or operation.

pub mod manager;
pub mod resource;

pub use manager::{AclManager, Permission, WILDCARD};
pub use resource::{AclAssertion, AclResource, RoleProvider};

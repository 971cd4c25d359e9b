//! Hierarchical MVC: a tree of components, each routing the part of the URL
//! it is given either to a child component or to one of its controllers.

pub mod component;
pub mod context;
pub mod controller;
pub mod dispatcher;

pub use component::{COMPONENT_PATH_SEPARATOR, Component, ComponentBuilder, ControllerEntry, DispatchHook};
pub use context::{CancelOnDrop, CancellationFlag, DispatchContext};
pub use controller::{Controller, Invocation, Widget};
pub use dispatcher::Dispatcher;

/// Route parameter naming the child component to descend into.
pub const COMPONENT_MATCH: &str = "component";
/// Route parameter naming the controller to invoke.
pub const CONTROLLER_MATCH: &str = "controller";
pub const ERROR_CONTROLLER: &str = "error";
pub const ERROR_WIDGET: &str = "error";
/// ACL operation checked for components, controllers and widgets.
pub const EXECUTE_OPERATION: &str = "execute";

pub fn component_resource(name: &str) -> String {
    format!("component:{}", name)
}

pub fn controller_resource(name: &str) -> String {
    format!("controller:{}", name)
}

pub fn widget_resource(name: &str) -> String {
    format!("widget:{}", name)
}

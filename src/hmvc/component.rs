use super::context::DispatchContext;
use super::controller::{Controller, Invocation, Widget};
use crate::acl::AclManager;
use crate::config::RouteConfig;
use crate::core::Result;
use crate::http::{Request, Response};
use crate::route::{Route, Router};
use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Separates component names in a component path, e.g. `site.blog`.
pub const COMPONENT_PATH_SEPARATOR: char = '.';

/// Hooks run around a component's part of the dispatch.
pub trait DispatchHook: Send + Sync {
    /// Returning a response skips routing below this component.
    fn on_dispatch_request(
        &self,
        _context: &DispatchContext,
        _request: &Request,
    ) -> Result<Option<Response>> {
        Ok(None)
    }

    fn on_dispatch_response(&self, _context: &DispatchContext, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// A controller with the methods it accepts. `None` accepts any method.
#[derive(Clone)]
pub struct ControllerEntry {
    controller: Arc<dyn Controller>,
    methods: Option<Vec<Method>>,
}

impl ControllerEntry {
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods
            .as_ref()
            .is_none_or(|methods| methods.contains(method))
    }
}

struct ChildSlot {
    builder: ComponentBuilder,
    instance: OnceLock<Arc<Component>>,
}

/// Node of the HMVC tree.
pub struct Component {
    name: String,
    path: String,
    router: Router,
    controllers: HashMap<String, ControllerEntry>,
    widgets: HashMap<String, Arc<dyn Widget>>,
    layout: Option<String>,
    hooks: Vec<Arc<dyn DispatchHook>>,
    acl: Option<Arc<AclManager>>,
    children: BTreeMap<String, ChildSlot>,
}

impl Component {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn controller(&self, name: &str) -> Option<&ControllerEntry> {
        self.controllers.get(name)
    }

    pub fn widget(&self, name: &str) -> Option<&Arc<dyn Widget>> {
        self.widgets.get(name)
    }

    /// Name of the controller wrapping responses that are not completed.
    pub fn layout(&self) -> Option<&str> {
        self.layout.as_deref()
    }

    pub fn hooks(&self) -> &[Arc<dyn DispatchHook>] {
        &self.hooks
    }

    pub fn acl(&self) -> Option<&Arc<AclManager>> {
        self.acl.as_ref()
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Child component, instantiated on first use.
    pub fn child(&self, name: &str) -> Option<Arc<Component>> {
        let slot = self.children.get(name)?;
        let child = slot.instance.get_or_init(|| {
            let path = format!("{}{}{}", self.path, COMPONENT_PATH_SEPARATOR, name);
            Arc::new(slot.builder.instantiate(path))
        });
        Some(Arc::clone(child))
    }

    pub fn is_child_loaded(&self, name: &str) -> bool {
        self.children
            .get(name)
            .is_some_and(|slot| slot.instance.get().is_some())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("path", &self.path)
            .field("controllers", &self.controllers.keys().collect::<Vec<_>>())
            .field("widgets", &self.widgets.keys().collect::<Vec<_>>())
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Definition a component is instantiated from.
#[derive(Clone, Default)]
pub struct ComponentBuilder {
    name: String,
    router: Router,
    controllers: HashMap<String, ControllerEntry>,
    widgets: HashMap<String, Arc<dyn Widget>>,
    layout: Option<String>,
    hooks: Vec<Arc<dyn DispatchHook>>,
    acl: Option<Arc<AclManager>>,
    children: BTreeMap<String, ComponentBuilder>,
}

impl ComponentBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.router = self.router.route(route);
        self
    }

    pub fn routes(mut self, configs: &[RouteConfig]) -> Result<Self> {
        for config in configs {
            self.router = self.router.route(Route::from_config(config)?);
        }
        Ok(self)
    }

    pub fn controller<F>(self, name: &str, controller: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Response> + Send + Sync + 'static,
    {
        self.controller_instance(name, Arc::new(controller))
    }

    /// Controller that only answers the given methods.
    pub fn controller_for<F>(mut self, name: &str, methods: &[Method], controller: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Response> + Send + Sync + 'static,
    {
        self.controllers.insert(
            name.to_string(),
            ControllerEntry {
                controller: Arc::new(controller),
                methods: Some(methods.to_vec()),
            },
        );
        self
    }

    pub fn controller_instance(mut self, name: &str, controller: Arc<dyn Controller>) -> Self {
        self.controllers.insert(
            name.to_string(),
            ControllerEntry {
                controller,
                methods: None,
            },
        );
        self
    }

    pub fn widget<F>(self, name: &str, widget: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<String> + Send + Sync + 'static,
    {
        self.widget_instance(name, Arc::new(widget))
    }

    pub fn widget_instance(mut self, name: &str, widget: Arc<dyn Widget>) -> Self {
        self.widgets.insert(name.to_string(), widget);
        self
    }

    pub fn layout(mut self, controller: &str) -> Self {
        self.layout = Some(controller.to_string());
        self
    }

    pub fn hook(mut self, hook: Arc<dyn DispatchHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn acl(mut self, acl: Arc<AclManager>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn child(mut self, child: ComponentBuilder) -> Self {
        self.children.insert(child.name.clone(), child);
        self
    }

    /// Builds the root component. Children stay definitions until reached.
    pub fn build(self) -> Arc<Component> {
        let path = self.name.clone();
        Arc::new(self.instantiate(path))
    }

    fn instantiate(&self, path: String) -> Component {
        Component {
            name: self.name.clone(),
            path,
            router: self.router.clone(),
            controllers: self.controllers.clone(),
            widgets: self.widgets.clone(),
            layout: self.layout.clone(),
            hooks: self.hooks.clone(),
            acl: self.acl.clone(),
            children: self
                .children
                .iter()
                .map(|(name, builder)| {
                    (
                        name.clone(),
                        ChildSlot {
                            builder: builder.clone(),
                            instance: OnceLock::new(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl fmt::Debug for ComponentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentBuilder")
            .field("name", &self.name)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_are_instantiated_lazily() {
        let root = ComponentBuilder::new("site")
            .child(ComponentBuilder::new("blog").child(ComponentBuilder::new("posts")))
            .build();

        assert_eq!(root.path(), "site");
        assert!(!root.is_child_loaded("blog"));
        let blog = root.child("blog").unwrap();
        assert!(root.is_child_loaded("blog"));
        assert_eq!(blog.path(), "site.blog");
        assert_eq!(blog.child("posts").unwrap().path(), "site.blog.posts");
        assert!(Arc::ptr_eq(&blog, &root.child("blog").unwrap()));
        assert!(root.child("shop").is_none());
    }

    #[test]
    fn test_controller_methods() {
        let component = ComponentBuilder::new("site")
            .controller("index", |_: &Invocation<'_>| Ok(Response::new("index")))
            .controller_for("save", &[Method::POST], |_: &Invocation<'_>| Ok(Response::new("saved")))
            .build();

        assert!(component.controller("index").unwrap().allows(&Method::DELETE));
        let save = component.controller("save").unwrap();
        assert!(save.allows(&Method::POST));
        assert!(!save.allows(&Method::GET));
    }
}

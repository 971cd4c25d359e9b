use super::component::Component;
use super::context::{CancellationFlag, DispatchContext};
use super::controller::Invocation;
use super::{
    COMPONENT_MATCH, CONTROLLER_MATCH, ERROR_CONTROLLER, ERROR_WIDGET, EXECUTE_OPERATION,
    component_resource, controller_resource, widget_resource,
};
use crate::core::{Result, UmiError};
use crate::http::{Request, Response};
use crate::route::RouteResult;
use im::Vector;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};

#[derive(Default)]
struct DispatchState {
    request: Option<Arc<Request>>,
    stack: Vector<DispatchContext>,
    current: Option<DispatchContext>,
}

/// Runs one request through the component tree.
///
/// Holds request-scoped state, so each request gets its own dispatcher. The
/// component tree itself is shared.
pub struct Dispatcher {
    initial: Arc<Component>,
    roles: Vec<String>,
    deadline: Option<Instant>,
    cancellation: Option<CancellationFlag>,
    state: RefCell<DispatchState>,
}

impl Dispatcher {
    pub fn new(initial: Arc<Component>) -> Self {
        Self {
            initial,
            roles: Vec::new(),
            deadline: None,
            cancellation: None,
            state: RefCell::new(DispatchState::default()),
        }
    }

    /// Roles ACL checks are made for.
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    pub fn initial_component(&self) -> &Arc<Component> {
        &self.initial
    }

    pub fn current_request(&self) -> Option<Arc<Request>> {
        self.state.borrow().request.clone()
    }

    /// Paths of the components on the call stack, outermost first.
    pub fn call_stack(&self) -> Vec<String> {
        self.state
            .borrow()
            .stack
            .iter()
            .map(|ctx| ctx.component().path().to_string())
            .collect()
    }

    pub fn dispatch(&self, request: Request) -> Result<Response> {
        let span = info_span!("dispatch", method = %request.method(), path = %request.path());
        let _entered = span.enter();

        let path = request.path().to_string();
        {
            let mut state = self.state.borrow_mut();
            state.request = Some(Arc::new(request));
            state.stack = Vector::new();
            state.current = None;
        }

        let result = self
            .dispatch_component(Arc::clone(&self.initial), &path, String::new())
            .and_then(|response| self.process_response(response, self.stack_depth()));

        match result {
            Ok(response) => {
                debug!(status = %response.status(), "request dispatched");
                Ok(response)
            }
            Err(err @ (UmiError::DeadlineExceeded(_) | UmiError::Cancelled(_))) => {
                warn!(error = %err, "dispatch aborted");
                Err(err)
            }
            Err(err) => self.recover(err),
        }
    }

    fn dispatch_component(&self, component: Arc<Component>, url: &str, base_url: String) -> Result<Response> {
        self.check_limits(&format!("routing in component '{}'", component.path()))?;

        let route = component.router().match_url(url);
        debug!(
            component = component.path(),
            matched = %route.matched_url,
            unmatched = %route.unmatched_url,
            "route matched"
        );
        let context = DispatchContext::new(Arc::clone(&component), route.clone(), base_url.clone());
        self.state.borrow_mut().stack.push_back(context.clone());

        let request = self.request()?;
        for hook in component.hooks() {
            if let Some(response) = hook.on_dispatch_request(&context, &request)? {
                debug!(component = component.path(), "request answered by hook");
                return Ok(response);
            }
        }

        if let Some(child_name) = route.get(COMPONENT_MATCH) {
            let child = component.child(child_name).ok_or_else(|| {
                UmiError::HttpNotFound(format!(
                    "Component '{}' has no child component '{}'",
                    component.path(),
                    child_name
                ))
            })?;
            self.authorize(&component, &component_resource(child_name))?;
            let base_url = format!("{}{}", base_url, route.matched_url);
            return self.dispatch_component(child, &route.unmatched_url, base_url);
        }

        if let Some(controller_name) = route.get(CONTROLLER_MATCH) {
            if route.is_fully_matched() {
                let entry = component.controller(controller_name).ok_or_else(|| {
                    UmiError::HttpNotFound(format!(
                        "Component '{}' has no controller '{}'",
                        component.path(),
                        controller_name
                    ))
                })?;
                if !entry.allows(request.method()) {
                    return Err(UmiError::HttpMethodNotAllowed(format!(
                        "Controller '{}' of component '{}' does not accept {}",
                        controller_name,
                        component.path(),
                        request.method()
                    )));
                }
                self.authorize(&component, &controller_resource(controller_name))?;
                self.check_limits(&format!("invoking controller '{}'", controller_name))?;

                debug!(component = component.path(), controller = controller_name, "invoking controller");
                let params = route.matches.clone();
                let controller = Arc::clone(entry.controller());
                return self.with_current(context, |context| {
                    controller.call(&Invocation::new(self, request, context, params))
                });
            }
        }

        Err(UmiError::HttpNotFound(format!(
            "No route of component '{}' matches '{}'",
            component.path(),
            url
        )))
    }

    /// Passes the response out through the first `depth` frames, innermost
    /// first.
    fn process_response(&self, mut response: Response, depth: usize) -> Result<Response> {
        let stack = self.state.borrow().stack.clone();
        let request = self.request()?;

        for context in stack.iter().take(depth).rev() {
            if response.is_redirect() {
                return Ok(response);
            }
            self.check_limits(&format!(
                "processing the response of component '{}'",
                context.component().path()
            ))?;

            let component = context.component();
            if !response.is_completed() {
                if let Some(layout) = component.layout() {
                    let entry = component.controller(layout).ok_or_else(|| {
                        UmiError::Runtime(format!(
                            "Layout controller '{}' of component '{}' does not exist",
                            layout,
                            component.path()
                        ))
                    })?;
                    let controller = Arc::clone(entry.controller());
                    let params = context.route().matches.clone();
                    response = self.with_current(context.clone(), |ctx| {
                        controller.call(
                            &Invocation::new(self, Arc::clone(&request), ctx, params).with_content(response),
                        )
                    })?;
                }
            }

            for hook in component.hooks() {
                response = hook.on_dispatch_response(context, response)?;
            }
        }
        Ok(response)
    }

    /// Walks the stack from the innermost frame looking for an error
    /// controller that can render `err`.
    fn recover(&self, err: UmiError) -> Result<Response> {
        let stack = self.state.borrow().stack.clone();
        let request = self.request()?;

        for (depth, context) in stack.iter().enumerate().rev() {
            let Some(entry) = context.component().controller(ERROR_CONTROLLER) else {
                continue;
            };
            let controller = Arc::clone(entry.controller());
            let params = context.route().matches.clone();
            let handled = self
                .with_current(context.clone(), |ctx| {
                    controller.call(&Invocation::new(self, Arc::clone(&request), ctx, params).with_error(&err))
                })
                .and_then(|response| self.process_response(response, depth + 1));

            match handled {
                Ok(response) => {
                    debug!(component = context.component().path(), error = %err, "error handled");
                    return Ok(response);
                }
                Err(secondary) => {
                    warn!(
                        component = context.component().path(),
                        error = %err,
                        secondary = %secondary,
                        "error controller failed"
                    );
                }
            }
        }

        Err(err)
    }

    /// Renders a widget. `/a.b.name` starts at the initial component, anything
    /// else at the component currently executing. Failures are rendered by
    /// the nearest `error` widget, or become the error message.
    pub fn widget(&self, uri: &str, params: BTreeMap<String, String>) -> String {
        match self.render_widget(uri, &params) {
            Ok(content) => content,
            Err(err) => {
                warn!(widget = uri, error = %err, "widget failed");
                err.to_string()
            }
        }
    }

    fn render_widget(&self, uri: &str, params: &BTreeMap<String, String>) -> Result<String> {
        let (start, path) = match uri.strip_prefix('/') {
            Some(path) => (self.root_context(), path),
            None => (self.current_context(), uri),
        };

        let ancestors = self.ancestors_of(&start);
        let mut chain = vec![start];
        let result = self.resolve_widget(&mut chain, path, params);
        let err = match result {
            Ok(content) => return Ok(content),
            Err(err) => err,
        };

        for context in ancestors.iter().chain(chain.iter()).rev() {
            let Some(widget) = context.component().widget(ERROR_WIDGET) else {
                continue;
            };
            let widget = Arc::clone(widget);
            let request = self.request()?;
            let rendered = self.with_current(context.clone(), |ctx| {
                widget.render(&Invocation::new(self, request, ctx, params.clone()).with_error(&err))
            });
            match rendered {
                Ok(content) => return Ok(content),
                Err(secondary) => {
                    warn!(component = context.component().path(), error = %secondary, "error widget failed");
                }
            }
        }
        Err(err)
    }

    fn resolve_widget(
        &self,
        chain: &mut Vec<DispatchContext>,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut segments: Vec<&str> = path.split(super::component::COMPONENT_PATH_SEPARATOR).collect();
        let name = segments
            .pop()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| UmiError::UnexpectedValue(format!("Invalid widget URI '{}'", path)))?;

        for segment in segments {
            let Some(parent) = chain.last().cloned() else {
                break;
            };
            self.check_limits(&format!("resolving widget '{}'", path))?;
            let child = parent.component().child(segment).ok_or_else(|| {
                UmiError::NonexistentEntity(format!(
                    "Component '{}' has no child component '{}'",
                    parent.component().path(),
                    segment
                ))
            })?;
            self.authorize(parent.component(), &component_resource(segment))?;
            chain.push(DispatchContext::new(
                child,
                RouteResult::default(),
                parent.base_url().to_string(),
            ));
        }

        let context = chain
            .last()
            .cloned()
            .ok_or_else(|| UmiError::Runtime("Widget resolution lost its context".to_string()))?;
        let widget = context.component().widget(name).cloned().ok_or_else(|| {
            UmiError::NonexistentEntity(format!(
                "Component '{}' has no widget '{}'",
                context.component().path(),
                name
            ))
        })?;
        self.authorize(context.component(), &widget_resource(name))?;
        self.check_limits(&format!("rendering widget '{}'", name))?;

        let request = self.request()?;
        self.with_current(context, |ctx| {
            widget.render(&Invocation::new(self, request, ctx, params.clone()))
        })
    }

    fn request(&self) -> Result<Arc<Request>> {
        self.state
            .borrow()
            .request
            .clone()
            .ok_or_else(|| UmiError::Runtime("No request is being dispatched".to_string()))
    }

    fn stack_depth(&self) -> usize {
        self.state.borrow().stack.len()
    }

    fn root_context(&self) -> DispatchContext {
        let state = self.state.borrow();
        state
            .stack
            .front()
            .cloned()
            .unwrap_or_else(|| DispatchContext::new(Arc::clone(&self.initial), RouteResult::default(), String::new()))
    }

    /// Stack frames of the components enclosing `context`, outermost first.
    fn ancestors_of(&self, context: &DispatchContext) -> Vec<DispatchContext> {
        let path = context.component().path();
        let state = self.state.borrow();
        state
            .stack
            .iter()
            .filter(|frame| {
                path.strip_prefix(frame.component().path())
                    .and_then(|rest| rest.strip_prefix(super::component::COMPONENT_PATH_SEPARATOR))
                    .is_some()
            })
            .cloned()
            .collect()
    }

    fn current_context(&self) -> DispatchContext {
        let current = self.state.borrow().current.clone();
        current.unwrap_or_else(|| self.root_context())
    }

    /// Runs `f` with `context` as the current one, restoring the previous
    /// context afterwards.
    fn with_current<T>(&self, context: DispatchContext, f: impl FnOnce(DispatchContext) -> T) -> T {
        let previous = self.state.borrow_mut().current.replace(context.clone());
        let result = f(context);
        self.state.borrow_mut().current = previous;
        result
    }

    fn authorize(&self, component: &Component, resource: &str) -> Result<()> {
        let Some(acl) = component.acl() else {
            return Ok(());
        };
        if !acl.has_resource(resource) {
            return Ok(());
        }
        if acl.is_allowed(&self.roles, resource, EXECUTE_OPERATION)? {
            Ok(())
        } else {
            debug!(component = component.path(), resource, roles = ?self.roles, "access denied");
            Err(UmiError::ResourceAccessForbidden {
                resource: resource.to_string(),
            })
        }
    }

    fn check_limits(&self, step: &str) -> Result<()> {
        if self.cancellation.as_ref().is_some_and(CancellationFlag::is_cancelled) {
            return Err(UmiError::Cancelled(step.to_string()));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(UmiError::DeadlineExceeded(step.to_string()));
        }
        Ok(())
    }
}

use super::context::DispatchContext;
use super::dispatcher::Dispatcher;
use crate::core::{Result, UmiError};
use crate::http::{Request, Response};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Produces the response for a matched URL.
pub trait Controller: Send + Sync {
    fn call(&self, invocation: &Invocation<'_>) -> Result<Response>;
}

impl<F> Controller for F
where
    F: Fn(&Invocation<'_>) -> Result<Response> + Send + Sync,
{
    fn call(&self, invocation: &Invocation<'_>) -> Result<Response> {
        self(invocation)
    }
}

/// Renders a fragment embedded in a page.
pub trait Widget: Send + Sync {
    fn render(&self, invocation: &Invocation<'_>) -> Result<String>;
}

impl<F> Widget for F
where
    F: Fn(&Invocation<'_>) -> Result<String> + Send + Sync,
{
    fn render(&self, invocation: &Invocation<'_>) -> Result<String> {
        self(invocation)
    }
}

/// Everything a controller or widget gets to see while it runs.
pub struct Invocation<'a> {
    dispatcher: &'a Dispatcher,
    request: Arc<Request>,
    context: DispatchContext,
    params: BTreeMap<String, String>,
    error: Option<&'a UmiError>,
    content: Option<Response>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        dispatcher: &'a Dispatcher,
        request: Arc<Request>,
        context: DispatchContext,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            dispatcher,
            request,
            context,
            params,
            error: None,
            content: None,
        }
    }

    pub(crate) fn with_error(mut self, error: &'a UmiError) -> Self {
        self.error = Some(error);
        self
    }

    pub(crate) fn with_content(mut self, content: Response) -> Self {
        self.content = Some(content);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    pub fn component_path(&self) -> &str {
        self.context.component().path()
    }

    /// Route parameters for controllers, call parameters for widgets.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The failure being handled, for error controllers and widgets.
    pub fn error(&self) -> Option<&UmiError> {
        self.error
    }

    /// The inner response, for layout controllers.
    pub fn content(&self) -> Option<&Response> {
        self.content.as_ref()
    }

    pub fn widget(&self, uri: &str) -> String {
        self.dispatcher.widget(uri, BTreeMap::new())
    }

    pub fn widget_with(&self, uri: &str, params: BTreeMap<String, String>) -> String {
        self.dispatcher.widget(uri, params)
    }

    /// Absolute URL of a route of the current component.
    pub fn url(&self, route: &str, params: &BTreeMap<String, String>) -> Result<String> {
        let local = self.context.component().router().assemble(route, params)?;
        Ok(format!("{}{}", self.context.base_url(), local))
    }
}

use super::component::Component;
use crate::route::RouteResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One frame of the dispatch call stack: a component and what its router
/// made of the URL handed to it.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    component: Arc<Component>,
    route: RouteResult,
    base_url: String,
}

impl DispatchContext {
    pub fn new(component: Arc<Component>, route: RouteResult, base_url: String) -> Self {
        Self {
            component,
            route,
            base_url,
        }
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn route(&self) -> &RouteResult {
        &self.route
    }

    /// URL prefix consumed by the enclosing components.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Shared flag a server sets when the client gave up on a request.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cancels the flag when dropped unless disarmed first.
#[derive(Debug)]
pub struct CancelOnDrop {
    flag: CancellationFlag,
    armed: bool,
}

impl CancelOnDrop {
    pub fn new(flag: CancellationFlag) -> Self {
        Self { flag, armed: true }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

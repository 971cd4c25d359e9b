//! HTTP adapter
//!
//! Serves a component tree through axum. Every request gets a fresh
//! [`Dispatcher`] running on a blocking thread, since dispatch is synchronous.

use crate::config::FrameworkSettings;
use crate::core::UmiError;
use crate::hmvc::{CancelOnDrop, CancellationFlag, Component, Dispatcher};
use crate::http::{Request as UmiRequest, Response as UmiResponse};
use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Largest request body the adapter reads.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Role assumed for requests when no role resolver is installed.
pub const GUEST_ROLE: &str = "guest";

type RoleResolver = dyn Fn(&UmiRequest) -> Vec<String> + Send + Sync;

/// Shared state of the adapter.
#[derive(Clone)]
pub struct WebApp {
    root: Arc<Component>,
    roles: Arc<RoleResolver>,
    timeout: Option<Duration>,
}

impl WebApp {
    pub fn new(root: Arc<Component>) -> Self {
        Self {
            root,
            roles: Arc::new(|_: &UmiRequest| vec![GUEST_ROLE.to_string()]),
            timeout: None,
        }
    }

    pub fn from_settings(root: Arc<Component>, settings: &FrameworkSettings) -> Self {
        Self::new(root).with_timeout(settings.dispatch_timeout)
    }

    /// Decides which ACL roles a request acts under.
    pub fn with_roles<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&UmiRequest) -> Vec<String> + Send + Sync + 'static,
    {
        self.roles = Arc::new(resolver);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn dispatcher(&self, request: &UmiRequest, cancellation: CancellationFlag) -> Dispatcher {
        let dispatcher = Dispatcher::new(Arc::clone(&self.root))
            .with_roles((self.roles)(request))
            .with_cancellation(cancellation);
        match self.timeout {
            Some(timeout) => dispatcher.with_timeout(timeout),
            None => dispatcher,
        }
    }
}

impl fmt::Debug for WebApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebApp")
            .field("root", &self.root.path())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Router sending every request to the component tree.
pub fn router(app: WebApp) -> axum::Router {
    axum::Router::new()
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Binds `settings.bind_addr` and serves until the task is dropped.
pub async fn serve(app: WebApp, settings: &FrameworkSettings) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "listening");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

async fn handle(State(app): State<WebApp>, request: Request) -> Response {
    let request = match convert_request(request).await {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let cancellation = CancellationFlag::new();
    let guard = CancelOnDrop::new(cancellation.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        let dispatcher = app.dispatcher(&request, cancellation);
        dispatcher.dispatch(request)
    })
    .await;
    guard.disarm();

    match outcome {
        Ok(Ok(response)) => convert_response(response),
        Ok(Err(err)) => WebError::from(err).into_response(),
        Err(join) => WebError::Internal(join.to_string()).into_response(),
    }
}

async fn convert_request(request: Request) -> Result<UmiRequest> {
    let (parts, body) = request.into_parts();
    let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(query)| query)
        .map_err(|e| WebError::Input(e.body_text()))?;
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| WebError::Input(format!("Cannot read request body: {}", e)))?;

    Ok(UmiRequest::new(parts.method, parts.uri.path())
        .with_query(query)
        .with_headers(parts.headers)
        .with_body(body.to_vec()))
}

fn convert_response(response: UmiResponse) -> Response {
    let status = response.status();
    let headers = response.headers().clone();
    (status, headers, Body::from(response.into_body())).into_response()
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Dispatch(UmiError),
    Input(String),
    Internal(String),
}

impl From<UmiError> for WebError {
    fn from(err: UmiError) -> Self {
        WebError::Dispatch(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Dispatch(err @ UmiError::HttpNotFound(_)) => {
                (StatusCode::NOT_FOUND, err.to_string(), "not_found")
            }
            WebError::Dispatch(err @ UmiError::HttpMethodNotAllowed(_)) => {
                (StatusCode::METHOD_NOT_ALLOWED, err.to_string(), "method_not_allowed")
            }
            WebError::Dispatch(err @ UmiError::ResourceAccessForbidden { .. }) => {
                (StatusCode::FORBIDDEN, err.to_string(), "forbidden")
            }
            WebError::Dispatch(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "internal_error",
            ),
            WebError::Input(msg) => (StatusCode::BAD_REQUEST, msg, "input_error"),
            WebError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, "internal_error"),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

#[cfg(test)]
mod tests {
    use super::WebError;
    use crate::core::UmiError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn dispatch_errors_map_to_status_codes() {
        let cases = [
            (UmiError::HttpNotFound("x".into()), StatusCode::NOT_FOUND),
            (UmiError::HttpMethodNotAllowed("x".into()), StatusCode::METHOD_NOT_ALLOWED),
            (
                UmiError::ResourceAccessForbidden {
                    resource: "controller:edit".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (UmiError::OutOfDate("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(WebError::from(err).into_response().status(), status);
        }
    }
}

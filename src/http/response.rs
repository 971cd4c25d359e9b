use crate::core::{Result, UmiError};
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, StatusCode};

/// Outgoing response.
///
/// A `completed` response is final content: enclosing components do not wrap
/// it in their layouts.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    completed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Response {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
            completed: false,
        }
    }

    /// JSON body; marks the response completed.
    pub fn json(value: &serde_json::Value) -> Self {
        let mut response = Self::new(value.to_string());
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.completed = true;
        response
    }

    /// Redirect to `location` with 302.
    pub fn redirect(location: &str) -> Result<Self> {
        Self::redirect_with(location, StatusCode::FOUND)
    }

    pub fn permanent_redirect(location: &str) -> Result<Self> {
        Self::redirect_with(location, StatusCode::MOVED_PERMANENTLY)
    }

    pub fn redirect_with(location: &str, status: StatusCode) -> Result<Self> {
        if !status.is_redirection() {
            return Err(UmiError::UnexpectedValue(format!(
                "Status {} is not a redirect status",
                status
            )));
        }
        let value = HeaderValue::from_str(location).map_err(|e| {
            UmiError::UnexpectedValue(format!("Invalid redirect location '{}': {}", location, e))
        })?;
        let mut response = Self::new(String::new()).with_status(status);
        response.headers.insert(LOCATION, value);
        response.completed = true;
        Ok(response)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.headers.contains_key(LOCATION)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_sets_location_and_completes() {
        let response = Response::redirect("/login").unwrap();
        assert!(response.is_redirect());
        assert!(response.is_completed());
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.location(), Some("/login"));
    }

    #[test]
    fn test_redirect_rejects_non_redirect_status() {
        assert!(Response::redirect_with("/", StatusCode::OK).is_err());
    }

    #[test]
    fn test_plain_response_is_not_completed() {
        let response = Response::new("<p>hi</p>");
        assert!(!response.is_completed());
        assert!(!response.is_redirect());
        assert_eq!(response.body(), "<p>hi</p>");
    }
}

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::FarmgateError;

/// An outgoing request, relative to the configured base URL.
///
/// Cloneable so the recovery path can replay it with a fresh token.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post(path: &str, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: &str, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: &str, body: serde_json::Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, FarmgateError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FarmgateError::InvalidArgument(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FarmgateError::InvalidArgument(format!("header value for '{name}': {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// `METHOD path`, used to name the request in errors and logs.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// The bearer token currently attached, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    /// Attach `Authorization: Bearer <token>`, replacing any previous value.
    pub fn set_bearer(&mut self, token: &str) -> Result<(), FarmgateError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            FarmgateError::InvalidArgument("access token is not a valid header value".into())
        })?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn clear_authorization(&mut self) {
        self.headers.remove(AUTHORIZATION);
    }
}

/// A fully-buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FarmgateError> {
        serde_json::from_str(&self.body)
            .map_err(|e| FarmgateError::Decode(format!("HTTP {} body: {e}", self.status.as_u16())))
    }

    /// Turn a non-2xx response into `FarmgateError::Status`.
    pub fn error_for_status(self, request: &str) -> Result<Self, FarmgateError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FarmgateError::Status {
                request: request.to_string(),
                status: self.status.as_u16(),
                body: self.body,
            })
        }
    }
}

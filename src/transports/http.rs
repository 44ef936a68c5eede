use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::FarmgateError;
use crate::transport::HttpTransport;
use crate::types::{ApiRequest, ApiResponse};

/// reqwest-backed transport that resolves request paths against a base URL.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Create a transport for `base_url`.
    ///
    /// Rejects cleartext `http://` URLs unless `allow_http` is `true`.
    pub fn new(
        base_url: &str,
        headers: &HashMap<String, String>,
        allow_http: bool,
    ) -> Result<Self, FarmgateError> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| FarmgateError::InvalidArgument(format!("invalid base URL '{base_url}': {e}")))?;

        match url.scheme() {
            "https" => {}
            "http" if allow_http => {}
            "http" => {
                return Err(FarmgateError::InvalidArgument(format!(
                    "Cleartext HTTP is not allowed for '{base_url}'. \
                     Use https:// or set \"allowHttp\": true in the config."
                )));
            }
            scheme => {
                return Err(FarmgateError::InvalidArgument(format!(
                    "Unsupported URL scheme '{scheme}' in '{base_url}'"
                )));
            }
        }

        let mut header_map = HeaderMap::new();
        header_map.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                FarmgateError::InvalidArgument(format!("Invalid header name '{key}': {e}"))
            })?;
            let val = HeaderValue::from_str(value).map_err(|e| {
                FarmgateError::InvalidArgument(format!("Invalid header value for '{key}': {e}"))
            })?;
            header_map.insert(name, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| FarmgateError::Transport(Box::new(e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> Result<ApiResponse, FarmgateError> {
        let url = self.url_for(&request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        tracing::debug!(request = %request.label(), "sending");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FarmgateError::Timeout {
                    request: request.label(),
                    duration: timeout,
                }
            } else {
                FarmgateError::Transport(Box::new(e))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FarmgateError::Timeout {
                    request: request.label(),
                    duration: timeout,
                }
            } else {
                FarmgateError::Transport(Box::new(e))
            }
        })?;
        tracing::debug!(request = %request.label(), status = status.as_u16(), "received");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

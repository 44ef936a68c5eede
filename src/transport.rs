use std::time::Duration;

use async_trait::async_trait;

use crate::error::FarmgateError;
use crate::types::{ApiRequest, ApiResponse};

impl std::fmt::Debug for dyn HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}

/// The network seam of the pipeline.
///
/// Implementations send the request exactly as given (headers included) and
/// return the response for every HTTP status; only failures to get a response
/// at all are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request, giving up after `timeout`.
    async fn execute(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> Result<ApiResponse, FarmgateError>;
}

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::cancellable;
use crate::auth::endpoints::Endpoints;
use crate::auth::refresh::RefreshCoordinator;
use crate::error::FarmgateError;
use crate::session::TokenStore;
use crate::transport::HttpTransport;
use crate::types::{ApiRequest, ApiResponse};

/// A request that came back 401, held for at most `MAX_REPLAYS` resends.
const MAX_REPLAYS: u32 = 1;

#[derive(Debug)]
struct PendingRequest {
    request: ApiRequest,
    replays_left: u32,
}

impl PendingRequest {
    fn new(request: ApiRequest) -> Self {
        Self {
            request,
            replays_left: MAX_REPLAYS,
        }
    }

    /// A copy of the original carrying `access_token`, or `None` once the
    /// replay budget is spent.
    fn replay_with(&mut self, access_token: &str) -> Result<Option<ApiRequest>, FarmgateError> {
        if self.replays_left == 0 {
            return Ok(None);
        }
        self.replays_left -= 1;
        let mut replay = self.request.clone();
        replay.set_bearer(access_token)?;
        Ok(Some(replay))
    }
}

/// Post-flight handling of 401 responses: refresh, then resend once.
#[derive(Debug, Clone)]
pub struct ResponseRecoveryHandler {
    endpoints: Endpoints,
    store: Arc<dyn TokenStore>,
    refresh: RefreshCoordinator,
    transport: Arc<dyn HttpTransport>,
    request_timeout: Duration,
}

impl ResponseRecoveryHandler {
    pub fn new(
        endpoints: Endpoints,
        store: Arc<dyn TokenStore>,
        refresh: RefreshCoordinator,
        transport: Arc<dyn HttpTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoints,
            store,
            refresh,
            transport,
            request_timeout,
        }
    }

    /// Recover from `response` (a 401) to `request` as it was sent.
    ///
    /// Whatever the single replay returns is final; a second 401 ends the
    /// session with `RecoveryExhausted`.
    pub async fn recover(
        &self,
        request: ApiRequest,
        response: ApiResponse,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, FarmgateError> {
        let label = request.label();

        if self.endpoints.is_auth_endpoint(&request.path) {
            return Err(FarmgateError::Unauthorized {
                request: label,
                response: Box::new(response),
            });
        }

        let Some(current) = self.store.get() else {
            self.refresh.invalidate("server rejected the request and no refresh token is available");
            return Err(FarmgateError::Unauthorized {
                request: label,
                response: Box::new(response),
            });
        };

        // Someone else already rotated the token this request was sent with.
        let rotated = request
            .bearer_token()
            .is_some_and(|sent| sent != current.access_token)
            && !current.is_expired();

        let access_token = if rotated {
            tracing::debug!(request = %label, "token rotated since send; replaying without refresh");
            current.access_token
        } else {
            tracing::debug!(request = %label, "unauthorized; refreshing session");
            let refreshed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FarmgateError::Cancelled(label)),
                outcome = self.refresh.refresh() => outcome,
            };
            match refreshed {
                Ok(tokens) => tokens.access_token,
                Err(reason) => {
                    // The coordinator has already cleared the session,
                    // unless the refresh was interrupted.
                    return Err(FarmgateError::from_refresh(
                        label,
                        reason,
                        Some(Box::new(response)),
                    ));
                }
            }
        };

        let mut pending = PendingRequest::new(request);
        let Some(replay) = pending.replay_with(&access_token)? else {
            return Err(FarmgateError::RecoveryExhausted {
                request: label,
                response: Box::new(response),
            });
        };

        let retried = cancellable(
            cancel,
            &label,
            self.transport.execute(&replay, self.request_timeout),
        )
        .await?;

        if retried.is_unauthorized() {
            self.refresh
                .invalidate("request still unauthorized after refreshing the session");
            return Err(FarmgateError::RecoveryExhausted {
                request: label,
                response: Box::new(retried),
            });
        }
        Ok(retried)
    }
}

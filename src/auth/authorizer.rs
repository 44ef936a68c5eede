use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::auth::endpoints::Endpoints;
use crate::auth::refresh::RefreshCoordinator;
use crate::error::FarmgateError;
use crate::session::{TokenStore, TokenTriple};
use crate::types::ApiRequest;

/// How an outgoing request gets (or does not get) its bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Login or refresh endpoint; sent without a token.
    Bypass,
    /// Never logged in; sent without a token and left to the server.
    Anonymous,
    /// Current token is still valid.
    AttachAsIs,
    /// Current token is expired (or has no known expiry); refresh first.
    ProactiveRefresh,
}

/// Pure pre-flight decision for `request` given the current tokens.
pub fn decide(
    endpoints: &Endpoints,
    request: &ApiRequest,
    tokens: Option<&TokenTriple>,
    now: DateTime<Utc>,
) -> AuthDecision {
    if endpoints.is_auth_endpoint(&request.path) {
        return AuthDecision::Bypass;
    }
    match tokens {
        None => AuthDecision::Anonymous,
        Some(t) if t.is_expired_at(now) => AuthDecision::ProactiveRefresh,
        Some(_) => AuthDecision::AttachAsIs,
    }
}

/// Attaches the bearer token before a request is sent, refreshing first when
/// the stored token has expired.
#[derive(Debug, Clone)]
pub struct RequestAuthorizer {
    endpoints: Endpoints,
    store: Arc<dyn TokenStore>,
    refresh: RefreshCoordinator,
}

impl RequestAuthorizer {
    pub fn new(endpoints: Endpoints, store: Arc<dyn TokenStore>, refresh: RefreshCoordinator) -> Self {
        Self {
            endpoints,
            store,
            refresh,
        }
    }

    /// Prepare `request` for sending and report which path was taken.
    ///
    /// A failed proactive refresh aborts the request: it is never sent with
    /// the stale token or without one. Absolute URLs off the backend's
    /// origin are refused before any token is touched.
    pub async fn authorize(
        &self,
        request: &mut ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<AuthDecision, FarmgateError> {
        self.endpoints.check_origin(&request.path)?;
        let tokens = self.store.get();
        let decision = decide(&self.endpoints, request, tokens.as_ref(), Utc::now());
        tracing::debug!(request = %request.label(), ?decision, "authorizing");

        match decision {
            AuthDecision::Bypass | AuthDecision::Anonymous => {
                request.clear_authorization();
            }
            AuthDecision::AttachAsIs => {
                if let Some(ref t) = tokens {
                    request.set_bearer(&t.access_token)?;
                }
            }
            AuthDecision::ProactiveRefresh => {
                let label = request.label();
                let refreshed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FarmgateError::Cancelled(label)),
                    outcome = self.refresh.refresh() => outcome,
                };
                match refreshed {
                    Ok(t) => request.set_bearer(&t.access_token)?,
                    Err(reason) => return Err(FarmgateError::from_refresh(label, reason, None)),
                }
            }
        }
        Ok(decision)
    }
}

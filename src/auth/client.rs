use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::auth::authorizer::RequestAuthorizer;
use crate::auth::cancellable;
use crate::auth::endpoints::Endpoints;
use crate::auth::recovery::ResponseRecoveryHandler;
use crate::auth::refresh::RefreshCoordinator;
use crate::config::ClientConfig;
use crate::error::FarmgateError;
use crate::session::{
    AuthResponse, FileTokenStore, ProfilePatch, SessionState, TokenStore, TokenTriple,
    UserProfile,
};
use crate::transport::HttpTransport;
use crate::transports::ReqwestTransport;
use crate::types::{ApiRequest, ApiResponse};

/// Authenticated access to the backend.
///
/// Every request goes through the authorizer, the transport and, on a 401,
/// the recovery handler. One client owns one session; share it by reference.
#[derive(Debug)]
pub struct AuthClient {
    endpoints: Endpoints,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    session: Arc<SessionState>,
    refresh: RefreshCoordinator,
    authorizer: RequestAuthorizer,
    recovery: ResponseRecoveryHandler,
    request_timeout: Duration,
}

impl AuthClient {
    /// Build a client with the reqwest transport and the durable token file
    /// named by `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, FarmgateError> {
        let transport = ReqwestTransport::new(&config.base_url, &config.headers, config.allow_http)?;
        let store = FileTokenStore::new(config.token_file());
        Ok(Self::new(config, Arc::new(transport), Arc::new(store)))
    }

    /// Build a client over explicit collaborators. The session is seeded from
    /// whatever `store` already holds.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let endpoints = Endpoints::from_config(config);
        let session = Arc::new(SessionState::restored(store.get()));
        let refresh = RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&session),
            &endpoints.refresh,
            config.refresh_timeout(),
        );
        let authorizer =
            RequestAuthorizer::new(endpoints.clone(), Arc::clone(&store), refresh.clone());
        let recovery = ResponseRecoveryHandler::new(
            endpoints.clone(),
            Arc::clone(&store),
            refresh.clone(),
            Arc::clone(&transport),
            config.request_timeout(),
        );
        Self {
            endpoints,
            transport,
            store,
            session,
            refresh,
            authorizer,
            recovery,
            request_timeout: config.request_timeout(),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The tokens requests are currently authorized with.
    pub fn current_tokens(&self) -> Option<TokenTriple> {
        self.store.get()
    }

    /// Send `request` through the authorization pipeline.
    ///
    /// Non-401 responses are returned whatever their status; use
    /// [`ApiResponse::error_for_status`] to turn them into errors.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, FarmgateError> {
        self.send_with_cancel(request, &CancellationToken::new()).await
    }

    pub async fn send_with_cancel(
        &self,
        mut request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, FarmgateError> {
        let label = request.label();
        self.authorizer.authorize(&mut request, cancel).await?;

        let response = cancellable(
            cancel,
            &label,
            self.transport.execute(&request, self.request_timeout),
        )
        .await?;

        if !response.is_unauthorized() {
            return Ok(response);
        }
        self.recovery.recover(request, response, cancel).await
    }

    /// `GET path`, requiring a 2xx JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FarmgateError> {
        let request = ApiRequest::get(path);
        let label = request.label();
        self.send(request).await?.error_for_status(&label)?.json()
    }

    /// Exchange credentials for a token triple and start a session.
    ///
    /// A rejected login comes back as `Unauthorized` with the server's
    /// response untouched.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserProfile>, FarmgateError> {
        let request = ApiRequest::post(
            &self.endpoints.login,
            serde_json::json!({ "username": username, "password": password }),
        );
        let label = request.label();
        let response = self.send(request).await?.error_for_status(&label)?;
        let body: AuthResponse = response.json()?;
        let (tokens, user) = body
            .into_parts()
            .map_err(|e| FarmgateError::Decode(format!("login response: {e}")))?;

        self.refresh.establish(tokens, user.clone())?;
        tracing::info!(username, "logged in");
        Ok(user)
    }

    /// End the session. The server is told on a best-effort basis; local
    /// tokens and session are cleared regardless.
    pub async fn logout(&self) -> Result<(), FarmgateError> {
        if let Some(tokens) = self.store.get() {
            let mut request = ApiRequest::post(
                &self.endpoints.logout,
                serde_json::json!({ "refreshToken": tokens.refresh_token }),
            );
            if request.set_bearer(&tokens.access_token).is_ok() {
                match self.transport.execute(&request, self.request_timeout).await {
                    Ok(resp) if resp.is_success() => {}
                    Ok(resp) => {
                        tracing::debug!(status = resp.status.as_u16(), "server logout not acknowledged")
                    }
                    Err(e) => tracing::debug!("server logout failed: {e}"),
                }
            }
        }
        self.refresh.logout()?;
        tracing::info!("logged out");
        Ok(())
    }

    /// Load the signed-in user's profile into the session.
    pub async fn fetch_profile(&self) -> Result<UserProfile, FarmgateError> {
        let user: UserProfile = self.get_json(&self.endpoints.profile).await?;
        self.session.set_user(user.clone());
        Ok(user)
    }

    /// Apply `patch` optimistically, confirm it with the server, then commit
    /// or roll back.
    pub async fn update_profile(
        &self,
        patch: ProfilePatch,
    ) -> Result<Option<UserProfile>, FarmgateError> {
        self.update_profile_with_cancel(patch, &CancellationToken::new())
            .await
    }

    pub async fn update_profile_with_cancel(
        &self,
        patch: ProfilePatch,
        cancel: &CancellationToken,
    ) -> Result<Option<UserProfile>, FarmgateError> {
        if patch.is_empty() {
            return Err(FarmgateError::InvalidArgument(
                "profile update has no fields".into(),
            ));
        }
        let body = serde_json::to_value(&patch)
            .map_err(|e| FarmgateError::InvalidArgument(format!("profile update: {e}")))?;
        let request = ApiRequest::patch(&self.endpoints.profile, body);
        let label = request.label();

        self.session.optimistic_patch(patch.clone());
        let mut pending = PendingPatch {
            session: self.session.as_ref(),
            resolved: false,
        };

        let response = self
            .send_with_cancel(request, cancel)
            .await?
            .error_for_status(&label)?;

        self.session.commit(&patch);
        pending.resolved = true;

        // Prefer the server's view when it echoes the updated profile.
        if let Ok(user) = response.json::<UserProfile>() {
            self.session.set_user(user);
        }
        Ok(self.session.user())
    }
}

/// Rolls the optimistic patch back unless it was committed, including when
/// the update future is dropped mid-flight.
struct PendingPatch<'a> {
    session: &'a SessionState,
    resolved: bool,
}

impl Drop for PendingPatch<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.session.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshFailure;
    use crate::session::SessionEvent;
    use crate::test_support::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config() -> ClientConfig {
        ClientConfig::for_base_url("https://api.farm.test")
    }

    fn client(transport: Arc<ScriptedTransport>, tokens: Option<TokenTriple>) -> AuthClient {
        AuthClient::new(&config(), transport, memory_store(tokens))
    }

    fn ana() -> serde_json::Value {
        serde_json::json!({"id": 1, "username": "ana", "firstName": "Ana"})
    }

    #[tokio::test]
    async fn absolute_urls_are_limited_to_the_backend() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            json_response(200, serde_json::json!({"ok": true}))
        }));
        let client = client(Arc::clone(&transport), Some(fresh_tokens("a1", "r1")));

        let err = client
            .send(ApiRequest::get("https://evil.example/steal"))
            .await
            .unwrap_err();
        assert!(matches!(err, FarmgateError::InvalidArgument(_)));
        assert!(transport.calls().is_empty());

        let ok = client
            .send(ApiRequest::get("https://api.farm.test/ponds"))
            .await
            .unwrap();
        assert!(ok.is_success());
        assert_eq!(transport.bearers_to("/ponds"), vec![Some("a1".to_string())]);
    }

    #[tokio::test]
    async fn unstorable_refresh_does_not_leave_a_half_session() {
        let backend = RotatingBackend::new();
        let b = Arc::clone(&backend);
        let transport = Arc::new(ScriptedTransport::new(move |r| b.handle(r)));
        let store = ReadOnlyStore::with_tokens(expired_tokens("a1", "r1"));
        let client = AuthClient::new(&config(), transport.clone(), Arc::clone(&store));

        match client.send(ApiRequest::get("/ponds/1")).await.unwrap_err() {
            FarmgateError::RefreshFailed { reason, .. } => {
                assert!(matches!(reason, RefreshFailure::Storage(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.get().is_none());
        assert!(!client.session().is_authenticated());

        // The next request goes out anonymously instead of replaying the
        // rotated-out refresh token.
        let second = client.send(ApiRequest::get("/ponds/2")).await.unwrap_err();
        assert!(matches!(second, FarmgateError::Unauthorized { .. }), "{second:?}");
        assert_eq!(transport.calls_to("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn expired_token_burst_refreshes_once() {
        let backend = RotatingBackend::new();
        let b = Arc::clone(&backend);
        let (transport, gate) = ScriptedTransport::new(move |r| b.handle(r)).gate("/auth/refresh");
        let transport = Arc::new(transport);
        let client = Arc::new(client(Arc::clone(&transport), Some(expired_tokens("a1", "r1"))));

        let mut set = tokio::task::JoinSet::new();
        for i in 0..5 {
            let client = Arc::clone(&client);
            set.spawn(async move { client.send(ApiRequest::get(&format!("/ponds/{i}"))).await });
        }
        while client.refresh_coordinator().waiter_count() < 5 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);
        while let Some(res) = set.join_next().await {
            assert!(res.unwrap().unwrap().is_success());
        }

        assert_eq!(transport.calls_to("/auth/refresh"), 1);
        let bearers = transport.bearers_to("/ponds");
        assert_eq!(bearers.len(), 5);
        assert!(bearers.iter().all(|b| b.as_deref() == Some("a2")));
    }

    #[tokio::test]
    async fn rejected_refresh_fails_every_queued_request() {
        let (transport, gate) = ScriptedTransport::new(|r| {
            if r.path.contains("/auth/refresh") {
                json_response(400, serde_json::json!({"message": "refresh token reused"}))
            } else {
                status(200)
            }
        })
        .gate("/auth/refresh");
        let transport = Arc::new(transport);
        let client = Arc::new(client(Arc::clone(&transport), Some(expired_tokens("a1", "r1"))));

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..5 {
            let client = Arc::clone(&client);
            set.spawn(async move { client.send(ApiRequest::get("/ponds")).await });
        }
        while client.refresh_coordinator().waiter_count() < 5 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);
        while let Some(res) = set.join_next().await {
            match res.unwrap().unwrap_err() {
                FarmgateError::RefreshFailed { reason, .. } => {
                    assert_eq!(reason, RefreshFailure::Rejected { status: 400 });
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(client.current_tokens().is_none());
        assert!(!client.session().is_authenticated());
        assert_eq!(transport.calls_to("/ponds"), 0);
    }

    #[tokio::test]
    async fn unauthorized_then_recovered() {
        let backend = RotatingBackend::new();
        let b = Arc::clone(&backend);
        let transport = Arc::new(ScriptedTransport::new(move |r| b.handle(r)));
        // Locally valid, but the server already moved on to generation 2.
        backend
            .handle(&ApiRequest::post("/auth/refresh", serde_json::json!({"refreshToken": "r1"})))
            .unwrap();
        let client = client(Arc::clone(&transport), Some(fresh_tokens("a1", "r2")));

        let resp = client.send(ApiRequest::get("/ponds")).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(
            transport.bearers_to("/ponds"),
            vec![Some("a1".to_string()), Some("a3".to_string())]
        );
    }

    #[tokio::test]
    async fn replayed_writes_keep_method_and_body() {
        let backend = RotatingBackend::new();
        let b = Arc::clone(&backend);
        let transport = Arc::new(ScriptedTransport::new(move |r| b.handle(r)));
        backend
            .handle(&ApiRequest::post("/auth/refresh", serde_json::json!({"refreshToken": "r1"})))
            .unwrap();
        let client = client(Arc::clone(&transport), Some(fresh_tokens("a1", "r2")));

        let body = serde_json::json!({"depth": 2});
        client.send(ApiRequest::put("/ponds/7", body.clone())).await.unwrap();
        client.send(ApiRequest::delete("/ponds/7")).await.unwrap();

        let writes: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c.path == "/ponds/7")
            .map(|c| {
                let token = c.bearer_token().map(str::to_string);
                (c.method, c.body, token)
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                (reqwest::Method::PUT, Some(body.clone()), Some("a1".into())),
                (reqwest::Method::PUT, Some(body), Some("a3".into())),
                (reqwest::Method::DELETE, None, Some("a3".into())),
            ]
        );
    }

    #[tokio::test]
    async fn login_rejection_passes_through() {
        let backend = RotatingBackend::new();
        let b = Arc::clone(&backend);
        let transport = Arc::new(ScriptedTransport::new(move |r| b.handle(r)));
        let client = client(Arc::clone(&transport), Some(fresh_tokens("a1", "r1")));

        let err = client.login("ana", "wrong").await.unwrap_err();
        match err {
            FarmgateError::Unauthorized { response, .. } => {
                assert!(response.body.contains("invalid credentials"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls_to("/auth/refresh"), 0);
        assert!(transport.calls()[0].bearer_token().is_none());
    }

    #[tokio::test]
    async fn login_establishes_session() {
        let transport = Arc::new(ScriptedTransport::new(|r| {
            assert_eq!(
                r.body,
                Some(serde_json::json!({"username": "ana", "password": "s3cret"}))
            );
            let mut body = refresh_body("a1", "r1");
            body["userDto"] = ana();
            json_response(200, body)
        }));
        let client = client(transport, None);
        let mut events = client.session().subscribe();

        let user = client.login("ana", "s3cret").await.unwrap().unwrap();
        assert_eq!(user.username, "ana");
        assert_eq!(client.current_tokens().unwrap().access_token, "a1");
        assert!(client.session().is_authenticated());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Authenticated);
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() {
        let transport = Arc::new(ScriptedTransport::new(|_| status(500)));
        let client = client(Arc::clone(&transport), Some(fresh_tokens("a1", "r1")));
        client.logout().await.unwrap();
        assert!(client.current_tokens().is_none());
        assert!(!client.session().is_authenticated());
        let calls = transport.calls();
        assert_eq!(calls[0].path, "/auth/logout");
        assert_eq!(calls[0].bearer_token(), Some("a1"));
    }

    #[tokio::test]
    async fn profile_update_commits_on_success() {
        let transport = Arc::new(ScriptedTransport::new(|r| {
            if r.method == reqwest::Method::GET {
                json_response(200, ana())
            } else {
                status(204)
            }
        }));
        let client = client(transport, Some(fresh_tokens("a1", "r1")));
        client.fetch_profile().await.unwrap();

        let patch = ProfilePatch {
            first_name: Some("X".into()),
            ..Default::default()
        };
        let user = client.update_profile(patch).await.unwrap().unwrap();
        assert_eq!(user.first_name.as_deref(), Some("X"));
        assert!(client.session().pending_patch().is_none());
    }

    #[tokio::test]
    async fn profile_update_rolls_back_on_failure() {
        let transport = Arc::new(ScriptedTransport::new(|r| {
            if r.method == reqwest::Method::GET {
                json_response(200, ana())
            } else {
                json_response(422, serde_json::json!({"message": "invalid email"}))
            }
        }));
        let client = client(transport, Some(fresh_tokens("a1", "r1")));
        client.fetch_profile().await.unwrap();

        let patch = ProfilePatch {
            email: Some("not-an-email".into()),
            ..Default::default()
        };
        let err = client.update_profile(patch).await.unwrap_err();
        assert!(matches!(err, FarmgateError::Status { status: 422, .. }));
        assert!(client.session().pending_patch().is_none());
        assert_eq!(client.session().user().unwrap().email, None);
    }

    #[tokio::test]
    async fn abandoned_profile_update_rolls_back() {
        let seen_patch = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&seen_patch);
        let (transport, _gate) = ScriptedTransport::new(move |r| {
            if r.method == reqwest::Method::PATCH {
                seen.store(true, Ordering::SeqCst);
            }
            json_response(200, ana())
        })
        .gate("/auth/me");
        let client = client(Arc::new(transport), Some(fresh_tokens("a1", "r1")));
        client.session().set_user(serde_json::from_value(ana()).unwrap());

        let cancel = CancellationToken::new();
        let patch = ProfilePatch {
            first_name: Some("X".into()),
            ..Default::default()
        };
        let update = client.update_profile_with_cancel(patch, &cancel);
        let canceller = async {
            while client.session().pending_patch().is_none() {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(update, canceller);

        assert!(matches!(result, Err(FarmgateError::Cancelled(_))));
        assert!(client.session().pending_patch().is_none());
        assert_eq!(
            client.session().effective_user().unwrap().first_name.as_deref(),
            Some("Ana")
        );
        assert!(!seen_patch.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new(|_| status(200)));
        let client = client(Arc::clone(&transport), Some(fresh_tokens("a1", "r1")));
        let err = client.update_profile(ProfilePatch::default()).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert!(transport.calls().is_empty());
    }
}

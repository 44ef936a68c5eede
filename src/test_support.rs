//! In-process fakes for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::error::FarmgateError;
use crate::session::{MemoryTokenStore, SessionState, TokenStore, TokenTriple};
use crate::transport::HttpTransport;
use crate::types::{ApiRequest, ApiResponse};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, FarmgateError> + Send + Sync>;

/// Transport that answers from a closure and records every request.
///
/// Requests whose path contains the gated fragment wait for a permit on
/// `gate` before being answered, which lets a test pile up concurrent callers
/// behind a single in-flight call.
pub struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<ApiRequest>>,
    gated: Option<(String, Arc<Semaphore>)>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, FarmgateError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            gated: None,
        }
    }

    /// Hold requests to `fragment` until the returned semaphore gets permits.
    pub fn gate(mut self, fragment: &str) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gated = Some((fragment.to_string(), Arc::clone(&gate)));
        (self, gate)
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, fragment: &str) -> usize {
        self.calls().iter().filter(|r| r.path.contains(fragment)).count()
    }

    /// Bearer tokens sent to paths containing `fragment`, in call order.
    pub fn bearers_to(&self, fragment: &str) -> Vec<Option<String>> {
        self.calls()
            .iter()
            .filter(|r| r.path.contains(fragment))
            .map(|r| r.bearer_token().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        _timeout: Duration,
    ) -> Result<ApiResponse, FarmgateError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some((ref fragment, ref gate)) = self.gated {
            if request.path.contains(fragment.as_str()) {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
            }
        }
        (self.handler)(request)
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> Result<ApiResponse, FarmgateError> {
    Ok(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        &body.to_string(),
    ))
}

pub fn status(status: u16) -> Result<ApiResponse, FarmgateError> {
    Ok(ApiResponse::new(StatusCode::from_u16(status).unwrap(), ""))
}

pub fn fresh_tokens(access: &str, refresh: &str) -> TokenTriple {
    TokenTriple::new(access, refresh, Utc::now() + chrono::Duration::hours(1))
}

pub fn expired_tokens(access: &str, refresh: &str) -> TokenTriple {
    TokenTriple::new(access, refresh, Utc::now() - chrono::Duration::seconds(1))
}

/// Refresh endpoint body issuing `access`/`refresh`, valid for an hour.
pub fn refresh_body(access: &str, refresh: &str) -> serde_json::Value {
    serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresAt": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
    })
}

/// A backend that accepts exactly one access token at a time and rotates it
/// on every refresh (`a1` → `a2` → `a3`, `r1` → `r2` → ...). A refresh with a
/// stale refresh token is rejected with 401.
pub struct RotatingBackend {
    generation: AtomicUsize,
}

impl RotatingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicUsize::new(1),
        })
    }

    pub fn handle(&self, request: &ApiRequest) -> Result<ApiResponse, FarmgateError> {
        let generation = self.generation.load(Ordering::SeqCst);
        if request.path.contains("/auth/refresh") {
            let sent = request
                .body
                .as_ref()
                .and_then(|b| b.get("refreshToken"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if sent != format!("r{generation}") {
                return status(401);
            }
            let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            return json_response(200, refresh_body(&format!("a{next}"), &format!("r{next}")));
        }
        if request.path.contains("/auth/login") {
            return json_response(401, serde_json::json!({"message": "invalid credentials"}));
        }
        match request.bearer_token() {
            Some(token) if token == format!("a{generation}") => {
                json_response(200, serde_json::json!({"ok": true}))
            }
            _ => status(401),
        }
    }
}

/// Store that reads and clears normally but refuses every write.
pub struct ReadOnlyStore {
    inner: MemoryTokenStore,
}

impl ReadOnlyStore {
    pub fn with_tokens(tokens: TokenTriple) -> Arc<dyn TokenStore> {
        Arc::new(Self {
            inner: MemoryTokenStore::with_tokens(tokens),
        })
    }
}

impl TokenStore for ReadOnlyStore {
    fn get(&self) -> Option<TokenTriple> {
        self.inner.get()
    }

    fn set(&self, _tokens: &TokenTriple) -> Result<(), FarmgateError> {
        Err(FarmgateError::Storage {
            path: "/read-only/tokens.json".into(),
            detail: "read-only file system".into(),
        })
    }

    fn clear(&self) -> Result<(), FarmgateError> {
        self.inner.clear()
    }
}

pub fn memory_store(tokens: Option<TokenTriple>) -> Arc<dyn TokenStore> {
    match tokens {
        Some(t) => Arc::new(MemoryTokenStore::with_tokens(t)),
        None => Arc::new(MemoryTokenStore::new()),
    }
}

pub fn session_for(store: &Arc<dyn TokenStore>) -> Arc<SessionState> {
    Arc::new(SessionState::restored(store.get()))
}

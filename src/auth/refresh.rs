//! Single-flight exchange of the refresh token for a new token triple.
//!
//! The coordinator is either `Idle` or `InFlight` with a list of waiters.
//! The first `refresh()` call flips `Idle` to `InFlight` under the state lock
//! and spawns the network exchange; every later call while in flight only
//! adds a waiter. The exchange runs on its own task so a caller that gives up
//! does not cancel it for everyone else.
//!
//! Settling takes the same lock: write the store and the session, then
//! notify every waiter with one shared outcome, then return to `Idle`.
//! Login, logout and forced invalidation also go through that lock so they
//! cannot interleave with a settle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{FarmgateError, RefreshFailure};
use crate::session::{AuthResponse, SessionState, TokenStore, TokenTriple, UserProfile};
use crate::transport::HttpTransport;
use crate::types::ApiRequest;

/// What every waiter of one refresh receives.
pub type RefreshOutcome = Result<TokenTriple, RefreshFailure>;

type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    Idle,
    InFlight { waiters: Vec<Waiter> },
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    session: Arc<SessionState>,
    refresh_path: String,
    timeout: Duration,
    state: Mutex<RefreshState>,
    exchanges: AtomicU64,
}

/// Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_path", &self.inner.refresh_path)
            .field("timeout", &self.inner.timeout)
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        session: Arc<SessionState>,
        refresh_path: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                session,
                refresh_path: refresh_path.to_string(),
                timeout,
                state: Mutex::new(RefreshState::Idle),
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a new token triple, joining an in-flight refresh if there is
    /// one. Never starts a second network call while one is running.
    ///
    /// Dropping the returned future abandons only this caller's wait.
    pub async fn refresh(&self) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock_state();
            match &mut *state {
                RefreshState::InFlight { waiters } => {
                    waiters.push(tx);
                    tracing::debug!(waiters = waiters.len(), "joining in-flight refresh");
                }
                RefreshState::Idle => {
                    *state = RefreshState::InFlight { waiters: vec![tx] };
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { inner.run_exchange().await });
                }
            }
        }
        rx.await.unwrap_or(Err(RefreshFailure::Interrupted))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(*self.inner.lock_state(), RefreshState::InFlight { .. })
    }

    /// Callers currently blocked on the in-flight refresh.
    pub fn waiter_count(&self) -> usize {
        match &*self.inner.lock_state() {
            RefreshState::InFlight { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Network exchanges started since construction.
    pub fn exchanges_started(&self) -> u64 {
        self.inner.exchanges.load(Ordering::SeqCst)
    }

    /// Install a triple obtained by logging in.
    pub fn establish(
        &self,
        tokens: TokenTriple,
        user: Option<UserProfile>,
    ) -> Result<(), FarmgateError> {
        let _state = self.inner.lock_state();
        self.inner.store.set(&tokens)?;
        self.inner.session.establish(tokens, user);
        Ok(())
    }

    /// Drop tokens and session and tell observers the session is gone.
    pub fn invalidate(&self, reason: &str) {
        let _state = self.inner.lock_state();
        self.inner.clear_store();
        self.inner.session.invalidate(reason);
        tracing::warn!("session invalidated: {reason}");
    }

    /// Drop tokens and session at the user's request.
    pub fn logout(&self) -> Result<(), FarmgateError> {
        let _state = self.inner.lock_state();
        let cleared = self.inner.store.clear();
        self.inner.session.logout();
        cleared
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("failed to clear stored tokens: {e}");
        }
    }

    async fn run_exchange(self: Arc<Self>) {
        let mut guard = SettleGuard {
            inner: Arc::clone(&self),
            settled: false,
        };
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %self.refresh_path, "refreshing session");

        let outcome = match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RefreshFailure::Timeout(self.timeout)),
        };
        guard.settle(outcome);
    }

    async fn exchange(&self) -> Result<(TokenTriple, Option<UserProfile>), RefreshFailure> {
        let refresh_token = self
            .store
            .get()
            .map(|t| t.refresh_token)
            .ok_or(RefreshFailure::NoRefreshToken)?;

        let request = ApiRequest::post(
            &self.refresh_path,
            serde_json::json!({ "refreshToken": refresh_token }),
        );
        let response = self
            .transport
            .execute(&request, self.timeout)
            .await
            .map_err(|e| match e {
                FarmgateError::Timeout { .. } => RefreshFailure::Timeout(self.timeout),
                other => RefreshFailure::Transport(other.to_string()),
            })?;

        if !response.is_success() {
            return Err(RefreshFailure::Rejected {
                status: response.status.as_u16(),
            });
        }
        let body: AuthResponse = response
            .json()
            .map_err(|e| RefreshFailure::Malformed(e.to_string()))?;
        body.into_parts().map_err(RefreshFailure::Malformed)
    }

    /// Store write and session update happen before any waiter is woken,
    /// all under the state lock. Store, session and waiters always agree on
    /// the outcome.
    fn settle(&self, outcome: Result<(TokenTriple, Option<UserProfile>), RefreshFailure>) {
        let mut state = self.lock_state();
        let waiters = match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::InFlight { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };

        // A triple the store did not take is lost: the old refresh token has
        // already been rotated out, so this counts as a failed refresh.
        let outcome = outcome.and_then(|(tokens, user)| match self.store.set(&tokens) {
            Ok(()) => Ok((tokens, user)),
            Err(e) => Err(RefreshFailure::Storage(e.to_string())),
        });

        let shared: RefreshOutcome = match outcome {
            Ok((tokens, user)) => {
                self.session.apply_refresh(tokens.clone(), user);
                tracing::info!(waiters = waiters.len(), "session refreshed");
                Ok(tokens)
            }
            // Interrupted means we never heard back; the stored tokens may
            // still be good.
            Err(RefreshFailure::Interrupted) => Err(RefreshFailure::Interrupted),
            Err(reason) => {
                self.clear_store();
                self.session.invalidate(&reason.to_string());
                tracing::warn!(waiters = waiters.len(), "session refresh failed: {reason}");
                Err(reason)
            }
        };

        for waiter in waiters {
            // A waiter that gave up has dropped its receiver.
            let _ = waiter.send(shared.clone());
        }
    }
}

/// Settles as `Interrupted` if the exchange task ends without settling
/// (panic or runtime shutdown), so waiters are never stranded.
struct SettleGuard {
    inner: Arc<Inner>,
    settled: bool,
}

impl SettleGuard {
    fn settle(&mut self, outcome: Result<(TokenTriple, Option<UserProfile>), RefreshFailure>) {
        self.settled = true;
        self.inner.settle(outcome);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.settle(Err(RefreshFailure::Interrupted));
        }
    }
}

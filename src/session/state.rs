use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::session::tokens::{ProfilePatch, TokenTriple, UserProfile};

const EVENT_CAPACITY: usize = 32;

/// Notifications for whoever renders the session (e.g. redirect to login on
/// `Invalidated`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated,
    TokensRefreshed,
    ProfileChanged,
    Invalidated { reason: String },
    LoggedOut,
}

/// Point-in-time copy of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub tokens: Option<TokenTriple>,
    pub is_authenticated: bool,
    pub pending_profile_patch: Option<ProfilePatch>,
}

#[derive(Debug, Default)]
struct Inner {
    user: Option<UserProfile>,
    tokens: Option<TokenTriple>,
    pending_profile_patch: Option<ProfilePatch>,
}

/// In-memory mirror of the signed-in user and their tokens.
///
/// Constructed once and shared by reference (`Arc`). The committed `user` is
/// only changed by login, profile fetch, refresh payloads and `commit`; an
/// optimistic patch lives beside it until committed or rolled back.
#[derive(Debug)]
pub struct SessionState {
    inner: RwLock<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Seed from previously persisted tokens, without emitting events.
    pub fn restored(tokens: Option<TokenTriple>) -> Self {
        let state = Self::new();
        state.write().tokens = tokens;
        state
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.read();
        SessionSnapshot {
            user: inner.user.clone(),
            tokens: inner.tokens.clone(),
            is_authenticated: inner.tokens.is_some(),
            pending_profile_patch: inner.pending_profile_patch.clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().tokens.is_some()
    }

    pub fn tokens(&self) -> Option<TokenTriple> {
        self.read().tokens.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().tokens.as_ref().map(|t| t.access_token.clone())
    }

    /// The committed profile, ignoring any pending patch.
    pub fn user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    pub fn pending_patch(&self) -> Option<ProfilePatch> {
        self.read().pending_profile_patch.clone()
    }

    /// The committed profile with the pending patch overlaid.
    pub fn effective_user(&self) -> Option<UserProfile> {
        let inner = self.read();
        let mut user = inner.user.clone()?;
        if let Some(ref patch) = inner.pending_profile_patch {
            patch.apply_to(&mut user);
        }
        Some(user)
    }

    /// Start a new session after login.
    pub fn establish(&self, tokens: TokenTriple, user: Option<UserProfile>) {
        {
            let mut inner = self.write();
            inner.tokens = Some(tokens);
            inner.user = user;
            inner.pending_profile_patch = None;
        }
        self.emit(SessionEvent::Authenticated);
    }

    /// Replace the token triple after a refresh; a profile in the refresh
    /// payload replaces the committed user.
    pub fn apply_refresh(&self, tokens: TokenTriple, user: Option<UserProfile>) {
        {
            let mut inner = self.write();
            inner.tokens = Some(tokens);
            if user.is_some() {
                inner.user = user;
            }
        }
        self.emit(SessionEvent::TokensRefreshed);
    }

    /// Replace the committed user with a freshly fetched profile.
    pub fn set_user(&self, user: UserProfile) {
        self.write().user = Some(user);
        self.emit(SessionEvent::ProfileChanged);
    }

    /// Record an unconfirmed profile change. Overwrites any earlier pending
    /// patch; the committed user is untouched.
    pub fn optimistic_patch(&self, patch: ProfilePatch) {
        self.write().pending_profile_patch = Some(patch);
        self.emit(SessionEvent::ProfileChanged);
    }

    /// Merge `patch` into the committed user and drop the pending patch.
    pub fn commit(&self, patch: &ProfilePatch) {
        {
            let mut inner = self.write();
            match inner.user.as_mut() {
                Some(user) => patch.apply_to(user),
                None => tracing::debug!("commit without a loaded profile; only clearing pending patch"),
            }
            inner.pending_profile_patch = None;
        }
        self.emit(SessionEvent::ProfileChanged);
    }

    /// Discard the pending patch. Never touches the committed user.
    pub fn rollback(&self) {
        let had_pending = self.write().pending_profile_patch.take().is_some();
        if had_pending {
            self.emit(SessionEvent::ProfileChanged);
        }
    }

    /// Drop everything because the session can no longer be trusted.
    pub fn invalidate(&self, reason: &str) {
        *self.write() = Inner::default();
        self.emit(SessionEvent::Invalidated {
            reason: reason.to_string(),
        });
    }

    /// Drop everything at the user's request.
    pub fn logout(&self) {
        *self.write() = Inner::default();
        self.emit(SessionEvent::LoggedOut);
    }
}

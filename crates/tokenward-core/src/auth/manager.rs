//! Token resolution engine and user resolution cache.
//!
//! `SessionManager` answers "what is the current valid token" and "who is
//! the current user". Answers come from memory when possible, then from the
//! credential store, then from the authority. Concurrent callers that arrive
//! while a refresh or user fetch is running wait on that same call instead of
//! starting another one.
//!
//! Failure policy: only an explicit `Unauthorized` from the refresh endpoint
//! ends the session and deletes persisted credentials. Transport failures
//! fail the current call, forget the in-memory token and keep the stored
//! refresh token so the next call can try again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::changes::{ChangeChannel, Subscription};
use super::claims::Token;
use super::credentials::{CredentialPair, CredentialStore, StoredCredentials};
use super::state::{SessionCell, SessionState};
use crate::api::{ApiError, Authority};
use crate::error::SessionError;
use crate::models::UserProfile;
use crate::store::KeyValueStore;
use crate::utils::format::redact_token;

type TokenOutcome = Result<Option<Token>, SessionError>;
type PendingToken = Shared<BoxFuture<'static, TokenOutcome>>;
type PendingUser = Shared<BoxFuture<'static, Option<UserProfile>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    authority: Arc<dyn Authority>,
    credentials: CredentialStore,
    cell: SessionCell,
    changes: ChangeChannel,
    user: Mutex<Option<UserProfile>>,
    pending_token: Mutex<Option<PendingToken>>,
    /// In-flight user fetch and the session epoch it was started in.
    pending_user: Mutex<Option<(u64, PendingUser)>>,
    /// Serializes persisted writes with the cell transition that follows
    /// them. Never held across an await.
    write_lock: Mutex<()>,
}

/// Outcome of one slow-path resolution plus whether it moved the cell.
struct Resolution {
    outcome: TokenOutcome,
    changed: bool,
}

impl Resolution {
    fn new(outcome: TokenOutcome, changed: bool) -> Self {
        Self { outcome, changed }
    }
}

/// Session handle shared by everything that needs the current token.
/// Clone is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(authority: Arc<dyn Authority>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                authority,
                credentials: CredentialStore::new(store),
                cell: SessionCell::new(),
                changes: ChangeChannel::new(),
                user: Mutex::new(None),
                pending_token: Mutex::new(None),
                pending_user: Mutex::new(None),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Current state without resolving anything.
    pub fn state(&self) -> SessionState {
        self.inner.cell.get()
    }

    /// Cached profile, if the session is present and one has been resolved.
    pub fn current_user(&self) -> Option<UserProfile> {
        match self.inner.cell.get() {
            SessionState::Present(_) => lock(&self.inner.user).clone(),
            _ => None,
        }
    }

    /// Register a "session changed" observer.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(callback)
    }

    /// Current valid access token, or `None`. Errors are logged.
    pub async fn token(&self) -> Option<Token> {
        match self.try_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Token resolution failed");
                None
            }
        }
    }

    /// Current valid access token.
    ///
    /// `Ok(None)` means logged out, including after the authority rejected
    /// the refresh token. Errors are malformed stored tokens and transport
    /// failures during refresh.
    pub async fn try_token(&self) -> TokenOutcome {
        match self.inner.cell.get() {
            SessionState::Absent => return Ok(None),
            SessionState::Present(token) => {
                if !token.is_expired().unwrap_or(true) {
                    return Ok(Some(token));
                }
                debug!("In-memory access token expired");
            }
            SessionState::Unknown => {}
        }
        self.pending_resolution().await
    }

    /// Join the in-flight resolution or start one.
    fn pending_resolution(&self) -> PendingToken {
        let mut slot = lock(&self.inner.pending_token);
        if let Some(pending) = slot.as_ref() {
            debug!("Joining in-flight token resolution");
            return pending.clone();
        }

        let inner = Arc::clone(&self.inner);
        let pending = async move {
            let resolution = inner.resolve().await;
            lock(&inner.pending_token).take();
            if resolution.changed {
                inner.changes.publish();
            }
            resolution.outcome
        }
        .boxed()
        .shared();
        *slot = Some(pending.clone());
        pending
    }

    /// Log in; `false` on any failure, with the session left untouched.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        match self.try_login(username, password).await {
            Ok(()) => true,
            Err(SessionError::Unauthorized) => {
                info!(username, "Login rejected");
                false
            }
            Err(e) => {
                warn!(username, error = %e, "Login failed");
                false
            }
        }
    }

    pub async fn try_login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let pair = self.inner.authority.login(username, password).await?;
        // Refuse to enter a session we could never resolve again.
        pair.access.claims()?;

        {
            let _guard = lock(&self.inner.write_lock);
            if let Err(e) = self.inner.credentials.save_pair(&pair) {
                warn!(error = %format!("{:#}", e), "Failed to save credentials; session is memory-only");
            }
            if let Err(e) = self.inner.credentials.clear_user() {
                warn!(error = %format!("{:#}", e), "Failed to drop previous cached user");
            }
            *lock(&self.inner.user) = None;
            lock(&self.inner.pending_user).take();
            self.inner.cell.reset(SessionState::Present(pair.access.clone()));
        }

        info!(username, token = %redact_token(pair.access.as_str()), "Logged in");
        self.inner.changes.publish();
        Ok(())
    }

    /// End the session. Persisted keys are deleted best-effort; memory is
    /// always cleared.
    pub fn logout(&self) {
        {
            let _guard = lock(&self.inner.write_lock);
            *lock(&self.inner.user) = None;
            lock(&self.inner.pending_user).take();
            self.inner.cell.reset(SessionState::Absent);
            if let Err(e) = self.inner.credentials.clear() {
                warn!(error = %format!("{:#}", e), "Failed to delete persisted credentials");
            }
        }
        info!("Logged out");
        self.inner.changes.publish();
    }

    /// Subject of the current token.
    pub async fn user_id(&self) -> Option<String> {
        let token = self.token().await?;
        match token.subject() {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Failed to read subject from token");
                None
            }
        }
    }

    pub async fn username(&self) -> Option<String> {
        self.user().await.map(|user| user.username)
    }

    /// Profile of the current user, or `None` when logged out or the
    /// profile could not be fetched. Failed fetches are not cached.
    pub async fn user(&self) -> Option<UserProfile> {
        let token = self.token().await?;
        let subject = match token.subject() {
            Ok(subject) => subject,
            Err(e) => {
                warn!(error = %e, "Failed to read subject from token");
                return None;
            }
        };

        if let Some(user) = lock(&self.inner.user)
            .as_ref()
            .filter(|user| user.matches_subject(subject.as_deref()))
        {
            return Some(user.clone());
        }

        match self.inner.credentials.load_user() {
            Ok(Some(user)) if user.matches_subject(subject.as_deref()) => {
                let _guard = lock(&self.inner.write_lock);
                if self.inner.cell.get().token() == Some(&token) {
                    *lock(&self.inner.user) = Some(user.clone());
                }
                return Some(user);
            }
            Ok(Some(_)) => debug!("Stored user belongs to another subject, ignoring"),
            Ok(None) => {}
            Err(e) => warn!(error = %format!("{:#}", e), "Failed to load cached user"),
        }

        let epoch = self.inner.cell.epoch();
        self.pending_user(epoch, token).await
    }

    /// Join the in-flight user fetch of the current session or start one.
    /// A fetch left over from before a login/logout is never joined.
    fn pending_user(&self, epoch: u64, token: Token) -> PendingUser {
        let mut slot = lock(&self.inner.pending_user);
        if let Some((started, pending)) = slot.as_ref() {
            if *started == epoch {
                debug!("Joining in-flight user fetch");
                return pending.clone();
            }
        }

        let inner = Arc::clone(&self.inner);
        let pending = async move {
            let user = match inner.authority.fetch_user(&token).await {
                Ok(user) => inner.adopt_user(epoch, &token, user),
                Err(ApiError::Unauthorized) => {
                    debug!("User fetch unauthorized");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Failed to fetch user");
                    None
                }
            };
            let mut slot = lock(&inner.pending_user);
            if matches!(slot.as_ref(), Some((started, _)) if *started == epoch) {
                slot.take();
            }
            drop(slot);
            user
        }
        .boxed()
        .shared();
        *slot = Some((epoch, pending.clone()));
        pending
    }
}

impl Inner {
    /// Slow path: memory had nothing usable, go to the store and maybe the
    /// authority.
    async fn resolve(&self) -> Resolution {
        let epoch = self.cell.epoch();
        let stored = match self.credentials.load_pair() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to read stored credentials, treating as empty");
                StoredCredentials::default()
            }
        };

        if let Some(access) = stored.access {
            match access.is_expired() {
                Ok(false) => {
                    debug!(token = %redact_token(access.as_str()), "Using stored access token");
                    return self.settle(epoch, SessionState::Present(access.clone()), Ok(Some(access)));
                }
                Ok(true) => debug!("Stored access token expired"),
                Err(e) => {
                    warn!(error = %e, "Stored access token is malformed");
                    return self.settle(epoch, SessionState::Absent, Err(e));
                }
            }
        }

        let Some(refresh) = stored.refresh else {
            debug!("No refresh token stored");
            return self.settle(epoch, SessionState::Absent, Ok(None));
        };
        match refresh.is_expired() {
            Ok(false) => {}
            Ok(true) => {
                debug!("Refresh token expired");
                return self.settle(epoch, SessionState::Absent, Ok(None));
            }
            Err(e) => {
                warn!(error = %e, "Stored refresh token is malformed");
                return self.settle(epoch, SessionState::Absent, Err(e));
            }
        }

        info!("Refreshing access token");
        match self.authority.refresh(&refresh).await {
            Ok(pair) => self.adopt_refreshed(epoch, pair),
            Err(ApiError::Unauthorized) => self.end_session(epoch),
            Err(e) => {
                warn!(error = %e, "Refresh failed, keeping stored refresh token");
                self.settle(epoch, SessionState::Unknown, Err(e.into()))
            }
        }
    }

    /// Commit `state` unless a login/logout happened since `epoch`, in which
    /// case the caller gets whatever the session holds now.
    fn settle(&self, epoch: u64, state: SessionState, outcome: TokenOutcome) -> Resolution {
        let _guard = lock(&self.write_lock);
        self.commit(epoch, state, outcome)
    }

    /// Like `settle`, for callers already holding the write lock.
    fn commit(&self, epoch: u64, state: SessionState, outcome: TokenOutcome) -> Resolution {
        match self.cell.commit(epoch, state) {
            Some(changed) => Resolution::new(outcome, changed),
            None => {
                debug!("Session changed during resolution, dropping result");
                Resolution::new(Ok(self.cell.get().token().cloned()), false)
            }
        }
    }

    fn adopt_refreshed(&self, epoch: u64, pair: CredentialPair) -> Resolution {
        match pair.access.is_expired() {
            Ok(false) => {}
            Ok(true) => {
                warn!("Authority issued an already expired access token");
                return self.settle(
                    epoch,
                    SessionState::Unknown,
                    Err(SessionError::Transport("refreshed access token already expired".to_string())),
                );
            }
            Err(e) => {
                warn!(error = %e, "Authority issued a malformed access token");
                return self.settle(epoch, SessionState::Unknown, Err(e));
            }
        }

        let _guard = lock(&self.write_lock);
        if self.cell.epoch() != epoch {
            debug!("Session changed during refresh, discarding new pair");
            return Resolution::new(Ok(self.cell.get().token().cloned()), false);
        }
        // Both keys land before the cell flips.
        if let Err(e) = self.credentials.save_pair(&pair) {
            warn!(error = %format!("{:#}", e), "Failed to persist refreshed credentials");
        }
        info!(token = %redact_token(pair.access.as_str()), "Access token refreshed");
        self.commit(epoch, SessionState::Present(pair.access.clone()), Ok(Some(pair.access)))
    }

    /// The authority rejected the refresh token: hard logout.
    fn end_session(&self, epoch: u64) -> Resolution {
        let _guard = lock(&self.write_lock);
        if self.cell.epoch() != epoch {
            debug!("Session changed during refresh, ignoring rejection");
            return Resolution::new(Ok(self.cell.get().token().cloned()), false);
        }
        info!("Refresh token rejected, ending session");
        *lock(&self.user) = None;
        if let Err(e) = self.credentials.clear() {
            warn!(error = %format!("{:#}", e), "Failed to delete rejected credentials");
        }
        self.commit(epoch, SessionState::Absent, Ok(None))
    }

    fn adopt_user(&self, epoch: u64, token: &Token, user: UserProfile) -> Option<UserProfile> {
        let _guard = lock(&self.write_lock);
        if self.cell.epoch() != epoch {
            debug!("Session changed during user fetch, discarding profile");
            return None;
        }
        let subject = token.subject().ok().flatten();
        let current = self.cell.get().token().and_then(|t| t.subject().ok().flatten());
        if current.is_some() && current != subject {
            debug!("Session moved to another subject during user fetch, discarding profile");
            return None;
        }
        if !user.matches_subject(subject.as_deref()) {
            warn!(user_id = %user.id, subject = ?subject, "Fetched user does not match token subject, not caching");
            return Some(user);
        }
        if let Err(e) = self.credentials.save_user(&user) {
            warn!(error = %format!("{:#}", e), "Failed to persist user profile");
        }
        *lock(&self.user) = Some(user.clone());
        Some(user)
    }
}

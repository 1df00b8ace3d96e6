use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::claims::Token;

/// What the engine currently believes about the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(tag = "state", content = "token", rename_all = "lowercase")]
pub enum SessionState {
    /// No determination made yet. Not the same as logged out.
    Unknown,
    /// Logged out, or the refresh token was rejected.
    Absent,
    /// A non-expired access token.
    Present(Token),
}

impl SessionState {
    pub fn token(&self) -> Option<&Token> {
        match self {
            SessionState::Present(token) => Some(token),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SessionState::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Absent => "logged out",
            SessionState::Present(_) => "logged in",
        }
    }
}

#[derive(Debug)]
struct CellInner {
    state: SessionState,
    /// Bumped on every login/logout. Resolutions started under an older
    /// epoch must not overwrite what the user did since.
    epoch: u64,
}

/// Single in-memory source of truth for the session state.
///
/// Reads are synchronous; every write is one lock acquisition, so readers
/// only ever see whole states.
#[derive(Debug)]
pub struct SessionCell {
    inner: Mutex<CellInner>,
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CellInner {
                state: SessionState::Unknown,
                epoch: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Replace the state on behalf of a login or logout, starting a new epoch.
    /// Returns whether the state changed.
    pub fn reset(&self, state: SessionState) -> bool {
        let mut inner = self.lock();
        inner.epoch += 1;
        let changed = inner.state != state;
        inner.state = state;
        changed
    }

    /// Commit the outcome of a resolution that started in `epoch`.
    ///
    /// Returns `None` when a login or logout happened in the meantime (the
    /// outcome is stale and was dropped), otherwise whether the state changed.
    pub fn commit(&self, epoch: u64, state: SessionState) -> Option<bool> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }
        let changed = inner.state != state;
        inner.state = state;
        Some(changed)
    }
}

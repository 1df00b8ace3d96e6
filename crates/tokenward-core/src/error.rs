use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced by the session engine.
///
/// `Clone` so a single in-flight resolution can hand the same outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unauthorized - credentials rejected by the authority")]
    Unauthorized,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl SessionError {
    /// Wrap a store/config error, keeping its context chain in the message.
    pub fn storage(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Unauthorized)
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => SessionError::Unauthorized,
            other => SessionError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_maps_to_unauthorized() {
        let err: SessionError = ApiError::Unauthorized.into();
        assert_eq!(err, SessionError::Unauthorized);
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_other_api_errors_map_to_transport() {
        let err: SessionError = ApiError::ServerError("boom".to_string()).into();
        assert!(matches!(err, SessionError::Transport(ref msg) if msg.contains("boom")));
    }

    #[test]
    fn test_storage_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("Failed to write credentials");
        let err = SessionError::storage(err);
        assert_eq!(
            err,
            SessionError::Storage("Failed to write credentials: disk full".to_string())
        );
    }
}

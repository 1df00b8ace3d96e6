use async_trait::async_trait;

use super::ApiError;
use crate::auth::{CredentialPair, Token};
use crate::models::UserProfile;

/// Remote token authority. Implementations make exactly one attempt per call.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Exchange a username and password for a fresh credential pair.
    async fn login(&self, username: &str, password: &str) -> Result<CredentialPair, ApiError>;

    /// Mint a new pair from a refresh token. `ApiError::Unauthorized` means
    /// the refresh token is no longer accepted.
    async fn refresh(&self, refresh: &Token) -> Result<CredentialPair, ApiError>;

    async fn fetch_user(&self, access: &Token) -> Result<UserProfile, ApiError>;
}

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::claims::Token;
use crate::models::UserProfile;
use crate::store::KeyValueStore;

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_KEY: &str = "refresh";
pub const USER_KEY: &str = "user";

/// Access and refresh token, always persisted and replaced together.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialPair {
    #[serde(rename = "token")]
    pub access: Token,
    pub refresh: Token,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Token::new(access),
            refresh: Token::new(refresh),
        }
    }
}

/// Whatever the store currently holds; either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access: Option<Token>,
    pub refresh: Option<Token>,
}

/// Typed view over a `KeyValueStore` using the `token`, `refresh` and
/// `user` keys.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read both tokens from one store snapshot.
    pub fn load_pair(&self) -> Result<StoredCredentials> {
        let mut values = self
            .store
            .get_many(&[TOKEN_KEY, REFRESH_KEY])
            .context("Failed to read credential pair")?
            .into_iter();
        let access = values.next().flatten().map(Token::new);
        let refresh = values.next().flatten().map(Token::new);
        Ok(StoredCredentials { access, refresh })
    }

    /// Write both tokens as one logical write.
    pub fn save_pair(&self, pair: &CredentialPair) -> Result<()> {
        self.store
            .set_many(&[
                (TOKEN_KEY, pair.access.as_str()),
                (REFRESH_KEY, pair.refresh.as_str()),
            ])
            .context("Failed to save credential pair")
    }

    pub fn load_user(&self) -> Result<Option<UserProfile>> {
        let Some(raw) = self.store.get(USER_KEY).context("Failed to read cached user")? else {
            return Ok(None);
        };
        let user = serde_json::from_str(&raw).context("Failed to parse cached user")?;
        Ok(Some(user))
    }

    pub fn save_user(&self, user: &UserProfile) -> Result<()> {
        let raw = serde_json::to_string(user)?;
        self.store
            .set_many(&[(USER_KEY, raw.as_str())])
            .context("Failed to save cached user")
    }

    pub fn clear_user(&self) -> Result<()> {
        self.store
            .delete_many(&[USER_KEY])
            .context("Failed to delete cached user")
    }

    /// Remove every persisted credential key.
    pub fn clear(&self) -> Result<()> {
        self.store
            .delete_many(&[TOKEN_KEY, REFRESH_KEY, USER_KEY])
            .context("Failed to delete persisted credentials")
    }
}

//! tokenward-core - client-side session and token management.
//!
//! Keeps the current access token, refreshes it through the issuing
//! authority when it expires, persists the credential pair across restarts
//! and tells observers whenever the session changes.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod utils;

pub use api::{ApiClient, ApiError, Authority};
pub use auth::{CredentialPair, SessionManager, SessionState, Subscription, Token};
pub use config::{Config, StoreBackend};
pub use error::SessionError;
pub use models::UserProfile;
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore};

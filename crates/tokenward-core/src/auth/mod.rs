//! Session lifecycle: token decoding, session state, change notification,
//! credential persistence and the resolution engine that ties them together.
//!
//! - `SessionManager`: resolves the current token and user, refreshing and
//!   deduplicating as needed
//! - `SessionCell` / `SessionState`: in-memory source of truth
//! - `ChangeChannel`: "session changed" observers
//! - `CredentialStore`: typed access to the persisted `token`, `refresh` and
//!   `user` keys
//! - `claims`: unverified token decoding and expiry checks

pub mod changes;
pub mod claims;
pub mod credentials;
pub mod manager;
pub mod state;

pub use changes::{ChangeChannel, Subscription};
pub use claims::{decode, is_expired, Claims, DecodedToken, Header, Token};
pub use credentials::{CredentialPair, CredentialStore, StoredCredentials};
pub use manager::SessionManager;
pub use state::{SessionCell, SessionState};

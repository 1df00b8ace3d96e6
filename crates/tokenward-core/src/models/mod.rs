//! Data models exchanged with the authority.
//!
//! - `UserProfile`: snapshot of the authenticated identity

pub mod user;

pub use user::UserProfile;

//! Client side of the remote authority that issues tokens.
//!
//! `Authority` is the seam the session engine talks to; `ApiClient` is the
//! HTTP implementation:
//!
//! - `POST /login` with a JSON body `{username, password}`
//! - `POST /refresh` with the refresh token as bearer credential
//! - `GET /user` with the access token as bearer credential
//!
//! Login and refresh both answer `{token, refresh}`.

pub mod authority;
pub mod client;
pub mod error;

pub use authority::Authority;
pub use client::ApiClient;
pub use error::ApiError;

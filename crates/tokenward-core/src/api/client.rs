//! HTTP client for the token authority.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ApiError, Authority};
use crate::auth::{CredentialPair, Token};
use crate::models::UserProfile;

/// HTTP request timeout in seconds.
/// Refresh calls have no timeout of their own, so this bounds how long a
/// caller can stay suspended on an unresponsive authority.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// API client for the authority.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client with the default request timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, ApiError> {
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }
}

#[async_trait]
impl Authority for ApiClient {
    async fn login(&self, username: &str, password: &str) -> Result<CredentialPair, ApiError> {
        debug!(username, "Sending login request");
        let response = self
            .client
            .post(self.url("/login"))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        Self::parse(response, "login").await
    }

    async fn refresh(&self, refresh: &Token) -> Result<CredentialPair, ApiError> {
        debug!("Sending refresh request");
        let response = self
            .client
            .post(self.url("/refresh"))
            .header(header::ACCEPT, "application/json")
            .bearer_auth(refresh.as_str())
            .send()
            .await?;
        Self::parse(response, "refresh").await
    }

    async fn fetch_user(&self, access: &Token) -> Result<UserProfile, ApiError> {
        debug!("Fetching current user");
        let response = self
            .client
            .get(self.url("/user"))
            .header(header::ACCEPT, "application/json")
            .bearer_auth(access.as_str())
            .send()
            .await?;
        Self::parse(response, "user").await
    }
}

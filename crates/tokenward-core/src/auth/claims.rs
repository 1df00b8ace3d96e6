//! Unverified decoding of compact signed tokens.
//!
//! Signatures are never checked here: the issuing authority is the trust
//! boundary, this side only needs to read `exp` and `sub` to decide when to
//! refresh.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SessionError;
use crate::utils::format::redact_token;

/// An issued token. Immutable; a refresh always produces a new value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn claims(&self) -> Result<Claims, SessionError> {
        decode(&self.0).map(|decoded| decoded.claims)
    }

    pub fn is_expired(&self) -> Result<bool, SessionError> {
        is_expired(&self.0)
    }

    pub fn subject(&self) -> Result<Option<String>, SessionError> {
        self.claims().map(|claims| claims.sub)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token").field(&redact_token(&self.0)).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry in unix seconds. `None` means the token never expires.
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,
    /// Subject, normalized to a string whether issued as a number or not.
    #[serde(default, deserialize_with = "string_or_number")]
    pub sub: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// `authorize` or `refresh`; informational only.
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp.saturating_mul(1000) < now.timestamp_millis(),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A token split into its three parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub header: Header,
    pub claims: Claims,
    /// Raw base64url signature segment, never verified.
    pub signature: String,
}

/// Decode a compact `header.claims.signature` token without verifying it.
pub fn decode(token: &str) -> Result<DecodedToken, SessionError> {
    let mut parts = token.split('.');
    let (header, claims, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => {
            return Err(SessionError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    Ok(DecodedToken {
        header: decode_segment(header, "header")?,
        claims: decode_segment(claims, "claims")?,
        signature: signature.to_string(),
    })
}

/// True when the token's `exp` lies strictly in the past. Tokens without
/// `exp` never expire.
pub fn is_expired(token: &str) -> Result<bool, SessionError> {
    Ok(decode(token)?.claims.is_expired())
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, SessionError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| SessionError::MalformedToken(format!("{} is not base64url: {}", what, e)))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedToken(format!("{} is not JSON: {}", what, e)))?;
    if !value.is_object() {
        return Err(SessionError::MalformedToken(format!("{} is not a JSON object", what)));
    }
    serde_json::from_value(value)
        .map_err(|e| SessionError::MalformedToken(format!("invalid {}: {}", what, e)))
}

fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| de::Error::custom("exp out of range")),
        Some(other) => Err(de::Error::custom(format!("exp must be a number, got {}", other))),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("sub must be a string or number, got {}", other))),
    }
}
